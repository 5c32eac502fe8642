#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};
use url::Url;
use wxpad_domain::{FilterConfig, MsgKind, Scene};

use crate::client::GatewayClient;
use crate::sync::image::{SectionFetcher, reassemble_image};
use crate::sync::{NormalizedMessage, decode_sync_frame, filter, voice};
use crate::{
	ConnectionState, SecretString, TriggerControl, TriggerControlRx, TriggerEvent, TriggerEventTx, new_session_id, status,
	status_error,
};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type SyncWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
pub type WsConnector = Arc<dyn Fn(Url) -> BoxFuture<'static, anyhow::Result<SyncWs>> + Send + Sync>;

/// Sync trigger configuration.
#[derive(Clone)]
pub struct TriggerConfig {
	pub base_url: String,
	pub auth_key: SecretString,
	pub filter: FilterConfig,
	pub heartbeat_interval: Duration,
	pub reconnect_delay: Duration,
	pub ws_connector: Option<WsConnector>,
	pub section_fetcher: Option<Arc<dyn SectionFetcher>>,
}

impl TriggerConfig {
	pub fn new(base_url: impl Into<String>, auth_key: SecretString, filter: FilterConfig) -> Self {
		Self {
			base_url: base_url.into(),
			auth_key,
			filter,
			heartbeat_interval: Duration::from_secs(30),
			reconnect_delay: Duration::from_secs(5),
			ws_connector: None,
			section_fetcher: None,
		}
	}
}

/// Derive the sync stream URL from the configured base address.
///
/// The streaming scheme mirrors the base address's own security: `https`/
/// `wss` upgrade to `wss`, everything else to `ws`.
pub fn derive_sync_ws_url(base_url: &str, auth_key: &str) -> anyhow::Result<Url> {
	let trimmed = base_url.trim().trim_end_matches('/');
	if trimmed.is_empty() {
		anyhow::bail!("base url must be non-empty");
	}

	let is_secure = trimmed.starts_with("https://") || trimmed.starts_with("wss://");
	let scheme = if is_secure { "wss" } else { "ws" };
	let host = match trimmed.split_once("://") {
		Some((_, rest)) => rest,
		None => trimmed,
	};

	Url::parse(&format!("{scheme}://{host}/ws/GetSyncMsg?key={auth_key}")).context("parse sync ws url")
}

/// The sync trigger: owns the gateway connection, its heartbeat, and the
/// per-frame pipeline.
///
/// Frames are processed strictly in arrival order; a slow reassembly or
/// transcode delays the next frame rather than fanning out.
pub struct SyncTrigger {
	cfg: TriggerConfig,
	state: ConnectionState,
}

impl SyncTrigger {
	pub fn new(cfg: TriggerConfig) -> Self {
		Self {
			cfg,
			state: ConnectionState::Disconnected,
		}
	}

	pub fn state(&self) -> ConnectionState {
		self.state
	}

	async fn connect_sync_ws(url: Url) -> anyhow::Result<SyncWs> {
		let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
			.await
			.context("connect_async to sync ws")?;
		Ok(ws)
	}

	fn ws_connector(&self) -> WsConnector {
		if let Some(c) = &self.cfg.ws_connector {
			return c.clone();
		}

		Arc::new(|url: Url| {
			Box::pin(async move { Self::connect_sync_ws(url).await }) as BoxFuture<'static, anyhow::Result<SyncWs>>
		})
	}

	fn section_fetcher(&self) -> Arc<dyn SectionFetcher> {
		if let Some(f) = &self.cfg.section_fetcher {
			return Arc::clone(f);
		}

		Arc::new(GatewayClient::new(self.cfg.base_url.clone(), self.cfg.auth_key.clone()))
	}

	fn set_state(&mut self, next: ConnectionState, detail: impl Into<String>, events_tx: &TriggerEventTx) {
		if self.state != next {
			debug!(from = %self.state, to = %next, "connection state transition");
		}
		self.state = next;
		let _ = events_tx.try_send(status(next, detail));
	}

	/// Run the connect/heartbeat/read cycle until `Shutdown` arrives.
	///
	/// The cycle has no terminal state of its own: every close or error
	/// re-enters `Connecting` after the fixed reconnect delay.
	pub async fn run(mut self, mut control_rx: TriggerControlRx, events_tx: TriggerEventTx) -> anyhow::Result<()> {
		let session_id = new_session_id();
		let ws_url = derive_sync_ws_url(&self.cfg.base_url, self.cfg.auth_key.expose())?;
		let connector = self.ws_connector();
		let fetcher = self.section_fetcher();

		info!(%session_id, scene = %self.cfg.filter.scene, policy = %self.cfg.filter.group_policy, "sync trigger starting");

		'outer: loop {
			self.set_state(ConnectionState::Connecting, "connecting to sync stream", &events_tx);

			let mut ws = match (connector)(ws_url.clone()).await {
				Ok(ws) => ws,
				Err(e) => {
					warn!(error = %e, "sync connect failed; retrying after fixed delay");
					let _ = events_tx.try_send(status_error(ConnectionState::Disconnected, "sync connect failed", e));
					self.state = ConnectionState::Disconnected;
					metrics::counter!("wxpad_sync_reconnects_total").increment(1);
					if self.wait_reconnect(&mut control_rx).await {
						break 'outer;
					}
					continue;
				}
			};

			self.set_state(ConnectionState::Open, "sync stream established", &events_tx);
			metrics::counter!("wxpad_sync_connects_total").increment(1);

			let mut heartbeat = interval_at(
				Instant::now() + self.cfg.heartbeat_interval,
				self.cfg.heartbeat_interval,
			);
			heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				tokio::select! {
					cmd = control_rx.recv() => {
						match cmd {
							Some(TriggerControl::Shutdown) | None => {
								info!("sync trigger received shutdown");
								self.set_state(ConnectionState::Closing, "closing sync stream", &events_tx);
								let _ = ws.close(None).await;
								break 'outer;
							}
						}
					}

					_ = heartbeat.tick() => {
						if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
							warn!(error = %e, "heartbeat ping failed; reconnecting");
							break;
						}
						debug!("heartbeat ping sent");
					}

					msg = ws.next() => {
						let Some(msg) = msg else {
							let _ = events_tx.try_send(status(ConnectionState::Disconnected, "sync stream ended"));
							break;
						};

						let msg = match msg {
							Ok(m) => m,
							Err(e) => {
								let _ = events_tx.try_send(status_error(ConnectionState::Disconnected, "sync stream read error", e));
								break;
							}
						};

						match msg {
							Message::Text(t) => {
								self.process_frame(&t, fetcher.as_ref(), &events_tx).await;
							}

							Message::Ping(p) => {
								let _ = ws.send(Message::Pong(p)).await;
							}

							Message::Pong(_) => {}

							Message::Close(frame) => {
								let _ = events_tx.try_send(status(ConnectionState::Disconnected, format!("sync stream closed: {frame:?}")));
								break;
							}

							_ => {}
						}
					}
				}
			}

			// Heartbeat interval dies with this scope. Reconnection is an
			// unconditional policy: fixed delay, no attempt cap.
			self.set_state(ConnectionState::Disconnected, "sync stream disconnected", &events_tx);
			metrics::counter!("wxpad_sync_reconnects_total").increment(1);
			if self.wait_reconnect(&mut control_rx).await {
				break 'outer;
			}
		}

		self.set_state(ConnectionState::Disconnected, "sync trigger disposed", &events_tx);
		info!("sync trigger stopped");
		Ok(())
	}

	/// Sleep out the reconnect delay; returns true if shutdown arrived first.
	async fn wait_reconnect(&mut self, control_rx: &mut TriggerControlRx) -> bool {
		tokio::select! {
			_ = sleep(self.cfg.reconnect_delay) => false,
			cmd = control_rx.recv() => {
				match cmd {
					Some(TriggerControl::Shutdown) | None => {
						info!("sync trigger received shutdown while disconnected");
						true
					}
				}
			}
		}
	}

	async fn process_frame(&self, raw: &str, fetcher: &dyn SectionFetcher, events_tx: &TriggerEventTx) {
		let mut msg = match decode_sync_frame(raw) {
			Ok(m) => m,
			Err(e) => {
				metrics::counter!("wxpad_sync_decode_errors_total").increment(1);
				warn!(error = %e, "failed to decode sync frame");
				return;
			}
		};

		metrics::counter!("wxpad_sync_frames_total").increment(1);

		let approved = filter::should_deliver(&msg, &self.cfg.filter);
		if approved {
			match msg.kind() {
				MsgKind::Image => self.resolve_image_payload(&mut msg, fetcher).await,
				MsgKind::Voice => resolve_voice_payload(&mut msg).await,
				_ => {}
			}
		}

		if approved || self.cfg.filter.scene == Scene::Other {
			if events_tx.send(TriggerEvent::Message(Box::new(msg))).await.is_err() {
				warn!("event channel closed; dropping message");
			}
		} else {
			metrics::counter!("wxpad_sync_frames_dropped_total").increment(1);
			debug!(msg_type = msg.msg_type, "frame dropped by filter");
		}
	}

	async fn resolve_image_payload(&self, msg: &mut NormalizedMessage, fetcher: &dyn SectionFetcher) {
		let Some(target) = msg.section_target() else {
			warn!(msg_type = msg.msg_type, "image frame missing addressing fields; skipping reassembly");
			msg.img_buf = None;
			return;
		};

		match reassemble_image(fetcher, &target).await {
			Some(bytes) => {
				info!(msg_id = target.msg_id, len = bytes.len(), "image payload reassembled");
				msg.msg_content = Some(BASE64_STANDARD.encode(&bytes));
			}
			None => {
				warn!(msg_id = target.msg_id, "image reassembly incomplete; delivering original content");
			}
		}

		// The lightweight placeholder never reaches the consumer.
		msg.img_buf = None;
	}
}

async fn resolve_voice_payload(msg: &mut NormalizedMessage) {
	let Some(buffer) = msg.img_buf.as_ref().and_then(|b| b.buffer.clone()) else {
		debug!("voice frame carries no codec buffer; delivering as-is");
		msg.img_buf = None;
		return;
	};

	let original = buffer.clone();
	let (content, pcm) = match tokio::task::spawn_blocking(move || voice::voice_payload(&buffer)).await {
		Ok(out) => out,
		Err(e) => {
			warn!(error = %e, "voice transcode task failed; delivering original payload");
			(original, None)
		}
	};

	msg.msg_content = Some(content);
	msg.voice_pcm = pcm;
	msg.img_buf = None;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn https_base_upgrades_to_wss() {
		let url = derive_sync_ws_url("https://pad.example.com", "k123").unwrap();
		assert_eq!(url.as_str(), "wss://pad.example.com/ws/GetSyncMsg?key=k123");
	}

	#[test]
	fn http_base_downgrades_to_ws() {
		let url = derive_sync_ws_url("http://pad.example.com:1239", "k123").unwrap();
		assert_eq!(url.as_str(), "ws://pad.example.com:1239/ws/GetSyncMsg?key=k123");
	}

	#[test]
	fn ws_schemes_pass_through() {
		assert_eq!(
			derive_sync_ws_url("wss://pad.example.com", "k").unwrap().scheme(),
			"wss"
		);
		assert_eq!(derive_sync_ws_url("ws://pad.example.com", "k").unwrap().scheme(), "ws");
	}

	#[test]
	fn trailing_slash_and_bare_host_are_handled() {
		let url = derive_sync_ws_url("https://pad.example.com/", "k").unwrap();
		assert_eq!(url.path(), "/ws/GetSyncMsg");

		let url = derive_sync_ws_url("pad.example.com:8080", "k").unwrap();
		assert_eq!(url.as_str(), "ws://pad.example.com:8080/ws/GetSyncMsg?key=k");
	}

	#[test]
	fn empty_base_url_is_rejected() {
		assert!(derive_sync_ws_url("   ", "k").is_err());
	}
}
