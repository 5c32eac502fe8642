#![forbid(unsafe_code)]

pub mod client;
pub mod sync;

use std::fmt;
use std::time::SystemTime;

use tokio::sync::mpsc;
use uuid::Uuid;

pub use crate::sync::NormalizedMessage;

/// Lifecycle state of the single gateway connection.
///
/// Owned exclusively by the sync trigger; heartbeats are only sent while
/// `Open`. The cycle `Disconnected → Connecting → Open → Closing →
/// Disconnected` repeats until disposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	Open,
	Closing,
}

impl ConnectionState {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			ConnectionState::Disconnected => "disconnected",
			ConnectionState::Connecting => "connecting",
			ConnectionState::Open => "open",
			ConnectionState::Closing => "closing",
		}
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Trigger → consumer event message.
#[derive(Debug)]
pub enum TriggerEvent {
	/// One normalized inbound message that survived filtering.
	Message(Box<NormalizedMessage>),

	/// Connection/pipeline status update.
	Status(TriggerStatus),
}

/// Status event payload.
#[derive(Debug, Clone)]
pub struct TriggerStatus {
	pub state: ConnectionState,
	pub detail: String,
	pub last_error: Option<String>,
	pub time: SystemTime,
}

/// Consumer → trigger control message.
#[derive(Debug)]
pub enum TriggerControl {
	/// Stop the heartbeat, close the connection, end the run loop.
	///
	/// Safe to send at any point in the cycle, including while disconnected.
	Shutdown,
}

pub type TriggerControlTx = mpsc::Sender<TriggerControl>;
pub type TriggerControlRx = mpsc::Receiver<TriggerControl>;
pub type TriggerEventTx = mpsc::Sender<TriggerEvent>;
pub type TriggerEventRx = mpsc::Receiver<TriggerEvent>;

/// Build a standard bounded channel pair.
pub fn bounded_trigger_channels(
	control_capacity: usize,
	events_capacity: usize,
) -> (TriggerControlTx, TriggerControlRx, TriggerEventTx, TriggerEventRx) {
	let (control_tx, control_rx) = mpsc::channel(control_capacity);
	let (events_tx, events_rx) = mpsc::channel(events_capacity);
	(control_tx, control_rx, events_tx, events_rx)
}

/// Build a status event.
pub fn status(state: ConnectionState, detail: impl Into<String>) -> TriggerEvent {
	TriggerEvent::Status(TriggerStatus {
		state,
		detail: detail.into(),
		last_error: None,
		time: SystemTime::now(),
	})
}

/// Build a status event carrying an error.
pub fn status_error(state: ConnectionState, detail: impl Into<String>, err: impl fmt::Display) -> TriggerEvent {
	TriggerEvent::Status(TriggerStatus {
		state,
		detail: detail.into(),
		last_error: Some(err.to_string()),
		time: SystemTime::now(),
	})
}

/// Generate an opaque session id.
pub fn new_session_id() -> String {
	Uuid::new_v4().to_string()
}

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}
