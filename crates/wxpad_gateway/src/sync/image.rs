#![forbid(unsafe_code)]

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed page size for section fetches.
pub const SECTION_DATA_LEN: u32 = 65536;

/// Addressing triple for the segment-retrieval endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTarget {
	pub from_user_name: String,
	pub to_user_name: String,
	pub msg_id: i64,
}

/// One section fetch: cursor offset, page size, and the echoed total once
/// it has been discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRequest {
	pub start_pos: u64,
	pub data_len: u32,
	pub total_len: Option<u64>,
}

/// Decoded envelope of one section fetch response.
#[derive(Debug, Clone)]
pub struct SectionResponse {
	/// Base64 payload of this section.
	pub buffer: Option<String>,
	/// Reported total payload length.
	pub total_len: Option<i64>,
}

/// Anomalies that halt a reassembly loop early.
#[derive(Debug, Error)]
pub enum ChunkError {
	#[error("response carried no section buffer")]
	MissingBuffer,

	#[error("section buffer is not valid base64: {0}")]
	Decode(#[from] base64::DecodeError),

	#[error("received empty section")]
	EmptySection,

	#[error("missing or non-positive total length")]
	InvalidTotal,
}

/// Cursor/total/chunks state for one paginated binary reassembly.
///
/// The total is discovered from the first accepted response. The loop driven
/// by `next_request` ends when the cursor reaches the total or `accept`
/// reports an anomaly; success is exact equality of cursor and total.
#[derive(Debug, Default)]
pub struct ChunkSession {
	cursor: u64,
	total: Option<u64>,
	chunks: Vec<Vec<u8>>,
}

impl ChunkSession {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cursor(&self) -> u64 {
		self.cursor
	}

	pub fn total(&self) -> Option<u64> {
		self.total
	}

	/// The next fetch to issue, or `None` once the discovered total is covered.
	pub fn next_request(&self) -> Option<SectionRequest> {
		match self.total {
			Some(total) if self.cursor >= total => None,
			_ => Some(SectionRequest {
				start_pos: self.cursor,
				data_len: SECTION_DATA_LEN,
				total_len: self.total,
			}),
		}
	}

	/// Decode and record one response, advancing the cursor.
	pub fn accept(&mut self, resp: &SectionResponse) -> Result<(), ChunkError> {
		let encoded = resp.buffer.as_deref().ok_or(ChunkError::MissingBuffer)?;
		let chunk = BASE64_STANDARD.decode(encoded.trim())?;
		if chunk.is_empty() {
			return Err(ChunkError::EmptySection);
		}

		self.cursor += chunk.len() as u64;
		self.chunks.push(chunk);

		if self.total.is_none() {
			let total = resp.total_len.filter(|t| *t > 0).ok_or(ChunkError::InvalidTotal)?;
			self.total = Some(total as u64);
		}

		Ok(())
	}

	/// Whether the received sections cover the discovered total exactly.
	pub fn is_complete(&self) -> bool {
		self.total == Some(self.cursor)
	}

	/// Concatenate all received sections in receipt order.
	pub fn into_bytes(self) -> Vec<u8> {
		let mut out = Vec::with_capacity(self.cursor as usize);
		for chunk in self.chunks {
			out.extend_from_slice(&chunk);
		}
		out
	}
}

/// Issues one section fetch against the gateway.
#[async_trait]
pub trait SectionFetcher: Send + Sync {
	async fn fetch_section(&self, target: &SectionTarget, req: &SectionRequest) -> anyhow::Result<SectionResponse>;
}

/// Run the paginated fetch-and-concatenate loop for one oversized payload.
///
/// Any anomaly (transport error, bad status, missing buffer, empty section,
/// decode failure, bad total) halts the loop; the frame is still delivered
/// by the caller, so this returns `None` rather than an error.
pub async fn reassemble_image<F>(fetcher: &F, target: &SectionTarget) -> Option<Vec<u8>>
where
	F: SectionFetcher + ?Sized,
{
	let mut session = ChunkSession::new();

	while let Some(req) = session.next_request() {
		let resp = match fetcher.fetch_section(target, &req).await {
			Ok(resp) => resp,
			Err(e) => {
				warn!(error = %e, msg_id = target.msg_id, start_pos = req.start_pos, "image section fetch failed; halting reassembly");
				break;
			}
		};

		if let Err(e) = session.accept(&resp) {
			warn!(error = %e, msg_id = target.msg_id, start_pos = req.start_pos, "image section rejected; halting reassembly");
			break;
		}

		debug!(
			msg_id = target.msg_id,
			cursor = session.cursor(),
			total = ?session.total(),
			"image reassembly progress"
		);
	}

	if session.is_complete() {
		metrics::counter!("wxpad_image_reassembly_complete_total").increment(1);
		Some(session.into_bytes())
	} else {
		metrics::counter!("wxpad_image_reassembly_partial_total").increment(1);
		None
	}
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;
	use std::sync::Mutex;

	use anyhow::anyhow;
	use proptest::prelude::*;

	use super::*;

	struct ScriptedFetcher {
		responses: Mutex<VecDeque<anyhow::Result<SectionResponse>>>,
		requests: Mutex<Vec<SectionRequest>>,
	}

	impl ScriptedFetcher {
		fn new(responses: Vec<anyhow::Result<SectionResponse>>) -> Self {
			Self {
				responses: Mutex::new(responses.into()),
				requests: Mutex::new(Vec::new()),
			}
		}

		fn seen_requests(&self) -> Vec<SectionRequest> {
			self.requests.lock().expect("lock").clone()
		}
	}

	#[async_trait]
	impl SectionFetcher for ScriptedFetcher {
		async fn fetch_section(&self, _target: &SectionTarget, req: &SectionRequest) -> anyhow::Result<SectionResponse> {
			self.requests.lock().expect("lock").push(req.clone());
			self.responses
				.lock()
				.expect("lock")
				.pop_front()
				.unwrap_or_else(|| Err(anyhow!("script exhausted")))
		}
	}

	fn target() -> SectionTarget {
		SectionTarget {
			from_user_name: "wxid_sender".to_string(),
			to_user_name: "wxid_bot".to_string(),
			msg_id: 42,
		}
	}

	fn section(len: usize, fill: u8, total: i64) -> anyhow::Result<SectionResponse> {
		Ok(SectionResponse {
			buffer: Some(BASE64_STANDARD.encode(vec![fill; len])),
			total_len: Some(total),
		})
	}

	#[tokio::test]
	async fn reassembles_150000_bytes_in_three_fetches() {
		let fetcher = ScriptedFetcher::new(vec![
			section(65536, 0xA1, 150_000),
			section(65536, 0xB2, 150_000),
			section(18928, 0xC3, 150_000),
		]);

		let bytes = reassemble_image(&fetcher, &target()).await.expect("complete payload");
		assert_eq!(bytes.len(), 150_000);
		assert_eq!(bytes[0], 0xA1);
		assert_eq!(bytes[65536], 0xB2);
		assert_eq!(bytes[131072], 0xC3);

		let requests = fetcher.seen_requests();
		assert_eq!(requests.len(), 3);
		assert_eq!(requests[0].start_pos, 0);
		assert_eq!(requests[0].total_len, None);
		assert_eq!(requests[1].start_pos, 65536);
		assert_eq!(requests[1].total_len, Some(150_000));
		assert_eq!(requests[2].start_pos, 131_072);
		assert!(requests.iter().all(|r| r.data_len == SECTION_DATA_LEN));
	}

	#[tokio::test]
	async fn single_section_payload_completes_in_one_fetch() {
		let fetcher = ScriptedFetcher::new(vec![section(512, 0x11, 512)]);

		let bytes = reassemble_image(&fetcher, &target()).await.expect("complete payload");
		assert_eq!(bytes, vec![0x11; 512]);
		assert_eq!(fetcher.seen_requests().len(), 1);
	}

	#[tokio::test]
	async fn empty_section_halts_without_error() {
		let fetcher = ScriptedFetcher::new(vec![
			section(100, 0x22, 500),
			Ok(SectionResponse {
				buffer: Some(String::new()),
				total_len: Some(500),
			}),
		]);

		assert!(reassemble_image(&fetcher, &target()).await.is_none());
		assert_eq!(fetcher.seen_requests().len(), 2);
	}

	#[tokio::test]
	async fn non_positive_total_halts() {
		let fetcher = ScriptedFetcher::new(vec![section(100, 0x33, 0)]);
		assert!(reassemble_image(&fetcher, &target()).await.is_none());
		assert_eq!(fetcher.seen_requests().len(), 1);
	}

	#[tokio::test]
	async fn missing_buffer_halts() {
		let fetcher = ScriptedFetcher::new(vec![Ok(SectionResponse {
			buffer: None,
			total_len: Some(100),
		})]);

		assert!(reassemble_image(&fetcher, &target()).await.is_none());
	}

	#[tokio::test]
	async fn invalid_base64_halts() {
		let fetcher = ScriptedFetcher::new(vec![Ok(SectionResponse {
			buffer: Some("%%% not base64 %%%".to_string()),
			total_len: Some(100),
		})]);

		assert!(reassemble_image(&fetcher, &target()).await.is_none());
	}

	#[tokio::test]
	async fn fetch_error_mid_loop_yields_partial() {
		let fetcher = ScriptedFetcher::new(vec![section(65536, 0x44, 150_000), Err(anyhow!("gateway returned code 500"))]);

		assert!(reassemble_image(&fetcher, &target()).await.is_none());
		assert_eq!(fetcher.seen_requests().len(), 2);
	}

	proptest! {
		#[test]
		fn session_covers_total_exactly(total in 1u64..300_000) {
			let mut session = ChunkSession::new();
			let mut fetches = 0u64;

			while let Some(req) = session.next_request() {
				fetches += 1;
				prop_assert_eq!(req.start_pos, session.cursor());

				let remaining = total - req.start_pos;
				let len = remaining.min(u64::from(req.data_len)) as usize;
				let resp = SectionResponse {
					buffer: Some(BASE64_STANDARD.encode(vec![0xAB; len])),
					total_len: Some(total as i64),
				};
				prop_assert!(session.accept(&resp).is_ok());
			}

			prop_assert!(session.is_complete());
			prop_assert_eq!(fetches, total.div_ceil(u64::from(SECTION_DATA_LEN)));
			prop_assert_eq!(session.into_bytes().len() as u64, total);
		}
	}
}
