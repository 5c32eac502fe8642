#![forbid(unsafe_code)]

pub mod filter;
pub mod image;
pub mod metadata;
pub mod trigger;
pub mod voice;

use anyhow::Context;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use wxpad_domain::{MsgKind, is_group_address};

use crate::sync::image::SectionTarget;

/// Out-of-band binary reference carried by image/voice frames.
///
/// Consumed by the reassembler/transcoder; never part of the emitted event.
#[derive(Debug, Clone)]
pub struct ImgBuf {
	pub len: Option<u64>,
	pub buffer: Option<String>,
}

/// One inbound gateway frame after flattening and metadata extraction.
///
/// Known fields are lifted out of the wire object; everything else is
/// retained verbatim in `extra` so the emitted event keeps the full frame.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedMessage {
	pub msg_type: i64,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub msg_id: Option<i64>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub new_msg_id: Option<i64>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub create_time: Option<i64>,

	/// Flattened `from_user_name.str`.
	#[serde(rename = "fromUserName", skip_serializing_if = "Option::is_none")]
	pub from_user_name: Option<String>,

	/// Flattened `to_user_name.str`.
	#[serde(rename = "toUserName", skip_serializing_if = "Option::is_none")]
	pub to_user_name: Option<String>,

	/// Resolved payload: inline text, or a replaced binary (base64) after
	/// reassembly/transcoding.
	#[serde(rename = "msgContent", skip_serializing_if = "Option::is_none")]
	pub msg_content: Option<String>,

	/// Parsed `msgsource` metadata tree, when the frame carried one.
	#[serde(rename = "msgSource", skip_serializing_if = "Option::is_none")]
	pub msg_source: Option<Value>,

	/// Parsed content tree, when the inline content itself was XML.
	#[serde(rename = "contentObj", skip_serializing_if = "Option::is_none")]
	pub content_obj: Option<Value>,

	/// Raw 24 kHz mono s16le samples (base64), set by the voice transcoder.
	#[serde(rename = "voicePcm", skip_serializing_if = "Option::is_none")]
	pub voice_pcm: Option<String>,

	#[serde(skip)]
	pub img_buf: Option<ImgBuf>,

	/// Remaining wire fields, passed through untouched.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl NormalizedMessage {
	pub fn kind(&self) -> MsgKind {
		MsgKind::from_code(self.msg_type)
	}

	/// Whether the origin address denotes a group chat.
	pub fn is_group_message(&self) -> bool {
		self.from_user_name.as_deref().is_some_and(is_group_address)
	}

	/// Addresses mentioned in the frame's metadata (`msgsource.atuserlist`).
	pub fn mention_list(&self) -> Vec<String> {
		let Some(source) = self.msg_source.as_ref() else {
			return Vec::new();
		};

		let list = match source.get("atuserlist") {
			Some(Value::String(s)) => s.as_str(),
			Some(Value::Object(o)) => o.get("text").and_then(|t| t.as_str()).unwrap_or_default(),
			_ => return Vec::new(),
		};

		list.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_string)
			.collect()
	}

	/// Addressing triple for the segment-retrieval endpoint, if complete.
	pub fn section_target(&self) -> Option<SectionTarget> {
		Some(SectionTarget {
			from_user_name: self.from_user_name.clone()?,
			to_user_name: self.to_user_name.clone()?,
			msg_id: self.msg_id?,
		})
	}
}

/// Decode one raw sync frame into a `NormalizedMessage`.
///
/// Field extraction is best-effort: a field of unexpected shape is dropped,
/// never an error. Only a frame that is not a JSON object at all fails.
pub fn decode_sync_frame(raw: &str) -> anyhow::Result<NormalizedMessage> {
	let root: Value = serde_json::from_str(raw).context("parse sync frame json")?;
	let Value::Object(mut fields) = root else {
		anyhow::bail!("sync frame is not a json object");
	};

	let msg_type = take_i64(&mut fields, "msg_type").unwrap_or(0);
	let msg_id = take_i64(&mut fields, "msg_id");
	let new_msg_id = take_i64(&mut fields, "new_msg_id");
	let create_time = take_i64(&mut fields, "create_time");

	let from_user_name = take_wrapped_str(&mut fields, "from_user_name");
	let to_user_name = take_wrapped_str(&mut fields, "to_user_name");
	let msg_content = take_wrapped_str(&mut fields, "content");
	let img_buf = take_img_buf(&mut fields);

	let msg_source_raw = match fields.remove("msg_source") {
		Some(Value::String(s)) => Some(s),
		Some(_) | None => None,
	};

	let mut msg_source = None;
	let mut content_obj = None;
	if let Some(src) = msg_source_raw.as_deref() {
		match metadata::parse_embedded_metadata(src) {
			Some(tree) => {
				msg_source = tree.get("msgsource").cloned();
				if let Some(content_text) = msg_content.as_deref() {
					content_obj = metadata::parse_embedded_metadata(content_text);
				}
			}
			None => {
				debug!(msg_type, "unparseable msg_source metadata; dropping field");
			}
		}
	}

	Ok(NormalizedMessage {
		msg_type,
		msg_id,
		new_msg_id,
		create_time,
		from_user_name,
		to_user_name,
		msg_content,
		msg_source,
		content_obj,
		voice_pcm: None,
		img_buf,
		extra: fields,
	})
}

fn take_i64(fields: &mut Map<String, Value>, key: &str) -> Option<i64> {
	let v = fields.remove(key)?;
	match v {
		Value::Number(n) => n.as_i64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

fn take_wrapped_str(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
	let v = fields.remove(key)?;
	match v {
		Value::Object(o) => o.get("str").and_then(|s| s.as_str()).map(str::to_string),
		Value::String(s) => Some(s),
		_ => None,
	}
}

fn take_img_buf(fields: &mut Map<String, Value>) -> Option<ImgBuf> {
	let v = fields.remove("img_buf")?;
	let Value::Object(o) = v else {
		return None;
	};

	Some(ImgBuf {
		len: o.get("len").and_then(|n| n.as_u64()),
		buffer: o.get("buffer").and_then(|b| b.as_str()).map(str::to_string),
	})
}
