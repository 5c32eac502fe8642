#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SecretString;
use crate::sync::image::{SectionFetcher, SectionRequest, SectionResponse, SectionTarget};

/// Outbound HTTP client for the gateway's command endpoints.
#[derive(Debug, Clone)]
pub struct GatewayClient {
	base_url: String,
	auth_key: SecretString,
	client: reqwest::Client,
}

impl GatewayClient {
	pub fn new(base_url: impl Into<String>, auth_key: SecretString) -> Self {
		Self {
			base_url: base_url.into(),
			auth_key,
			client: reqwest::Client::new(),
		}
	}

	fn endpoint(&self, path: &str) -> String {
		format!(
			"{}{}?key={}",
			self.base_url.trim_end_matches('/'),
			path,
			self.auth_key.expose()
		)
	}

	/// Fetch the profile of the configured account.
	pub async fn get_profile(&self) -> anyhow::Result<Value> {
		let resp = self
			.client
			.get(self.endpoint("/user/GetProfile"))
			.send()
			.await
			.context("gateway get profile")?;

		if !resp.status().is_success() {
			return Err(anyhow!("gateway get profile failed: status={}", resp.status()));
		}

		let body: GatewayEnvelope = resp.json().await.context("parse gateway profile response")?;
		if body.code != 200 {
			return Err(anyhow!(
				"gateway get profile failed: code={} msg={}",
				body.code,
				body.text.unwrap_or_default()
			));
		}

		Ok(body.data.unwrap_or(Value::Null))
	}

	/// Credential probe: the profile endpoint answers `Code == 200` iff the
	/// key is accepted.
	pub async fn check_credentials(&self) -> anyhow::Result<()> {
		self.get_profile().await.map(|_| ())
	}

	/// Send a text message, optionally mentioning `at_wx_id_list` members.
	pub async fn send_text_message(
		&self,
		to_user_name: &str,
		content: &str,
		at_wx_id_list: &[String],
	) -> anyhow::Result<Value> {
		let body = SendMessageRequest {
			msg_item: vec![MsgItem {
				to_user_name: to_user_name.to_string(),
				text_content: Some(content.to_string()),
				image_content: None,
				msg_type: 0,
				at_wx_id_list: if at_wx_id_list.is_empty() {
					None
				} else {
					Some(at_wx_id_list.to_vec())
				},
			}],
		};

		self.post_message("/message/SendTextMessage", &body, "send text message").await
	}

	/// Send an image from its base64 content.
	pub async fn send_image_message(&self, to_user_name: &str, image_base64: &str) -> anyhow::Result<Value> {
		let body = SendMessageRequest {
			msg_item: vec![MsgItem {
				to_user_name: to_user_name.to_string(),
				text_content: None,
				image_content: Some(image_base64.to_string()),
				msg_type: 2,
				at_wx_id_list: None,
			}],
		};

		self.post_message("/message/SendImageMessage", &body, "send image message").await
	}

	async fn post_message(&self, path: &str, body: &SendMessageRequest, what: &str) -> anyhow::Result<Value> {
		let resp = self
			.client
			.post(self.endpoint(path))
			.json(body)
			.send()
			.await
			.with_context(|| format!("gateway {what}"))?;

		if !resp.status().is_success() {
			return Err(anyhow!("gateway {what} failed: status={}", resp.status()));
		}

		let envelope: GatewayEnvelope = resp
			.json()
			.await
			.with_context(|| format!("parse gateway {what} response"))?;
		if envelope.code != 200 {
			return Err(anyhow!(
				"gateway {what} failed: code={} msg={}",
				envelope.code,
				envelope.text.unwrap_or_default()
			));
		}

		Ok(envelope.data.unwrap_or(Value::Null))
	}
}

#[async_trait]
impl SectionFetcher for GatewayClient {
	async fn fetch_section(&self, target: &SectionTarget, req: &SectionRequest) -> anyhow::Result<SectionResponse> {
		let body = BigImgRequest {
			compress_type: 0,
			from_user_name: target.from_user_name.clone(),
			msg_id: target.msg_id,
			section: BigImgSectionSpec {
				data_len: req.data_len,
				start_pos: req.start_pos,
			},
			to_user_name: target.to_user_name.clone(),
			total_len: req.total_len,
		};

		let resp = self
			.client
			.post(self.endpoint("/message/GetMsgBigImg"))
			.json(&body)
			.send()
			.await
			.context("gateway get big image")?;

		if !resp.status().is_success() {
			return Err(anyhow!("gateway get big image failed: status={}", resp.status()));
		}

		let envelope: BigImgEnvelope = resp.json().await.context("parse big image response")?;
		if envelope.code != 200 {
			return Err(anyhow!("gateway get big image failed: code={}", envelope.code));
		}

		let data = envelope.data.unwrap_or_default();
		Ok(SectionResponse {
			buffer: data.section.and_then(|s| s.buffer),
			total_len: data.total_len,
		})
	}
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
	#[serde(rename = "MsgItem")]
	msg_item: Vec<MsgItem>,
}

#[derive(Debug, Serialize)]
struct MsgItem {
	#[serde(rename = "ToUserName")]
	to_user_name: String,

	#[serde(rename = "TextContent", skip_serializing_if = "Option::is_none")]
	text_content: Option<String>,

	#[serde(rename = "ImageContent", skip_serializing_if = "Option::is_none")]
	image_content: Option<String>,

	#[serde(rename = "MsgType")]
	msg_type: i64,

	#[serde(rename = "AtWxIdList", skip_serializing_if = "Option::is_none")]
	at_wx_id_list: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct BigImgRequest {
	#[serde(rename = "CompressType")]
	compress_type: i64,

	#[serde(rename = "FromUserName")]
	from_user_name: String,

	#[serde(rename = "MsgId")]
	msg_id: i64,

	#[serde(rename = "Section")]
	section: BigImgSectionSpec,

	#[serde(rename = "ToUserName")]
	to_user_name: String,

	#[serde(rename = "TotalLen", skip_serializing_if = "Option::is_none")]
	total_len: Option<u64>,
}

#[derive(Debug, Serialize)]
struct BigImgSectionSpec {
	#[serde(rename = "DataLen")]
	data_len: u32,

	#[serde(rename = "StartPos")]
	start_pos: u64,
}

#[derive(Debug, Deserialize)]
struct GatewayEnvelope {
	#[serde(rename = "Code")]
	code: i64,

	#[serde(default, rename = "Data")]
	data: Option<Value>,

	#[serde(default, rename = "Text")]
	text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BigImgEnvelope {
	#[serde(rename = "Code")]
	code: i64,

	#[serde(default, rename = "Data")]
	data: Option<BigImgData>,
}

#[derive(Debug, Default, Deserialize)]
struct BigImgData {
	#[serde(default, rename = "Data")]
	section: Option<BigImgSection>,

	#[serde(default, rename = "TotalLen")]
	total_len: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BigImgSection {
	#[serde(default, rename = "Buffer")]
	buffer: Option<String>,
}
