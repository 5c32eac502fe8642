#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Suffix that marks an address as a group (multi-party) chat.
pub const GROUP_SUFFIX: &str = "@chatroom";

/// Errors for parsing identifiers and config values from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown scene: {0}")]
	UnknownScene(String),
	#[error("unknown group policy: {0}")]
	UnknownGroupPolicy(String),
}

/// A gateway account or chat address (e.g. `wxid_abc` or `123456@chatroom`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WxId(String);

impl WxId {
	/// Create a non-empty `WxId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}

	/// Whether this address denotes a group chat rather than a direct peer.
	pub fn is_group(&self) -> bool {
		self.0.contains(GROUP_SUFFIX)
	}
}

impl fmt::Display for WxId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for WxId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		WxId::new(s.to_string())
	}
}

/// Whether a raw address string denotes a group context.
pub fn is_group_address(addr: &str) -> bool {
	addr.contains(GROUP_SUFFIX)
}

/// Closed set of gateway message-type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgKind {
	Text,
	Image,
	Voice,
	EmojiOrVideo,
	Other(i64),
}

impl MsgKind {
	/// Map the wire discriminant onto the closed variant set.
	pub const fn from_code(code: i64) -> Self {
		match code {
			1 => MsgKind::Text,
			3 => MsgKind::Image,
			34 => MsgKind::Voice,
			47 => MsgKind::EmojiOrVideo,
			other => MsgKind::Other(other),
		}
	}

	/// The wire discriminant for this kind.
	pub const fn code(self) -> i64 {
		match self {
			MsgKind::Text => 1,
			MsgKind::Image => 3,
			MsgKind::Voice => 34,
			MsgKind::EmojiOrVideo => 47,
			MsgKind::Other(code) => code,
		}
	}
}

impl fmt::Display for MsgKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MsgKind::Text => f.write_str("text"),
			MsgKind::Image => f.write_str("image"),
			MsgKind::Voice => f.write_str("voice"),
			MsgKind::EmojiOrVideo => f.write_str("emoji_or_video"),
			MsgKind::Other(code) => write!(f, "other({code})"),
		}
	}
}

/// Operator-selected category of messages to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
	Text,
	Image,
	Voice,
	Emoji,
	Video,
	/// Catch-all: every frame is surfaced raw, without enrichment.
	Other,
}

impl Scene {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			Scene::Text => "text",
			Scene::Image => "image",
			Scene::Voice => "voice",
			Scene::Emoji => "emoji",
			Scene::Video => "video",
			Scene::Other => "other",
		}
	}

	/// Whether this scene's deliverable set contains `kind`.
	///
	/// `Other` has an empty deliverable set; its catch-all behavior lives in
	/// the filter, not here.
	pub const fn delivers(self, kind: MsgKind) -> bool {
		matches!(
			(self, kind),
			(Scene::Text, MsgKind::Text)
				| (Scene::Image, MsgKind::Image)
				| (Scene::Voice, MsgKind::Voice)
				| (Scene::Emoji, MsgKind::EmojiOrVideo)
				| (Scene::Video, MsgKind::EmojiOrVideo)
		)
	}
}

impl fmt::Display for Scene {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Scene {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"text" => Ok(Scene::Text),
			"image" => Ok(Scene::Image),
			"voice" => Ok(Scene::Voice),
			"emoji" => Ok(Scene::Emoji),
			"video" => Ok(Scene::Video),
			"other" => Ok(Scene::Other),
			other => Err(ParseIdError::UnknownScene(other.to_string())),
		}
	}
}

/// How group-chat messages are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
	/// Admit every group message.
	All,
	/// Admit only messages whose mention list contains the bot address.
	Mention,
	/// Admit no group messages.
	None,
}

impl GroupPolicy {
	pub const fn as_str(self) -> &'static str {
		match self {
			GroupPolicy::All => "all",
			GroupPolicy::Mention => "mention",
			GroupPolicy::None => "none",
		}
	}
}

impl fmt::Display for GroupPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for GroupPolicy {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"all" => Ok(GroupPolicy::All),
			"mention" => Ok(GroupPolicy::Mention),
			"none" => Ok(GroupPolicy::None),
			other => Err(ParseIdError::UnknownGroupPolicy(other.to_string())),
		}
	}
}

/// Operator-supplied delivery rules, read-only for the trigger's lifetime.
#[derive(Debug, Clone)]
pub struct FilterConfig {
	pub scene: Scene,
	pub group_policy: GroupPolicy,
	/// The account the trigger runs as; mention target for `GroupPolicy::Mention`.
	pub bot_user_name: WxId,
	/// Group origins permitted to trigger delivery; empty = no restriction.
	pub group_whitelist: Vec<WxId>,
}

impl FilterConfig {
	pub fn new(scene: Scene, group_policy: GroupPolicy, bot_user_name: WxId) -> Self {
		Self {
			scene,
			group_policy,
			bot_user_name,
			group_whitelist: Vec::new(),
		}
	}

	/// Whether the whitelist admits `origin` (empty list admits everything).
	pub fn whitelist_allows(&self, origin: &str) -> bool {
		self.group_whitelist.is_empty() || self.group_whitelist.iter().any(|w| w.as_str() == origin)
	}
}
