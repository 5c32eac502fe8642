#![forbid(unsafe_code)]

use wxpad_domain::{FilterConfig, GroupPolicy};

use super::NormalizedMessage;

/// Classification decision for one decoded frame.
///
/// Returns whether the frame is explicitly deliverable under `cfg`. The
/// catch-all `other` scene is handled by the caller: it emits the raw frame
/// even when this returns false, and never enriches it.
pub fn should_deliver(msg: &NormalizedMessage, cfg: &FilterConfig) -> bool {
	if !cfg.scene.delivers(msg.kind()) {
		return false;
	}

	if !msg.is_group_message() {
		return true;
	}

	let deliver = match cfg.group_policy {
		GroupPolicy::All => true,
		GroupPolicy::None => false,
		GroupPolicy::Mention => msg
			.mention_list()
			.iter()
			.any(|m| m == cfg.bot_user_name.as_str()),
	};

	if !deliver {
		return false;
	}

	match msg.from_user_name.as_deref() {
		Some(origin) => cfg.whitelist_allows(origin),
		None => false,
	}
}
