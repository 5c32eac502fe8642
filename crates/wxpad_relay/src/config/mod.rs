#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::{info, warn};
use wxpad_domain::{FilterConfig, GroupPolicy, Scene, WxId};
use wxpad_gateway::SecretString;
use wxpad_gateway::sync::trigger::TriggerConfig;

/// Default config path: `~/.wxpad/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".wxpad").join("config.toml"))
}

/// Load the relay config from TOML and env overrides.
pub fn load_relay_config_from_path(path: &Path) -> anyhow::Result<RelayConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = RelayConfig::from_file(file_cfg)?;

	apply_env_overrides(&mut cfg)?;

	Ok(cfg)
}

/// Relay config (v1).
#[derive(Debug, Clone)]
pub struct RelayConfig {
	/// Gateway base URL (http(s) host the sync stream and commands hang off).
	pub base_url: Option<String>,
	/// Gateway auth key.
	pub auth_key: Option<SecretString>,
	/// The account the trigger runs as; mention target for group filtering.
	pub bot_user_name: Option<String>,
	pub scene: Scene,
	pub group_policy: GroupPolicy,
	pub group_whitelist: Vec<String>,
	pub heartbeat_interval: Duration,
	pub reconnect_delay: Duration,
	/// Optional Prometheus exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			base_url: None,
			auth_key: None,
			bot_user_name: None,
			scene: Scene::Text,
			group_policy: GroupPolicy::All,
			group_whitelist: Vec::new(),
			heartbeat_interval: Duration::from_secs(30),
			reconnect_delay: Duration::from_secs(5),
			metrics_bind: None,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	base_url: Option<String>,
	auth_key: Option<String>,
	bot_user_name: Option<String>,
	scene: Option<String>,
	group_policy: Option<String>,

	#[serde(default)]
	group_whitelist: Vec<String>,

	#[serde(default)]
	trigger: FileTriggerSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTriggerSettings {
	heartbeat_interval_secs: Option<u64>,
	reconnect_delay_secs: Option<u64>,
	metrics_bind: Option<String>,
}

impl RelayConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let defaults = RelayConfig::default();

		let scene = match file.scene.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
			Some(s) => s.parse::<Scene>().context("parse scene from config")?,
			None => defaults.scene,
		};

		let group_policy = match file.group_policy.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
			Some(s) => s.parse::<GroupPolicy>().context("parse group_policy from config")?,
			None => defaults.group_policy,
		};

		Ok(Self {
			base_url: file.base_url.filter(|s| !s.trim().is_empty()),
			auth_key: file.auth_key.filter(|s| !s.trim().is_empty()).map(SecretString::new),
			bot_user_name: file.bot_user_name.filter(|s| !s.trim().is_empty()),
			scene,
			group_policy,
			group_whitelist: file
				.group_whitelist
				.into_iter()
				.map(|s| s.trim().to_string())
				.filter(|s| !s.is_empty())
				.collect(),
			heartbeat_interval: file
				.trigger
				.heartbeat_interval_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.heartbeat_interval),
			reconnect_delay: file
				.trigger
				.reconnect_delay_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.reconnect_delay),
			metrics_bind: file.trigger.metrics_bind.filter(|s| !s.trim().is_empty()),
		})
	}

	/// Assemble the trigger config; missing required fields are errors here,
	/// not at connect time.
	pub fn into_trigger_config(self) -> anyhow::Result<TriggerConfig> {
		let base_url = self
			.base_url
			.ok_or_else(|| anyhow!("base_url is required (config file or WXPAD_BASE_URL)"))?;
		let auth_key = self
			.auth_key
			.ok_or_else(|| anyhow!("auth_key is required (config file or WXPAD_AUTH_KEY)"))?;
		let bot_user_name = self
			.bot_user_name
			.ok_or_else(|| anyhow!("bot_user_name is required (config file or WXPAD_BOT_USER_NAME)"))?;

		let bot = WxId::new(bot_user_name).context("parse bot_user_name")?;
		let mut filter = FilterConfig::new(self.scene, self.group_policy, bot);
		for entry in self.group_whitelist {
			match WxId::new(entry) {
				Ok(id) => filter.group_whitelist.push(id),
				Err(e) => warn!(error = %e, "skipping invalid group_whitelist entry"),
			}
		}

		let mut cfg = TriggerConfig::new(base_url, auth_key, filter);
		cfg.heartbeat_interval = self.heartbeat_interval;
		cfg.reconnect_delay = self.reconnect_delay;
		Ok(cfg)
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut RelayConfig) -> anyhow::Result<()> {
	if let Ok(v) = std::env::var("WXPAD_BASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.base_url = Some(v);
			info!("relay config: base_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("WXPAD_AUTH_KEY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.auth_key = Some(SecretString::new(v));
			info!("relay config: auth_key overridden by env");
		}
	}

	if let Ok(v) = std::env::var("WXPAD_BOT_USER_NAME") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.bot_user_name = Some(v);
			info!("relay config: bot_user_name overridden by env");
		}
	}

	if let Ok(v) = std::env::var("WXPAD_SCENE") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.scene = v.parse::<Scene>().context("parse WXPAD_SCENE")?;
			info!(scene = %cfg.scene, "relay config: scene overridden by env");
		}
	}

	if let Ok(v) = std::env::var("WXPAD_GROUP_POLICY") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.group_policy = v.parse::<GroupPolicy>().context("parse WXPAD_GROUP_POLICY")?;
			info!(policy = %cfg.group_policy, "relay config: group_policy overridden by env");
		}
	}

	if let Ok(v) = std::env::var("WXPAD_GROUP_WHITELIST") {
		let entries: Vec<String> = v
			.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_string)
			.collect();
		if !entries.is_empty() {
			cfg.group_whitelist = entries;
			info!(
				count = cfg.group_whitelist.len(),
				"relay config: group_whitelist overridden by env"
			);
		}
	}

	if let Ok(v) = std::env::var("WXPAD_HEARTBEAT_INTERVAL_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.heartbeat_interval = Duration::from_secs(secs);
		info!(secs, "relay config: heartbeat_interval overridden by env");
	}

	if let Ok(v) = std::env::var("WXPAD_RECONNECT_DELAY_SECS")
		&& let Ok(secs) = v.trim().parse::<u64>()
	{
		cfg.reconnect_delay = Duration::from_secs(secs);
		info!(secs, "relay config: reconnect_delay overridden by env");
	}

	if let Ok(v) = std::env::var("WXPAD_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.metrics_bind = Some(v);
			info!("relay config: metrics_bind overridden by env");
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_config_maps_onto_relay_config() {
		let file: FileConfig = toml::from_str(
			r#"
			base_url = "https://pad.example.com"
			auth_key = "k-123"
			bot_user_name = "wxid_bot"
			scene = "voice"
			group_policy = "mention"
			group_whitelist = ["1@chatroom", " 2@chatroom ", ""]

			[trigger]
			heartbeat_interval_secs = 15
			reconnect_delay_secs = 2
			metrics_bind = "127.0.0.1:9301"
			"#,
		)
		.expect("parse toml");

		let cfg = RelayConfig::from_file(file).expect("map config");
		assert_eq!(cfg.base_url.as_deref(), Some("https://pad.example.com"));
		assert_eq!(cfg.scene, Scene::Voice);
		assert_eq!(cfg.group_policy, GroupPolicy::Mention);
		assert_eq!(cfg.group_whitelist, vec!["1@chatroom".to_string(), "2@chatroom".to_string()]);
		assert_eq!(cfg.heartbeat_interval, Duration::from_secs(15));
		assert_eq!(cfg.reconnect_delay, Duration::from_secs(2));
		assert_eq!(cfg.metrics_bind.as_deref(), Some("127.0.0.1:9301"));
	}

	#[test]
	fn empty_file_yields_defaults() {
		let cfg = RelayConfig::from_file(FileConfig::default()).expect("map config");
		assert_eq!(cfg.scene, Scene::Text);
		assert_eq!(cfg.group_policy, GroupPolicy::All);
		assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
		assert_eq!(cfg.reconnect_delay, Duration::from_secs(5));
		assert!(cfg.base_url.is_none());
	}

	#[test]
	fn unknown_scene_is_an_error() {
		let file: FileConfig = toml::from_str(r#"scene = "everything""#).expect("parse toml");
		assert!(RelayConfig::from_file(file).is_err());
	}

	#[test]
	fn trigger_config_requires_credentials() {
		let cfg = RelayConfig::default();
		assert!(cfg.into_trigger_config().is_err());

		let cfg = RelayConfig {
			base_url: Some("https://pad.example.com".to_string()),
			auth_key: Some(SecretString::new("k")),
			bot_user_name: Some("wxid_bot".to_string()),
			..RelayConfig::default()
		};

		let trigger = cfg.into_trigger_config().expect("trigger config");
		assert_eq!(trigger.heartbeat_interval, Duration::from_secs(30));
		assert_eq!(trigger.filter.scene, Scene::Text);
	}
}
