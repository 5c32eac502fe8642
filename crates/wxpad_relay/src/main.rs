#![forbid(unsafe_code)]

mod config;

use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wxpad_gateway::sync::trigger::SyncTrigger;
use wxpad_gateway::{TriggerControl, TriggerEvent, bounded_trigger_channels};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: wxpad_relay [--config path]\n\
\n\
Options:\n\
\t--config  Config file path (default: ~/.wxpad/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,wxpad_relay=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let config_path = match parse_args() {
		Some(path) => path,
		None => config::default_config_path()?,
	};

	let relay_cfg = config::load_relay_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded relay config (toml + env overrides)");

	init_metrics(relay_cfg.metrics_bind.as_deref());

	let trigger_cfg = relay_cfg.into_trigger_config()?;
	let (control_tx, control_rx, events_tx, mut events_rx) = bounded_trigger_channels(4, 256);

	let trigger = SyncTrigger::new(trigger_cfg);
	let trigger_task = tokio::spawn(trigger.run(control_rx, events_tx));

	let mut shutdown_sent = false;
	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c(), if !shutdown_sent => {
				info!("ctrl-c received; disposing trigger");
				shutdown_sent = true;
				let _ = control_tx.send(TriggerControl::Shutdown).await;
			}

			ev = events_rx.recv() => {
				match ev {
					Some(TriggerEvent::Message(msg)) => match serde_json::to_string(&msg) {
						// One normalized event per line, straight to the
						// downstream consumer.
						Ok(line) => println!("{line}"),
						Err(e) => warn!(error = %e, "failed to serialize message event"),
					},
					Some(TriggerEvent::Status(s)) => match s.last_error {
						Some(err) => warn!(state = %s.state, error = %err, "{}", s.detail),
						None => info!(state = %s.state, "{}", s.detail),
					},
					None => break,
				}
			}
		}
	}

	match trigger_task.await {
		Ok(Ok(())) => info!("trigger stopped"),
		Ok(Err(e)) => return Err(e),
		Err(e) => return Err(e.into()),
	}

	Ok(())
}
