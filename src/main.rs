//! Headless Bioband runner.
//!
//! Scans for the configured device, connects to the strongest match and logs
//! every channel until interrupted.
//!
//! ```bash
//! bioband-link                                # ./bioband_config.json, Bioband preset
//! bioband-link my_config.json --log-level debug
//! bioband-link --preset adc-dongle
//! ```

use std::path::PathBuf;

use anyhow::Result;
use bioband_link_lib::config::{AppConfig, ConnectionConfig, CONFIG_FILE_NAME};
use bioband_link_lib::core::{ChannelEvent, ChannelTag, ConnectionState};
use bioband_link_lib::{logging, state::AppState};
use clap::{Parser, ValueEnum};
use log::{error, info, warn, Level};

/// BLE session manager and biosignal stream decoder for the Bioband wearable
#[derive(Parser, Debug)]
#[command(name = "bioband-link")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path of the JSON config file
    #[arg(default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Replace the configured connection settings with a device preset
    #[arg(short, long, value_enum)]
    preset: Option<Preset>,

    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Preset {
    Bioband,
    AdcDongle,
}

impl Preset {
    fn connection(self) -> ConnectionConfig {
        match self {
            Preset::Bioband => ConnectionConfig::bioband(),
            Preset::AdcDongle => ConnectionConfig::adc_dongle(),
        }
    }
}

fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::Trace),
        "debug" => Some(Level::Debug),
        "info" => Some(Level::Info),
        "warn" => Some(Level::Warn),
        "error" => Some(Level::Error),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = parse_level(&cli.log_level);
    logging::init(level.unwrap_or(Level::Info));
    if level.is_none() {
        warn!("Unknown log level {:?}, using info.", cli.log_level);
    }

    let mut config = AppConfig::load_config(&cli.config).await?;
    if let Some(preset) = cli.preset {
        info!("Using {:?} connection preset.", preset);
        config.connection = preset.connection();
    }

    let app_state = AppState::new(config).await?;
    let manager = app_state.bluetooth_manager();

    for channel in ChannelTag::PREFIXED.into_iter().chain([ChannelTag::RawAdc]) {
        manager.subscribe(channel, |channel: ChannelTag, event: &ChannelEvent| match event {
            ChannelEvent::Sample(sample) => info!("{}: {}", channel, sample),
            ChannelEvent::Analysis(analysis) => info!("{} analysis: {:?}", channel, analysis.metrics),
        });
    }

    manager.start_scan(None)?;
    let mut state_rx = manager.watch_state();
    let mut devices_rx = manager.watch_devices();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down.");
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                info!("Connection state: {}", state);
                if let ConnectionState::Error(e) = state {
                    error!("Session failed: {}. Scanning again.", e);
                    manager.reset()?;
                    manager.start_scan(None)?;
                }
            }
            changed = devices_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let strongest = devices_rx.borrow_and_update().first().cloned();
                if let Some(device) = strongest {
                    if manager.connection_state() == ConnectionState::Scanning {
                        info!("Connecting to {} ({})", device.name, device.address);
                        if let Err(e) = manager.connect(device.address) {
                            error!("Connect request failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    app_state.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_the_config_file_and_info() {
        let cli = Cli::try_parse_from(["bioband-link"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE_NAME));
        assert_eq!(cli.preset, None);
        assert_eq!(parse_level(&cli.log_level), Some(Level::Info));
    }

    #[test]
    fn preset_and_level_flags() {
        let cli = Cli::try_parse_from([
            "bioband-link",
            "lab.json",
            "--preset",
            "adc-dongle",
            "-l",
            "DEBUG",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("lab.json"));
        assert_eq!(cli.preset, Some(Preset::AdcDongle));
        assert_eq!(cli.preset.unwrap().connection(), ConnectionConfig::adc_dongle());
        assert_eq!(parse_level(&cli.log_level), Some(Level::Debug));
        assert!(Cli::try_parse_from(["bioband-link", "--preset", "gearvr"]).is_err());
    }
}
