//! Command line and environment configuration

use std::net::IpAddr;
use std::time::Duration;

use accessory_host::{PairingPin, ServerConfig};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use volume_sync::{SyncConfig, VolumeBackend};

/// Expose the desktop volume as a smart-home speaker accessory
///
/// The accessory is a dimmable light whose brightness is the volume. Moving
/// the desktop slider updates the accessory; dimming the accessory from a
/// controller changes the desktop volume.
#[derive(Parser, Debug)]
#[command(name = "speaker-bridge", version)]
pub struct Args {
    /// Setup code controllers enter to pair (XXX-XX-XXX or 8 digits)
    #[arg(long, env = "SPEAKER_BRIDGE_PIN", default_value = "123-41-234")]
    pub pin: PairingPin,

    /// First port to try for the accessory host
    #[arg(long, env = "SPEAKER_BRIDGE_PORT_START", default_value = "51826")]
    pub port_start: u16,

    /// Last port to try for the accessory host
    #[arg(long, env = "SPEAKER_BRIDGE_PORT_END", default_value = "51926")]
    pub port_end: u16,

    /// Address to listen on
    #[arg(long, env = "SPEAKER_BRIDGE_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// How often to sample the desktop volume, in milliseconds
    #[arg(long, env = "SPEAKER_BRIDGE_POLL_INTERVAL_MS", default_value = "500")]
    pub poll_interval_ms: u64,

    /// Accessory name; defaults to "<user>'s macbook speaker volume"
    #[arg(long, env = "SPEAKER_BRIDGE_NAME")]
    pub name: Option<String>,

    /// Mixer tool to drive (wpctl or osascript); defaults by platform
    #[arg(long, env = "SPEAKER_BRIDGE_BACKEND")]
    pub backend: Option<VolumeBackend>,
}

/// Validated configuration for one run
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub accessory_name: Option<String>,
    pub backend: VolumeBackend,
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        let server = ServerConfig::new()
            .with_pin(args.pin)
            .with_bind_addr(args.bind)
            .with_port_range(args.port_start, args.port_end);
        server.validate().context("Invalid accessory host settings")?;

        let sync =
            SyncConfig::new().with_poll_interval(Duration::from_millis(args.poll_interval_ms));
        sync.validate().context("Invalid sync settings")?;

        let accessory_name = match args.name.map(|name| name.trim().to_string()) {
            Some(name) if name.is_empty() => anyhow::bail!("Accessory name must not be empty"),
            other => other,
        };

        Ok(Self {
            server,
            sync,
            accessory_name,
            backend: args.backend.unwrap_or_default(),
        })
    }
}

impl Config {
    /// Parse the command line, falling back to environment variables
    pub fn from_env() -> Result<Self> {
        Self::try_from(Args::parse())
    }

    pub fn log_summary(&self) {
        info!(
            bind = %self.server.bind_addr,
            ports = ?self.server.port_range,
            poll_interval = ?self.sync.poll_interval,
            backend = %self.backend,
            "Configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Result<Config> {
        let args = Args::try_parse_from(std::iter::once("speaker-bridge").chain(args.iter().copied()))?;
        Config::try_from(args)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.server.port_range, (51826, 51926));
        assert_eq!(config.server.pin.to_string(), "123-41-234");
        assert!(config.server.bind_addr.is_unspecified());
        assert_eq!(config.sync.poll_interval, Duration::from_millis(500));
        assert_eq!(config.accessory_name, None);
        assert_eq!(config.backend, VolumeBackend::default());
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--pin",
            "03145154",
            "--port-start",
            "6000",
            "--port-end",
            "6010",
            "--bind",
            "127.0.0.1",
            "--poll-interval-ms",
            "250",
            "--name",
            "Office speaker",
            "--backend",
            "osascript",
        ])
        .unwrap();

        assert_eq!(config.server.pin.to_string(), "031-45-154");
        assert_eq!(config.server.port_range, (6000, 6010));
        assert!(config.server.bind_addr.is_loopback());
        assert_eq!(config.sync.poll_interval, Duration::from_millis(250));
        assert_eq!(config.accessory_name.as_deref(), Some("Office speaker"));
        assert_eq!(config.backend, VolumeBackend::Osascript);
    }

    #[rstest]
    #[case(&["--pin", "12345678"])]
    #[case(&["--pin", "1234"])]
    #[case(&["--port-start", "7000", "--port-end", "6000"])]
    #[case(&["--poll-interval-ms", "0"])]
    #[case(&["--name", "   "])]
    #[case(&["--backend", "alsa"])]
    fn test_rejects_invalid(#[case] args: &[&str]) {
        assert!(parse(args).is_err());
    }
}
