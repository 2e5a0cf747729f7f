//! Bridge configuration.
//!
//! The CLI is the sole configuration surface — there is no TOML or
//! environment-variable layer. Flags are parsed once at startup into a
//! single explicit [`BridgeConfig`].

use std::path::PathBuf;

use clap::Parser;

/// Bridge between a Marlin-speaking touchscreen and a Klipper/Moonraker backend.
#[derive(Debug, Parser)]
#[command(name = "bridge", version, about)]
pub struct Cli {
    /// Serial device the touchscreen is attached to.
    #[arg(short = 'p', long = "serial-port", default_value = "/dev/ttyS2")]
    pub serial_port: PathBuf,

    /// Serial baud rate.
    #[arg(short = 'b', long = "baud-rate", default_value_t = 115_200)]
    pub baud_rate: u32,

    /// Moonraker WebSocket URL.
    #[arg(
        short = 'w',
        long = "websocket-url",
        default_value = "ws://127.0.0.1:7125/websocket"
    )]
    pub websocket_url: String,

    /// Write logs to this file instead of stdout.
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Reject serial lines with no trailing `*cc` checksum.
    #[arg(long = "require-checksum")]
    pub require_checksum: bool,
}

/// Resolved, typed bridge configuration. Constructed once at startup from
/// [`Cli`]; nothing downstream touches `clap` or raw argv again.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub serial_port: PathBuf,
    pub baud_rate: u32,
    pub websocket_url: String,
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
    pub require_checksum: bool,
}

impl From<Cli> for BridgeConfig {
    fn from(cli: Cli) -> Self {
        BridgeConfig {
            serial_port: cli.serial_port,
            baud_rate: cli.baud_rate,
            websocket_url: cli.websocket_url,
            log_file: cli.log_file,
            verbose: cli.verbose,
            require_checksum: cli.require_checksum,
        }
    }
}

impl BridgeConfig {
    pub fn from_args() -> Self {
        Cli::parse().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_spec() {
        let cli = Cli::parse_from(["bridge"]);
        let cfg: BridgeConfig = cli.into();
        assert_eq!(cfg.serial_port, PathBuf::from("/dev/ttyS2"));
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.websocket_url, "ws://127.0.0.1:7125/websocket");
        assert!(cfg.log_file.is_none());
        assert!(!cfg.verbose);
        assert!(!cfg.require_checksum);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "bridge",
            "-p",
            "/dev/ttyUSB0",
            "-b",
            "250000",
            "-w",
            "ws://printer.local:7125/websocket",
            "-v",
            "--require-checksum",
        ]);
        let cfg: BridgeConfig = cli.into();
        assert_eq!(cfg.serial_port, PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(cfg.baud_rate, 250_000);
        assert_eq!(cfg.websocket_url, "ws://printer.local:7125/websocket");
        assert!(cfg.verbose);
        assert!(cfg.require_checksum);
    }
}
