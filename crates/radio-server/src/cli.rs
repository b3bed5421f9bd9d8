use std::path::PathBuf;

use clap::Parser;

use crate::config::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "radio-server", version = radio_proto::VERSION)]
pub struct Args {
    /// Optional server config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port to try, in order of preference (repeatable; replaces configured ports)
    #[arg(long = "port")]
    pub ports: Vec<u16>,

    /// Interface to bind, e.g. 0.0.0.0
    #[arg(long)]
    pub bind_host: Option<String>,

    /// Playlist descriptor JSON loaded before the broadcast starts
    #[arg(long)]
    pub playlist: Option<PathBuf>,

    /// File holding the TADD ingestion secret
    #[arg(long)]
    pub auth_key_file: Option<PathBuf>,
}

impl Args {
    /// Layer command-line values over a loaded config.
    pub fn apply(&self, mut cfg: ServerConfig) -> ServerConfig {
        if !self.ports.is_empty() {
            cfg.ports = Some(self.ports.clone());
        }
        if let Some(host) = self.bind_host.as_ref() {
            cfg.bind_host = Some(host.clone());
        }
        if let Some(path) = self.playlist.as_ref() {
            cfg.playlist = Some(path.display().to_string());
        }
        if let Some(path) = self.auth_key_file.as_ref() {
            cfg.auth_key = None;
            cfg.auth_key_file = Some(path.display().to_string());
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_ports_keep_order() {
        let args = Args::parse_from(["radio-server", "--port", "9000", "--port", "8000"]);
        assert_eq!(args.ports, vec![9000, 8000]);
    }

    #[test]
    fn cli_values_override_config() {
        let args = Args::parse_from([
            "radio-server",
            "--port",
            "7000",
            "--auth-key-file",
            "/etc/radio/key",
        ]);
        let cfg = args.apply(ServerConfig {
            ports: Some(vec![1, 2]),
            auth_key: Some("inline".to_string()),
            ..ServerConfig::default()
        });
        assert_eq!(cfg.ports, Some(vec![7000]));
        assert_eq!(cfg.auth_key, None);
        assert_eq!(cfg.auth_key_file.as_deref(), Some("/etc/radio/key"));
    }

    #[test]
    fn absent_flags_leave_config_untouched() {
        let args = Args::parse_from(["radio-server"]);
        let cfg = args.apply(ServerConfig {
            ports: Some(vec![1, 2]),
            ..ServerConfig::default()
        });
        assert_eq!(cfg.ports, Some(vec![1, 2]));
        assert!(cfg.playlist.is_none());
    }
}
