use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "guidepost-server", about = "Local guidance bridge server")]
pub struct Cli {
    /// Socket address the bridge listens on.
    #[arg(long, env = "GUIDEPOST_LISTEN_ADDR", default_value = "127.0.0.1:9876")]
    pub listen_addr: String,

    /// Zoom preset pushed to the companion when it connects.
    #[arg(long, env = "GUIDEPOST_ZOOM_FONT_SIZE", default_value = "Medium")]
    pub zoom_font_size: String,

    /// Whether page zoom should be applied at all.
    #[arg(long, env = "GUIDEPOST_ZOOM_ENABLED", default_value_t = false)]
    pub zoom_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub zoom_font_size: String,
    pub zoom_enabled: bool,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        Ok(Self {
            listen_addr,
            zoom_font_size: cli.zoom_font_size,
            zoom_enabled: cli.zoom_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let cli = Cli::parse_from(["guidepost-server"]);
        let config = ServerConfig::try_from(cli).unwrap();
        assert_eq!(config.listen_addr.port(), 9876);
        assert_eq!(config.zoom_font_size, "Medium");
        assert!(!config.zoom_enabled);
    }

    #[test]
    fn rejects_bad_listen_addr() {
        let cli = Cli::parse_from(["guidepost-server", "--listen-addr", "not-an-addr"]);
        assert!(ServerConfig::try_from(cli).is_err());
    }
}
