use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

use crate::{
    hub::{DEFAULT_OUTBOUND_CAPACITY, HubConfig, PresenceDelivery},
    server::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_WRITE_BUFFER_SIZE, ServerConfig, UpgradeConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the chat server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Directory containing the `js/` and `static/` assets served to browsers.
    #[arg(long, default_value = "web")]
    pub web_root: PathBuf,

    /// Messages buffered per client before a broadcast drops it as too slow.
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,

    /// Whether online-user updates wait for slow clients or drop them.
    #[arg(long, value_enum, default_value_t = PresenceDelivery::Blocking)]
    pub presence_delivery: PresenceDelivery,

    /// Origin allowed to open a websocket. Repeat for several; omit to allow any.
    #[arg(long = "allowed-origin")]
    pub allowed_origins: Vec<String>,

    /// Largest websocket message accepted from a client, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Websocket write buffer size, in bytes.
    #[arg(long, default_value_t = DEFAULT_WRITE_BUFFER_SIZE)]
    pub write_buffer_size: usize,
}

impl Cli {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            hub: HubConfig {
                outbound_capacity: self.outbound_capacity,
                presence_delivery: self.presence_delivery,
            },
            upgrade: UpgradeConfig {
                allowed_origins: self.allowed_origins.clone(),
                write_buffer_size: self.write_buffer_size,
                max_message_size: self.max_message_size,
            },
            web_root: self.web_root.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_deployment() {
        let cli = Cli::try_parse_from(["ice_chat"]).expect("defaults parse");
        assert_eq!(cli.listen, "0.0.0.0:8080".parse().expect("addr"));

        let config = cli.server_config();
        assert_eq!(config.hub.presence_delivery, PresenceDelivery::Blocking);
        assert!(config.upgrade.allowed_origins.is_empty());
        assert_eq!(config.upgrade.write_buffer_size, 1024);
    }

    #[test]
    fn flags_populate_server_config() {
        let cli = Cli::try_parse_from([
            "ice_chat",
            "--listen",
            "127.0.0.1:0",
            "--presence-delivery",
            "drop-saturated",
            "--outbound-capacity",
            "4",
            "--allowed-origin",
            "http://a.example",
            "--allowed-origin",
            "http://b.example",
        ])
        .expect("flags parse");

        let config = cli.server_config();
        assert_eq!(config.hub.outbound_capacity, 4);
        assert_eq!(config.hub.presence_delivery, PresenceDelivery::DropSaturated);
        assert_eq!(
            config.upgrade.allowed_origins,
            vec!["http://a.example", "http://b.example"]
        );
    }
}
