use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use structopt::StructOpt;

/// connection handling configuration of the node
#[derive(Debug, PartialEq, Eq, Hash, Clone, StructOpt, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// the address to listen on for inbound connections
    #[structopt(long = "listen-address", default_value = "0.0.0.0:1965")]
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,

    /// the hostname this node is known by across the federation
    ///
    /// mail posted for this hostname is delivered straight into local
    /// inboxes; everything else is queued for the named remote node
    #[structopt(long = "hostname", default_value = "localhost")]
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// display name returned by the INFO command
    #[structopt(long = "server-name", default_value = "My twinmail server")]
    #[serde(default = "default_name")]
    pub name: String,

    /// description returned by the INFO command
    #[structopt(
        long = "server-description",
        default_value = "Gentlemen do not read each other's mail"
    )]
    #[serde(default = "default_description")]
    pub description: String,

    /// relay foreign scheme requests to the forward address instead of
    /// rejecting them
    #[structopt(long = "forward-requests")]
    #[serde(default)]
    pub forward_requests: bool,

    /// the secondary endpoint foreign scheme requests are relayed to
    #[structopt(long = "forward-address", default_value = "127.0.0.1:1966")]
    #[serde(default = "default_forward_address")]
    pub forward_address: SocketAddr,
}

fn default_listen_address() -> SocketAddr {
    ([0, 0, 0, 0], 1965).into()
}

fn default_hostname() -> String {
    "localhost".to_owned()
}

fn default_name() -> String {
    "My twinmail server".to_owned()
}

fn default_description() -> String {
    "Gentlemen do not read each other's mail".to_owned()
}

fn default_forward_address() -> SocketAddr {
    ([127, 0, 0, 1], 1966).into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            hostname: default_hostname(),
            name: default_name(),
            description: default_description(),
            forward_requests: false,
            forward_address: default_forward_address(),
        }
    }
}
