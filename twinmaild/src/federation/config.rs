use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use structopt::StructOpt;

/// federation sync engine configuration
#[derive(Debug, PartialEq, Eq, Hash, Clone, StructOpt, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// seconds between two sync ticks over the peer ring
    #[structopt(long = "sync-interval", parse(try_from_str = duration_secs))]
    #[serde(default = "default_sync_interval")]
    pub sync_interval: Duration,

    /// seconds after which a slow or unreachable peer is abandoned for the
    /// current tick
    ///
    /// the peer is retried naturally on the next tick; the archive existence
    /// check makes the retry safe
    #[structopt(long = "peer-timeout", parse(try_from_str = duration_secs))]
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout: Duration,

    /// the port used to reach peers that do not carry an explicit `host:port`
    #[structopt(long = "peer-port", default_value = "1965")]
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,

    /// how many mails may queue up for one destination before the next
    /// push hint is sent its way
    #[structopt(long = "push-hint-batch", default_value = "5")]
    #[serde(default = "default_push_hint_batch")]
    pub push_hint_batch: usize,
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_peer_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_peer_port() -> u16 {
    twinmail_proto::DEFAULT_PORT
}

fn default_push_hint_batch() -> usize {
    5
}

fn duration_secs(s: &str) -> Result<Duration> {
    let i: u64 = s
        .parse()
        .context("expecting to parse a duration in seconds")?;
    Ok(Duration::from_secs(i))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_interval: default_sync_interval(),
            peer_timeout: default_peer_timeout(),
            peer_port: default_peer_port(),
            push_hint_batch: default_push_hint_batch(),
        }
    }
}
