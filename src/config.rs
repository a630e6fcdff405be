//! Node Configuration
//!
//! All tunables consumed by the subsystems live here: listen addresses for the
//! three sockets (gossip UDP, RPC TCP, HTTP), seed peers, storage paths and
//! eviction watermarks, replication factor, and the gossip/forwarding timing
//! knobs. Parsed from command-line flags; everything except `--bind` has a
//! default.

use anyhow::{Result, bail};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REPLICATION_FACTOR: usize = 2;
pub const DEFAULT_HIGH_WATERMARK: u64 = 10 * 1024 * 1024 * 1024;
pub const DEFAULT_LOW_WATERMARK: u64 = 8 * 1024 * 1024 * 1024;
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DEAD_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_REPLICATE_ATTEMPTS: usize = 3;
pub const DEFAULT_MAX_FORWARD_HOPS: u32 = 2;

/// Offsets applied to the gossip port when `--rpc` / `--http` are not given.
const RPC_PORT_OFFSET: u16 = 500;
const HTTP_PORT_OFFSET: u16 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    /// UDP address the gossip socket binds to. Doubles as the node identity
    /// advertised to seed peers.
    pub gossip_addr: SocketAddr,
    /// TCP address for the streaming binary protocol (clients and peers).
    pub rpc_addr: SocketAddr,
    /// TCP address for the HTTP adapter.
    pub http_addr: SocketAddr,
    /// Gossip addresses of existing cluster members to join through.
    pub seed_nodes: Vec<SocketAddr>,
    /// Root directory for the blob store.
    pub data_dir: PathBuf,
    /// Number of nodes that should hold a copy of each key.
    pub replication_factor: usize,
    /// Occupied bytes above which an eviction pass starts.
    pub high_watermark: u64,
    /// Occupied bytes an eviction pass drives occupancy down to.
    pub low_watermark: u64,
    pub eviction_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Silence after which an alive member becomes suspect.
    pub suspect_timeout: Duration,
    /// Further silence after which a suspect member is declared dead.
    pub dead_timeout: Duration,
    /// Per-attempt deadline on forwarded peer operations.
    pub forward_timeout: Duration,
    /// Retry budget for background replication pushes.
    pub replicate_attempts: usize,
    /// Bound on inter-node forwarding chains while views diverge.
    pub max_forward_hops: u32,
}

impl Config {
    /// Defaults for a node gossiping on `gossip_addr`. The RPC and HTTP
    /// listeners land on fixed port offsets unless overridden.
    pub fn for_bind(gossip_addr: SocketAddr) -> Self {
        let rpc_addr = SocketAddr::new(
            gossip_addr.ip(),
            gossip_addr.port().wrapping_add(RPC_PORT_OFFSET),
        );
        let http_addr = SocketAddr::new(
            gossip_addr.ip(),
            gossip_addr.port().wrapping_add(HTTP_PORT_OFFSET),
        );

        Self {
            gossip_addr,
            rpc_addr,
            http_addr,
            seed_nodes: vec![],
            data_dir: PathBuf::from("./buildcache-data"),
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            low_watermark: DEFAULT_LOW_WATERMARK,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            suspect_timeout: DEFAULT_SUSPECT_TIMEOUT,
            dead_timeout: DEFAULT_DEAD_TIMEOUT,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            replicate_attempts: DEFAULT_REPLICATE_ATTEMPTS,
            max_forward_hops: DEFAULT_MAX_FORWARD_HOPS,
        }
    }

    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut bind_addr: Option<SocketAddr> = None;
        let mut rpc_addr: Option<SocketAddr> = None;
        let mut http_addr: Option<SocketAddr> = None;
        let mut seed_nodes: Vec<SocketAddr> = vec![];
        let mut data_dir: Option<PathBuf> = None;
        let mut replication_factor: Option<usize> = None;
        let mut high_watermark: Option<u64> = None;
        let mut low_watermark: Option<u64> = None;
        let mut heartbeat_ms: Option<u64> = None;
        let mut suspect_ms: Option<u64> = None;
        let mut dead_ms: Option<u64> = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--bind" => {
                    bind_addr = Some(Self::value(args, i, "--bind")?.parse()?);
                    i += 2;
                }
                "--rpc" => {
                    rpc_addr = Some(Self::value(args, i, "--rpc")?.parse()?);
                    i += 2;
                }
                "--http" => {
                    http_addr = Some(Self::value(args, i, "--http")?.parse()?);
                    i += 2;
                }
                "--seed" => {
                    seed_nodes.push(Self::value(args, i, "--seed")?.parse()?);
                    i += 2;
                }
                "--data-dir" => {
                    data_dir = Some(PathBuf::from(Self::value(args, i, "--data-dir")?));
                    i += 2;
                }
                "--replicas" => {
                    replication_factor = Some(Self::value(args, i, "--replicas")?.parse()?);
                    i += 2;
                }
                "--high-watermark" => {
                    high_watermark = Some(Self::value(args, i, "--high-watermark")?.parse()?);
                    i += 2;
                }
                "--low-watermark" => {
                    low_watermark = Some(Self::value(args, i, "--low-watermark")?.parse()?);
                    i += 2;
                }
                "--heartbeat-ms" => {
                    heartbeat_ms = Some(Self::value(args, i, "--heartbeat-ms")?.parse()?);
                    i += 2;
                }
                "--suspect-ms" => {
                    suspect_ms = Some(Self::value(args, i, "--suspect-ms")?.parse()?);
                    i += 2;
                }
                "--dead-ms" => {
                    dead_ms = Some(Self::value(args, i, "--dead-ms")?.parse()?);
                    i += 2;
                }
                other => bail!("unknown flag: {}", other),
            }
        }

        let Some(bind_addr) = bind_addr else {
            bail!("--bind is required");
        };

        let mut config = Self::for_bind(bind_addr);
        if let Some(addr) = rpc_addr {
            config.rpc_addr = addr;
        }
        if let Some(addr) = http_addr {
            config.http_addr = addr;
        }
        config.seed_nodes = seed_nodes;
        if let Some(dir) = data_dir {
            config.data_dir = dir;
        }
        if let Some(r) = replication_factor {
            if r == 0 {
                bail!("--replicas must be at least 1");
            }
            config.replication_factor = r;
        }
        if let Some(high) = high_watermark {
            config.high_watermark = high;
        }
        if let Some(low) = low_watermark {
            config.low_watermark = low;
        }
        if config.low_watermark > config.high_watermark {
            bail!("--low-watermark must not exceed --high-watermark");
        }
        if let Some(ms) = heartbeat_ms {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = suspect_ms {
            config.suspect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = dead_ms {
            config.dead_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
        match args.get(i + 1) {
            Some(v) => Ok(v.as_str()),
            None => bail!("{} requires a value", flag),
        }
    }
}
