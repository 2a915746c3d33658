use {
  crate::error::FatalError,
  clap::Parser,
  std::{net::IpAddr, path::PathBuf, time::Duration},
};

/// All required and optional settings for a single node. Loaded from
/// environment variables with CLI flag overrides, matching the teacher's
/// `clap::Parser`-derived options pattern. Validated eagerly by
/// [`Config::validate`]; any failure there is [`FatalError`] and aborts the
/// process before the run loop starts (spec.md §7).
#[derive(Debug, Clone, Parser)]
#[clap(version, about = "Decentralized oracle node")]
pub struct Config {
  /// JSON-RPC endpoint of the chain this node follows.
  #[clap(long, env = "CHAIN_RPC_URL")]
  pub chain_rpc_url: url::Url,

  /// Hex-encoded secp256k1 private key used to sign transactions and votes.
  #[clap(long, env = "NODE_PRIVATE_KEY")]
  pub node_private_key: String,

  /// This node's own address, must match `node_private_key`.
  #[clap(long, env = "NODE_ADDRESS")]
  pub node_address: crate::primitives::Address,

  /// Public IP advertised to the node registry contract.
  #[clap(long, env = "NODE_PUBLIC_IP")]
  pub node_public_ip: IpAddr,

  /// Port the HTTP vote-ingress server listens on.
  #[clap(long, env = "HTTP_PORT", default_value = "8080")]
  pub http_port: u16,

  /// Port the peer gossip websocket fabric listens on.
  #[clap(long, env = "PEER_WS_PORT", default_value = "8765")]
  pub peer_ws_port: u16,

  /// Address of the event registry contract.
  #[clap(long, env = "REGISTRY_ADDRESS")]
  pub registry_address: crate::primitives::Address,

  /// Address of the node-registry contract (`registerNodeIp`).
  #[clap(long, env = "NODE_REGISTRY_ADDRESS")]
  pub node_registry_address: crate::primitives::Address,

  /// Directory containing one ABI JSON file per contract name.
  #[clap(long, env = "ABI_DIR")]
  pub abi_dir: PathBuf,

  /// Serve HTTP ingress over TLS.
  #[clap(long, env = "HTTPS")]
  pub https: bool,

  /// Remote addresses denied at the HTTP ingress layer.
  #[clap(long, env = "DENY_LIST", use_value_delimiter = true)]
  pub deny_list: Vec<IpAddr>,

  /// Cadence of the filter-drain and registry-drain cron jobs.
  #[clap(long, env = "FILTER_POLL_INTERVAL", default_value = "15s", value_parser = parse_duration)]
  pub filter_poll_interval: Duration,

  /// Cadence of the stale-event garbage collector.
  #[clap(long, env = "STALE_EVENT_GC_INTERVAL", default_value = "1h", value_parser = parse_duration)]
  pub stale_event_gc_interval: Duration,

  /// Directory for the embedded store.
  #[clap(long, env = "DATA_DIR", default_value = "./data")]
  pub data_dir: PathBuf,
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
  humantime::parse_duration(raw).map_err(|e| e.to_string())
}

impl Config {
  /// Fails fast on anything that would otherwise surface as a confusing
  /// runtime error deep inside a component. Expands `~` in filesystem
  /// paths the way the teacher's genesis-path handling does.
  pub fn validate(&self) -> Result<(), FatalError> {
    if self.node_private_key.trim().is_empty() {
      return Err(FatalError::MissingConfig("node_private_key"));
    }
    let abi_dir = self.expanded_abi_dir();
    if !abi_dir.is_dir() {
      return Err(FatalError::UnreadableAbiDir {
        path: abi_dir.display().to_string(),
        reason: "not a directory".into(),
      });
    }
    if self.http_port == self.peer_ws_port {
      return Err(FatalError::InvalidConfig {
        field: "peer_ws_port",
        reason: "must differ from http_port".into(),
      });
    }
    Ok(())
  }

  pub fn expanded_abi_dir(&self) -> PathBuf {
    PathBuf::from(
      shellexpand::full(&self.abi_dir.display().to_string())
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| self.abi_dir.display().to_string()),
    )
  }

  pub fn abi_path(&self, contract: &str) -> PathBuf {
    self.expanded_abi_dir().join(format!("{contract}.json"))
  }
}
