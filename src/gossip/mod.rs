//! Peer gossip fabric (spec.md §4.F): a raw websocket server/client mesh,
//! not a structured pub/sub overlay. Each resolver of an event dials every
//! other resolver directly and broadcasts its own vote; there is no
//! anti-entropy or ordering guarantee, matching spec.md's explicit
//! best-effort framing.
//!
//! The whole fabric runs on one dedicated OS thread driving a
//! single-threaded Tokio runtime (spec.md §5): the connection map is
//! owned entirely by tasks spawned on that runtime, never touched from
//! the main multi-threaded pool. Producers only ever reach it through
//! [`GossipHandle`], a bounded channel.

mod actor;

use {
  crate::{model::ResolverNode, primitives::Address, runtime::Runtime, wire::GossipFrame},
  std::sync::Arc,
  tokio::sync::mpsc,
};

/// One outbound vote broadcast: gossip it to every resolver of the event
/// it belongs to (the actor skips the node's own address).
#[derive(Debug, Clone)]
pub struct GossipOutbound {
  pub frame: GossipFrame,
  pub peer_addresses: Vec<ResolverNode>,
}

const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

/// Sending half of the bridge into the dedicated gossip worker.
#[derive(Clone)]
pub struct GossipHandle {
  tx: mpsc::Sender<GossipOutbound>,
}

impl GossipHandle {
  pub fn new(tx: mpsc::Sender<GossipOutbound>) -> Self {
    Self { tx }
  }

  /// Never blocks the caller: a full queue means the gossip worker is
  /// behind, and dropping the broadcast is preferable to stalling a vote
  /// ingestion path or a chain-event handler on it.
  pub fn publish(&self, outbound: GossipOutbound) {
    if let Err(e) = self.tx.try_send(outbound) {
      tracing::warn!(error = %e, "gossip outbound queue full, dropping broadcast");
    }
  }
}

/// Creates the bounded channel a [`GossipHandle`] and the eventual worker
/// communicate over. Split out from [`spawn`] because `Runtime::new`
/// needs the handle before the worker can be started with the runtime it
/// calls back into.
pub fn channel() -> (GossipHandle, mpsc::Receiver<GossipOutbound>) {
  let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
  (GossipHandle::new(tx), rx)
}

/// Starts the dedicated gossip worker thread: a single-threaded Tokio
/// runtime running the websocket server, the outbound broadcast loop, and
/// every accepted inbound connection's read loop.
pub fn spawn(
  own_address: Address,
  listen_port: u16,
  outbound_rx: mpsc::Receiver<GossipOutbound>,
  runtime: Arc<Runtime>,
) -> std::thread::JoinHandle<()> {
  std::thread::Builder::new()
    .name("gossip".into())
    .spawn(move || {
      let local_rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to start gossip worker runtime");
      local_rt.block_on(actor::run(own_address, listen_port, outbound_rx, runtime));
    })
    .expect("failed to spawn gossip worker thread")
}
