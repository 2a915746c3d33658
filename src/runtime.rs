//! Explicit process-wide context, replacing the global-singleton pattern
//! flagged in spec.md §9's Design Notes. Every long-lived component is
//! constructed once in `main` and handed an `Arc<Runtime>` rather than
//! reaching for ambient statics.

use {
  crate::{
    chain::ChainClient,
    config::Config,
    primitives::Address,
    store::Store,
  },
  dashmap::DashMap,
  std::sync::Arc,
  tokio::sync::{mpsc, Mutex},
};

/// A unit of work the scheduler drains from its queue (spec.md §4.S).
/// Cron-triggered work schedules itself directly against the runtime and
/// never goes through this channel; it exists for the one-shot jobs that
/// fan out from event handling (a vote that may tip consensus, a
/// consensus outcome that starts validation).
#[derive(Debug, Clone)]
pub enum Job {
  /// Re-check `should_calculate`/`calculate` for this event; a no-op if
  /// the thresholds are not yet met or consensus was already reached.
  ConsensusCheck(Address),
  /// Drive one round of the validation protocol for this event.
  ValidationRound(Address),
}

/// The sending half of the scheduler's one-shot job queue. Cheap to
/// clone; every component that can trigger follow-up work holds one.
#[derive(Clone)]
pub struct SchedulerHandle {
  tx: mpsc::Sender<Job>,
}

impl SchedulerHandle {
  pub fn new(tx: mpsc::Sender<Job>) -> Self {
    Self { tx }
  }

  /// Enqueues a job. Drops it with a log line rather than blocking
  /// indefinitely if the scheduler is falling behind — back-pressure on
  /// this queue should never stall a vote's HTTP response.
  pub async fn enqueue(&self, job: Job) {
    if self.tx.send(job).await.is_err() {
      tracing::warn!("scheduler queue closed, dropping job");
    }
  }
}

pub struct Runtime {
  pub config: Config,
  pub own_address: Address,
  pub store: Arc<dyn Store>,
  pub chain: Arc<dyn ChainClient>,
  pub gossip: crate::gossip::GossipHandle,
  pub scheduler: SchedulerHandle,
  /// Per-event serialization for the `Vote -> Consensus -> setRewards`
  /// chain (spec.md §5): two cycles of the same event never race, but
  /// different events proceed fully in parallel.
  event_locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl Runtime {
  pub fn new(
    config: Config,
    own_address: Address,
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainClient>,
    gossip: crate::gossip::GossipHandle,
    scheduler: SchedulerHandle,
  ) -> Self {
    Self {
      config,
      own_address,
      store,
      chain,
      gossip,
      scheduler,
      event_locks: DashMap::new(),
    }
  }

  pub fn event_lock(&self, event_id: Address) -> Arc<Mutex<()>> {
    self
      .event_locks
      .entry(event_id)
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }
}
