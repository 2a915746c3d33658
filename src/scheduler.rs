//! Scheduler (spec.md §4.S): a cooperative job queue running on the
//! shared multi-threaded pool, separate from the dedicated gossip worker
//! (spec.md §5). Cron jobs drain the filter pump and registry on a fixed
//! cadence and garbage-collect stale events hourly; one-shot jobs run the
//! `Vote -> Consensus -> setRewards` chain, serialized per `event_id` so
//! two cycles of the same event never race while different events
//! proceed fully in parallel.

use {
  crate::{
    consensus, filter_pump, registry,
    runtime::{Job, Runtime},
    validation,
  },
  std::sync::Arc,
  tokio::sync::mpsc,
};

pub fn spawn(runtime: Arc<Runtime>, job_rx: mpsc::Receiver<Job>) -> tokio::task::JoinHandle<()> {
  tokio::spawn(run(runtime, job_rx))
}

async fn run(runtime: Arc<Runtime>, mut job_rx: mpsc::Receiver<Job>) {
  let mut filter_drain = tokio::time::interval(runtime.config.filter_poll_interval);
  let mut stale_gc = tokio::time::interval(runtime.config.stale_event_gc_interval);

  loop {
    tokio::select! {
      _ = filter_drain.tick() => {
        drain_all_filters(&runtime).await;
      }
      _ = stale_gc.tick() => {
        garbage_collect_stale_events(&runtime);
      }
      Some(job) = job_rx.recv() => {
        spawn_job(runtime.clone(), job);
      }
    }
  }
}

async fn drain_all_filters(runtime: &Arc<Runtime>) {
  if let Err(e) = registry::poll(runtime).await {
    tracing::warn!(error = %e, "registry drain failed");
  }
  let event_ids = match runtime.store.list_event_ids() {
    Ok(ids) => ids,
    Err(e) => {
      tracing::warn!(error = %e, "failed to list events for filter drain");
      return;
    }
  };
  for event_id in event_ids {
    if let Err(e) = filter_pump::drain(runtime, event_id).await {
      tracing::warn!(%event_id, error = %e, "filter drain failed");
    }
  }
}

fn garbage_collect_stale_events(runtime: &Arc<Runtime>) {
  let now = crate::primitives::now();
  let event_ids = match runtime.store.list_event_ids() {
    Ok(ids) => ids,
    Err(e) => {
      tracing::warn!(error = %e, "failed to list events for stale gc");
      return;
    }
  };
  for event_id in event_ids {
    let Ok(Some(event)) = runtime.store.get_event(event_id) else { continue };
    let terminal = matches!(
      event.state,
      crate::model::EventState::Finalized | crate::model::EventState::Errored
    );
    if terminal && now > event.leftovers_recoverable_after {
      if let Err(e) = runtime.store.delete_event(event_id) {
        tracing::warn!(%event_id, error = %e, "failed to garbage collect stale event");
      } else {
        tracing::info!(%event_id, "garbage collected stale event");
      }
    }
  }
}

/// Runs a one-shot job on its own task, holding the per-`event_id` lock
/// for the duration so the consensus/validation chain never races with
/// itself, while unrelated events proceed concurrently.
fn spawn_job(runtime: Arc<Runtime>, job: Job) {
  tokio::spawn(async move {
    let event_id = match job {
      Job::ConsensusCheck(id) | Job::ValidationRound(id) => id,
    };
    let lock = runtime.event_lock(event_id);
    let _guard = lock.lock().await;

    let result = match job {
      Job::ConsensusCheck(id) => consensus::process_consensus_check(&runtime, id).await,
      Job::ValidationRound(id) => validation::run_round(&runtime, id).await,
    };
    if let Err(e) = result {
      tracing::warn!(%event_id, error = %e, "scheduled job failed");
    }
  });
}
