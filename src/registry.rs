//! Registry Watcher (spec.md §4.C): the node's one way of discovering
//! events it should follow. Boots by announcing this node's address to
//! the node registry, flushing local state, and installing a registry
//! filter from "earliest", then rides the same cron cadence as the
//! per-event filters.

use crate::{chain::FilterId, error::NodeError, filter_pump, runtime::Runtime};

const REGISTRY_ABI: &str = "Registry";
const NODE_REGISTRY_ABI: &str = "NodeRegistry";
const REGISTRY_FILTER_KEY: &str = "registry";
const NEW_EVENT: &str = "NewEvent";

/// Announces this node's public IP to the node-registry contract
/// (`registerNodeIp`, spec.md §6) so that event contracts can list it as
/// a resolver. Idempotent on the contract side; safe to call on every
/// boot.
async fn register_node_ip(runtime: &Runtime) -> Result<(), NodeError> {
  let ip = runtime.config.node_public_ip.to_string();
  runtime
    .chain
    .transact(
      runtime.config.node_registry_address,
      NODE_REGISTRY_ABI,
      "registerNodeIp",
      &[ethers::abi::Token::String(ip)],
    )
    .await
    .map_err(NodeError::from)?;
  Ok(())
}

/// Run once at process start: announce this node to the node registry,
/// drop any locally persisted state (filter cursors are always
/// re-created from "earliest", so nothing is lost), install the
/// registry's `NewEvent` filter, and bootstrap whatever events it
/// already reports.
pub async fn boot(runtime: &Runtime) -> Result<(), NodeError> {
  register_node_ip(runtime).await?;
  runtime.store.flush_all().map_err(NodeError::from)?;

  let filter_id = runtime
    .chain
    .install_filter(runtime.config.registry_address, REGISTRY_ABI, NEW_EVENT)
    .await
    .map_err(NodeError::from)?;
  // The registry filter is keyed under the registry's own address rather
  // than a per-event id, since it is not scoped to any one event.
  runtime
    .store
    .put_filter_id(runtime.config.registry_address, REGISTRY_FILTER_KEY, &filter_id.0)
    .map_err(NodeError::from)?;

  drain(runtime, &filter_id).await
}

/// Drains newly discovered events from the registry filter and
/// bootstraps each one. Polled on the same cadence as the per-event
/// filters (spec.md §4.C).
pub async fn drain(runtime: &Runtime, filter_id: &FilterId) -> Result<(), NodeError> {
  let entries = runtime.chain.get_logs(filter_id).await.map_err(NodeError::from)?;
  for entry in entries {
    let Some(event_id) = entry.address("event_id") else {
      tracing::warn!("NewEvent log missing `event_id`, skipping");
      continue;
    };
    if let Err(e) = filter_pump::bootstrap(runtime, event_id).await {
      tracing::warn!(%event_id, error = %e, "failed to bootstrap newly discovered event");
    }
  }
  Ok(())
}

/// Convenience for the scheduler's registry-drain cron job: looks up the
/// installed registry filter id and drains it.
pub async fn poll(runtime: &Runtime) -> Result<(), NodeError> {
  let installed = runtime
    .store
    .list_filter_ids(runtime.config.registry_address)
    .map_err(NodeError::from)?;
  let Some((_, filter_id)) = installed.iter().find(|(name, _)| name == REGISTRY_FILTER_KEY) else {
    tracing::warn!("registry filter not installed, skipping drain");
    return Ok(());
  };
  drain(runtime, &FilterId(filter_id.clone())).await
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{store::Store, test_support};

  fn addr(byte: u8) -> crate::primitives::Address {
    format!("0x{:040x}", byte).parse().unwrap()
  }

  #[tokio::test]
  async fn boot_registers_the_node_ip_before_installing_the_registry_filter() {
    let (runtime, store, chain) = test_support::test_runtime(addr(1));
    boot(&runtime).await.unwrap();

    let txs = chain.transactions.lock().unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].1, "registerNodeIp");
    assert_eq!(txs[0].2, vec![ethers::abi::Token::String("127.0.0.1".into())]);
    drop(txs);

    let filters = store.list_filter_ids(runtime.config.registry_address).unwrap();
    assert!(filters.iter().any(|(name, _)| name == REGISTRY_FILTER_KEY));
  }
}
