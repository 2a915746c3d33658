//! Event Filter Pump (spec.md §4.D): bootstraps a newly discovered event
//! and keeps its five chain-event filters drained on the scheduler's
//! cadence. The five log kinds are a tagged enum dispatched with `match`
//! rather than compared as strings on the hot path (spec.md §9 Design
//! Notes).

use {
  crate::{
    chain::LogEntry,
    error::{ChainError, NodeError, StoreError},
    model::{ConsensusRules, Event, EventState, ResolverNode},
    primitives::Address,
    runtime::Runtime,
  },
  ethers::abi::Token,
};

const EVENT_ABI: &str = "Event";

/// The five log names a resolver follows for each event it knows about.
/// Order matters: a cycle always drains `StateTransition` after `Join`,
/// so a user who joined and was immediately promoted in the same block
/// range is recorded as a participant before the state change that may
/// depend on participant counts is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
  Join,
  StateTransition,
  Error,
  ValidationStarted,
  ValidationRestart,
}

impl FilterKind {
  pub const ALL: [FilterKind; 5] = [
    FilterKind::Join,
    FilterKind::StateTransition,
    FilterKind::Error,
    FilterKind::ValidationStarted,
    FilterKind::ValidationRestart,
  ];

  pub fn event_name(self) -> &'static str {
    match self {
      FilterKind::Join => "JoinEvent",
      FilterKind::StateTransition => "StateTransition",
      FilterKind::Error => "Error",
      FilterKind::ValidationStarted => "ValidationStarted",
      FilterKind::ValidationRestart => "ValidationRestart",
    }
  }
}

/// Fetches the on-chain descriptor for `event_id`, persists it, installs
/// all five filters from "earliest", and drains whatever is already
/// sitting in them.
pub async fn bootstrap(runtime: &Runtime, event_id: Address) -> Result<(), NodeError> {
  let event = fetch_descriptor(runtime, event_id).await?;
  if let Err(reason) = event.validate() {
    return Err(NodeError::Chain(ChainError::Rpc(format!(
      "event descriptor failed validation: {reason}"
    ))));
  }
  runtime.store.put_event(&event).map_err(NodeError::from)?;

  for kind in FilterKind::ALL {
    let filter_id = runtime
      .chain
      .install_filter(event_id, EVENT_ABI, kind.event_name())
      .await
      .map_err(NodeError::from)?;
    runtime
      .store
      .put_filter_id(event_id, kind.event_name(), &filter_id.0)
      .map_err(NodeError::from)?;
  }

  drain(runtime, event_id).await
}

/// Drains every installed filter for `event_id`, in `FilterKind::ALL`
/// order, dispatching each entry to its handler.
pub async fn drain(runtime: &Runtime, event_id: Address) -> Result<(), NodeError> {
  let installed = runtime.store.list_filter_ids(event_id).map_err(NodeError::from)?;

  for kind in FilterKind::ALL {
    let Some((_, filter_id)) = installed.iter().find(|(name, _)| name == kind.event_name()) else {
      continue;
    };
    let entries = runtime
      .chain
      .get_logs(&crate::chain::FilterId(filter_id.clone()))
      .await
      .map_err(NodeError::from)?;
    for entry in entries {
      if let Err(e) = dispatch(runtime, event_id, kind, &entry).await {
        tracing::warn!(%event_id, ?kind, error = %e, "failed to apply filter entry");
      }
    }
  }
  Ok(())
}

async fn dispatch(
  runtime: &Runtime,
  event_id: Address,
  kind: FilterKind,
  entry: &LogEntry,
) -> Result<(), NodeError> {
  match kind {
    FilterKind::Join => handle_join(runtime, event_id, entry),
    FilterKind::StateTransition => handle_state_transition(runtime, event_id, entry),
    FilterKind::Error => handle_error(runtime, event_id),
    FilterKind::ValidationStarted => handle_validation_started(runtime, event_id, entry).await,
    FilterKind::ValidationRestart => handle_validation_restart(runtime, event_id, entry).await,
  }
}

fn handle_join(runtime: &Runtime, event_id: Address, entry: &LogEntry) -> Result<(), NodeError> {
  let Some(wallet) = entry.address("wallet") else {
    return Err(NodeError::Chain(ChainError::Rpc("JoinEvent missing `wallet`".into())));
  };
  runtime.store.put_participants(event_id, &[wallet]).map_err(NodeError::from)
}

fn handle_state_transition(
  runtime: &Runtime,
  event_id: Address,
  entry: &LogEntry,
) -> Result<(), NodeError> {
  let Some(raw_state) = entry.uint("newState") else {
    return Err(NodeError::Chain(ChainError::Rpc("StateTransition missing `newState`".into())));
  };
  let next = state_from_u64(raw_state)?;

  let Some(mut event) = runtime.store.get_event(event_id).map_err(NodeError::from)? else {
    return Err(NodeError::Store(StoreError::Serialization(serde_json::Error::io(
      std::io::Error::new(std::io::ErrorKind::NotFound, "unknown event"),
    ))));
  };

  if !event.state.can_advance_to(next) {
    tracing::warn!(%event_id, from = ?event.state, to = ?next, "refusing backwards state transition");
    return Ok(());
  }
  event.state = next;
  if next == EventState::ValidationRound {
    if let Some(index) = event.own_index(runtime.own_address) {
      event.is_master_node = index as u32 + 1 == event.rewards_validation_round;
    }
  }
  runtime.store.put_event(&event).map_err(NodeError::from)
}

fn handle_error(runtime: &Runtime, event_id: Address) -> Result<(), NodeError> {
  let Some(mut event) = runtime.store.get_event(event_id).map_err(NodeError::from)? else {
    return Ok(());
  };
  event.state = EventState::Errored;
  runtime.store.put_event(&event).map_err(NodeError::from)
}

/// `ValidationStarted`: records the round the contract just opened and
/// re-derives `is_master` for it. Spec.md §4.D only schedules
/// `validate_rewards` for non-masters here, but the master side of round
/// 1 needs no extra nudge — `process_consensus_check` already enqueued the
/// job that leads to `run_round` proposing rewards — so this always
/// re-enqueues the round job and lets `run_round` branch on `is_master`.
async fn handle_validation_started(
  runtime: &Runtime,
  event_id: Address,
  entry: &LogEntry,
) -> Result<(), NodeError> {
  update_round_and_master(runtime, event_id, entry, "validationRound")?;
  runtime.scheduler.enqueue(crate::runtime::Job::ValidationRound(event_id)).await;
  Ok(())
}

/// `ValidationRestart`: a dispute advanced the round; re-elect master from
/// `node_addresses[round - 1]` and schedule the round job again so the
/// newly elected master republishes rewards and everyone else re-validates.
async fn handle_validation_restart(
  runtime: &Runtime,
  event_id: Address,
  entry: &LogEntry,
) -> Result<(), NodeError> {
  update_round_and_master(runtime, event_id, entry, "validationRound")?;
  runtime.scheduler.enqueue(crate::runtime::Job::ValidationRound(event_id)).await;
  Ok(())
}

fn update_round_and_master(
  runtime: &Runtime,
  event_id: Address,
  entry: &LogEntry,
  field: &str,
) -> Result<(), NodeError> {
  let Some(round) = entry.uint(field) else {
    return Err(NodeError::Chain(ChainError::Rpc(format!(
      "{} missing `{field}`",
      entry.event_name
    ))));
  };
  let Some(mut event) = runtime.store.get_event(event_id).map_err(NodeError::from)? else {
    return Ok(());
  };
  event.rewards_validation_round = round as u32;
  if let Some(index) = event.own_index(runtime.own_address) {
    event.is_master_node = index as u32 + 1 == event.rewards_validation_round;
  }
  runtime.store.put_event(&event).map_err(NodeError::from)
}

fn state_from_u64(raw: u64) -> Result<EventState, NodeError> {
  match raw {
    0 => Ok(EventState::Applications),
    1 => Ok(EventState::Voting),
    2 => Ok(EventState::ConsensusReached),
    3 => Ok(EventState::ValidationRound),
    4 => Ok(EventState::Finalized),
    5 => Ok(EventState::Errored),
    other => Err(NodeError::Chain(ChainError::Rpc(format!("unknown state ordinal {other}")))),
  }
}

/// Fetches the descriptor fields enumerated by spec.md §4.D step 1, one
/// contract call each, rather than one invented aggregate getter.
async fn fetch_descriptor(runtime: &Runtime, event_id: Address) -> Result<Event, NodeError> {
  let owner = decode_address(&call(runtime, event_id, "owner").await?)?;
  let token_address = decode_address(&call(runtime, event_id, "tokenAddress").await?)?;
  let node_addresses = decode_nodes(&call(runtime, event_id, "getEventResolvers").await?)?;
  let application_start = decode_uint(&call(runtime, event_id, "applicationStartTime").await?)? as i64;
  let application_end = decode_uint(&call(runtime, event_id, "applicationEndTime").await?)? as i64;
  let event_start = decode_uint(&call(runtime, event_id, "eventStartTime").await?)? as i64;
  let event_end = decode_uint(&call(runtime, event_id, "eventEndTime").await?)? as i64;
  let leftovers_recoverable_after =
    decode_uint(&call(runtime, event_id, "leftoversRecoverableAfter").await?)? as i64;
  let event_name = decode_string(&call(runtime, event_id, "eventName").await?)?;
  let data_feed_hash = decode_bytes32(&call(runtime, event_id, "dataFeedHash").await?)?;
  let state = state_from_u64(decode_uint(&call(runtime, event_id, "getState").await?)?)?;
  let is_master_node = decode_bool(&call(runtime, event_id, "isMasterNode").await?)?;
  let rules = decode_consensus_rules(&call(runtime, event_id, "getConsensusRules").await?)?;

  Ok(Event {
    event_id,
    owner,
    token_address,
    node_addresses,
    application_start,
    application_end,
    event_start,
    event_end,
    leftovers_recoverable_after,
    event_name,
    data_feed_hash,
    rules,
    state,
    is_master_node,
    rewards_validation_round: 1,
  })
}

async fn call(runtime: &Runtime, event_id: Address, function: &str) -> Result<Vec<Token>, NodeError> {
  runtime.chain.call(event_id, EVENT_ABI, function, &[]).await.map_err(NodeError::from)
}

fn malformed(function: &str) -> NodeError {
  NodeError::Chain(ChainError::Rpc(format!("malformed reply decoding {function}")))
}

fn decode_address(tokens: &[Token]) -> Result<Address, NodeError> {
  tokens
    .first()
    .cloned()
    .and_then(Token::into_address)
    .map(Into::into)
    .ok_or_else(|| malformed("address"))
}

fn decode_uint(tokens: &[Token]) -> Result<u64, NodeError> {
  tokens
    .first()
    .cloned()
    .and_then(Token::into_uint)
    .map(|u| u.as_u64())
    .ok_or_else(|| malformed("uint"))
}

fn decode_string(tokens: &[Token]) -> Result<String, NodeError> {
  tokens.first().cloned().and_then(Token::into_string).ok_or_else(|| malformed("string"))
}

fn decode_bool(tokens: &[Token]) -> Result<bool, NodeError> {
  tokens.first().cloned().and_then(Token::into_bool).ok_or_else(|| malformed("bool"))
}

fn decode_bytes32(tokens: &[Token]) -> Result<[u8; 32], NodeError> {
  let bytes = tokens
    .first()
    .cloned()
    .and_then(Token::into_fixed_bytes)
    .ok_or_else(|| malformed("bytes32"))?;
  bytes.try_into().map_err(|_| malformed("bytes32 length"))
}

fn decode_consensus_rules(tokens: &[Token]) -> Result<ConsensusRules, NodeError> {
  let mut it = tokens.iter().cloned();
  let min_total_votes =
    it.next().and_then(|t| t.into_uint()).map(|u| u.as_u64()).ok_or_else(|| malformed("getConsensusRules"))?;
  let min_consensus_votes =
    it.next().and_then(|t| t.into_uint()).map(|u| u.as_u64()).ok_or_else(|| malformed("getConsensusRules"))?;
  let min_consensus_ratio =
    it.next().and_then(|t| t.into_uint()).map(|u| u.as_u64()).ok_or_else(|| malformed("getConsensusRules"))?;
  let max_users =
    it.next().and_then(|t| t.into_uint()).map(|u| u.as_u64()).ok_or_else(|| malformed("getConsensusRules"))?;
  Ok(ConsensusRules {
    min_total_votes,
    min_consensus_votes,
    min_consensus_ratio,
    min_participant_ratio: 0,
    max_users,
  })
}

/// `getEventResolvers()` returns one tuple per resolver; the port is
/// resolver-declared metadata read straight off the contract, never a
/// hard-coded constant (spec.md §9's normative resolution of the dual
/// port-scheme anomaly).
fn decode_nodes(tokens: &[Token]) -> Result<Vec<ResolverNode>, NodeError> {
  let array = tokens.first().cloned().and_then(Token::into_array).ok_or_else(|| malformed("getEventResolvers"))?;
  array
    .into_iter()
    .map(|entry| {
      let tuple = entry.into_tuple().ok_or_else(|| malformed("getEventResolvers"))?;
      let mut it = tuple.into_iter();
      let address: Address = it
        .next()
        .and_then(Token::into_address)
        .ok_or_else(|| malformed("getEventResolvers"))?
        .into();
      let host = it.next().and_then(Token::into_string).ok_or_else(|| malformed("getEventResolvers"))?;
      let port =
        it.next().and_then(|t| t.into_uint()).map(|u| u.as_u64() as u16).ok_or_else(|| malformed("getEventResolvers"))?;
      Ok(ResolverNode { address, host, port })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{store::Store, test_support};

  fn addr(byte: u8) -> Address {
    format!("0x{:040x}", byte).parse().unwrap()
  }

  fn resolver(byte: u8) -> ResolverNode {
    ResolverNode { address: addr(byte), host: "127.0.0.1".into(), port: 9000 + byte as u16 }
  }

  fn sample_event(state: EventState) -> Event {
    Event {
      event_id: addr(10),
      owner: addr(99),
      token_address: addr(98),
      node_addresses: vec![resolver(1), resolver(2), resolver(3)],
      application_start: 0,
      application_end: 1,
      event_start: 1,
      event_end: 2,
      leftovers_recoverable_after: 3,
      event_name: "e".into(),
      data_feed_hash: [0u8; 32],
      rules: ConsensusRules {
        min_total_votes: 1,
        min_consensus_votes: 1,
        min_consensus_ratio: 50,
        min_participant_ratio: 0,
        max_users: 10,
      },
      state,
      is_master_node: false,
      rewards_validation_round: 1,
    }
  }

  fn log(event_name: &str, params: Vec<(&str, Token)>) -> LogEntry {
    LogEntry {
      log_index: 0,
      event_name: event_name.into(),
      params: params.into_iter().map(|(n, t)| (n.to_owned(), t)).collect(),
    }
  }

  #[tokio::test]
  async fn join_unions_the_wallet_into_participants() {
    let (runtime, store, _chain) = test_support::test_runtime(addr(1));
    let entry = log("JoinEvent", vec![("wallet", Token::Address(addr(20).into()))]);
    handle_join(&runtime, addr(10), &entry).unwrap();
    assert!(store.exists_participant(addr(10), addr(20)).unwrap());
  }

  #[tokio::test]
  async fn state_transition_moves_forward_and_ignores_backwards_attempts() {
    let (runtime, store, _chain) = test_support::test_runtime(addr(1));
    store.put_event(&sample_event(EventState::Applications)).unwrap();

    let to_voting = log("StateTransition", vec![("newState", Token::Uint(1.into()))]);
    handle_state_transition(&runtime, addr(10), &to_voting).unwrap();
    assert_eq!(store.get_event(addr(10)).unwrap().unwrap().state, EventState::Voting);

    let backwards = log("StateTransition", vec![("newState", Token::Uint(0.into()))]);
    handle_state_transition(&runtime, addr(10), &backwards).unwrap();
    assert_eq!(store.get_event(addr(10)).unwrap().unwrap().state, EventState::Voting);
  }

  #[tokio::test]
  async fn state_transition_into_validation_round_elects_the_matching_master() {
    let (runtime, store, _chain) = test_support::test_runtime(addr(2));
    let mut event = sample_event(EventState::ConsensusReached);
    event.rewards_validation_round = 2;
    store.put_event(&event).unwrap();

    let to_validation = log("StateTransition", vec![("newState", Token::Uint(3.into()))]);
    handle_state_transition(&runtime, addr(10), &to_validation).unwrap();

    let stored = store.get_event(addr(10)).unwrap().unwrap();
    assert_eq!(stored.state, EventState::ValidationRound);
    // round 2 (1-indexed) elects node_addresses[1], which is addr(2), own address here.
    assert!(stored.is_master_node);
  }

  #[tokio::test]
  async fn validation_restart_advances_round_and_elects_the_new_master() {
    let (runtime, store, _chain) = test_support::test_runtime(addr(2));
    let mut event = sample_event(EventState::ValidationRound);
    event.rewards_validation_round = 1;
    store.put_event(&event).unwrap();

    let restart = log("ValidationRestart", vec![("validationRound", Token::Uint(2.into()))]);
    handle_validation_restart(&runtime, addr(10), &restart).await.unwrap();

    let stored = store.get_event(addr(10)).unwrap().unwrap();
    assert_eq!(stored.rewards_validation_round, 2);
    // node_addresses[1] (0-indexed) is addr(2), the own address here.
    assert!(stored.is_master_node);
  }

  #[tokio::test]
  async fn validation_started_records_round_without_electing_a_non_resolver() {
    let (runtime, store, _chain) = test_support::test_runtime(addr(1));
    let event = sample_event(EventState::ValidationRound);
    store.put_event(&event).unwrap();

    let started = log("ValidationStarted", vec![("validationRound", Token::Uint(1.into()))]);
    handle_validation_started(&runtime, addr(10), &started).await.unwrap();

    let stored = store.get_event(addr(10)).unwrap().unwrap();
    assert_eq!(stored.rewards_validation_round, 1);
    assert!(stored.is_master_node);
  }

  #[tokio::test]
  async fn error_event_marks_the_event_errored() {
    let (runtime, store, _chain) = test_support::test_runtime(addr(1));
    store.put_event(&sample_event(EventState::Voting)).unwrap();
    handle_error(&runtime, addr(10)).unwrap();
    assert_eq!(store.get_event(addr(10)).unwrap().unwrap().state, EventState::Errored);
  }

  #[test]
  fn decode_nodes_parses_the_resolver_tuple_array() {
    let tokens = vec![Token::Array(vec![Token::Tuple(vec![
      Token::Address(addr(1).into()),
      Token::String("127.0.0.1".into()),
      Token::Uint(9001.into()),
    ])])];
    let nodes = decode_nodes(&tokens).expect("well-formed resolver array decodes");
    assert_eq!(nodes, vec![resolver(1)]);
  }

  #[test]
  fn decode_bytes32_rejects_the_wrong_length() {
    let tokens = vec![Token::FixedBytes(vec![1, 2, 3])];
    assert!(decode_bytes32(&tokens).is_err());
  }

  fn push_descriptor_calls(chain: &test_support::FakeChainClient, event_id: Address) {
    chain.push_call(event_id, "owner", vec![Token::Address(addr(99).into())]);
    chain.push_call(event_id, "tokenAddress", vec![Token::Address(addr(98).into())]);
    chain.push_call(
      event_id,
      "getEventResolvers",
      vec![Token::Array(vec![Token::Tuple(vec![
        Token::Address(addr(1).into()),
        Token::String("127.0.0.1".into()),
        Token::Uint(9001.into()),
      ])])],
    );
    chain.push_call(event_id, "applicationStartTime", vec![Token::Uint(0.into())]);
    chain.push_call(event_id, "applicationEndTime", vec![Token::Uint(1.into())]);
    chain.push_call(event_id, "eventStartTime", vec![Token::Uint(1.into())]);
    chain.push_call(event_id, "eventEndTime", vec![Token::Uint(2.into())]);
    chain.push_call(event_id, "leftoversRecoverableAfter", vec![Token::Uint(3.into())]);
    chain.push_call(event_id, "eventName", vec![Token::String("e".into())]);
    chain.push_call(event_id, "dataFeedHash", vec![Token::FixedBytes(vec![7u8; 32])]);
    chain.push_call(event_id, "getState", vec![Token::Uint(0.into())]);
    chain.push_call(event_id, "isMasterNode", vec![Token::Bool(false)]);
    chain.push_call(
      event_id,
      "getConsensusRules",
      vec![
        Token::Uint(1.into()),
        Token::Uint(1.into()),
        Token::Uint(50.into()),
        Token::Uint(10.into()),
      ],
    );
  }

  #[tokio::test]
  async fn fetch_descriptor_makes_one_call_per_spec_named_accessor() {
    let (runtime, _store, chain) = test_support::test_runtime(addr(1));
    push_descriptor_calls(&chain, addr(10));

    let event = fetch_descriptor(&runtime, addr(10)).await.unwrap();
    assert_eq!(event.owner, addr(99));
    assert_eq!(event.token_address, addr(98));
    assert_eq!(event.node_addresses, vec![resolver(1)]);
    assert_eq!(event.rules.min_consensus_ratio, 50);
    assert_eq!(event.data_feed_hash, [7u8; 32]);
    assert_eq!(event.state, EventState::Applications);
    assert!(!event.is_master_node);
  }

  #[tokio::test]
  async fn bootstrap_fetches_the_descriptor_and_installs_all_five_filters() {
    let (runtime, store, chain) = test_support::test_runtime(addr(1));
    push_descriptor_calls(&chain, addr(10));

    bootstrap(&runtime, addr(10)).await.unwrap();

    let stored = store.get_event(addr(10)).unwrap().expect("event persisted");
    assert_eq!(stored.owner, addr(99));
    let filters = store.list_filter_ids(addr(10)).unwrap();
    assert_eq!(filters.len(), FilterKind::ALL.len());
  }
}
