//! Validation Protocol (spec.md §4.H): once an event reaches
//! `ValidationRound`, the resolvers at each round take turns proposing
//! and checking the reward distribution. Round `r` (1-indexed) is
//! presided over by `node_addresses[r - 1]`; a dispute advances the
//! round and promotes the next resolver to master, who republishes the
//! same deterministic split. A round with majority `ok` eventually
//! finalizes the event (the chain itself emits `StateTransition` into
//! `Finalized`, applied by [`crate::filter_pump`]).

use {
  crate::{
    consensus::determine_rewards,
    error::{ChainError, NodeError, StateError},
    model::{Event, Rewards},
    primitives::Address,
    runtime::Runtime,
  },
  ethers::abi::Token,
};

const EVENT_ABI: &str = "Event";

/// Drives one round of the protocol for `event_id`. A no-op if this node
/// is not a participant of the current round. The master side is not
/// gated on `event.state`: per spec.md §4.H the round-1 master proposes
/// rewards as soon as the Consensus Engine completes, and the event only
/// enters `ValidationRound` *after* that `setRewards` call makes the
/// contract emit `ValidationStarted`. Only the non-master validation path
/// needs that state — there is nothing on-chain to validate against
/// before a master has actually proposed.
pub async fn run_round(runtime: &Runtime, event_id: Address) -> Result<(), NodeError> {
  let Some(event) = runtime.store.get_event(event_id).map_err(NodeError::from)? else {
    return Ok(());
  };

  let round = event.rewards_validation_round;
  let Some(master) = event.node_addresses.get(round as usize - 1) else {
    return Err(NodeError::State(StateError::InvalidRound {
      got: round,
      max: event.node_addresses.len() as u32,
    }));
  };
  let is_master = master.address == runtime.own_address;

  // Round 1's master derives rewards straight from the just-reached
  // consensus outcome; a later round's master is only here because a
  // prior round was disputed and it was promoted by `ValidationRestart`,
  // but it republishes the very same deterministic split either way.
  if is_master {
    return propose_rewards(runtime, event_id).await;
  }

  if event.state != crate::model::EventState::ValidationRound {
    return Ok(());
  }

  let ok = validate_rewards(runtime, &event).await?;
  runtime
    .chain
    .transact(
      event_id,
      EVENT_ABI,
      "validateRewards",
      &[Token::Uint(round.into()), Token::Bool(ok)],
    )
    .await
    .map_err(NodeError::from)?;
  if !ok {
    tracing::warn!(%event_id, round, "disputed the proposed reward distribution");
  }
  Ok(())
}

/// The round-1 master computes the reward split from the consensus
/// outcome and commits it on-chain.
async fn propose_rewards(runtime: &Runtime, event_id: Address) -> Result<(), NodeError> {
  let Some(metadata) = runtime.store.get_metadata(event_id).map_err(NodeError::from)? else {
    return Ok(());
  };
  if !metadata.is_consensus_reached {
    return Ok(());
  }
  let rewards = Rewards::from_map(&metadata.round_rewards);
  runtime.store.put_rewards(event_id, &rewards).map_err(NodeError::from)?;

  runtime
    .chain
    .transact(
      event_id,
      EVENT_ABI,
      "setRewards",
      &[
        Token::Array(rewards.users.iter().map(|a| Token::Address((*a).into())).collect()),
        Token::Array(rewards.eth_amounts.iter().map(|v| Token::Uint((*v).into())).collect()),
        Token::Array(rewards.token_amounts.iter().map(|v| Token::Uint((*v).into())).collect()),
      ],
    )
    .await
    .map_err(NodeError::from)?;
  Ok(())
}

/// A non-master round re-derives the reward split locally from its own
/// stored votes and compares it to what the master proposed on-chain.
async fn validate_rewards(runtime: &Runtime, event: &Event) -> Result<bool, NodeError> {
  let Some(stored) = runtime.store.get_rewards_aligned(event.event_id).map_err(NodeError::from)?
  else {
    return Ok(false);
  };

  let proposed = runtime
    .chain
    .call(event.event_id, EVENT_ABI, "getRewards", &[])
    .await
    .map_err(NodeError::from)?;
  let Some(on_chain) = decode_rewards(&proposed) else {
    return Err(NodeError::Chain(ChainError::Rpc("malformed getRewards result".into())));
  };

  let recomputed = determine_rewards(
    &stored.users,
    stored.eth_amounts.iter().sum(),
    stored.token_amounts.iter().sum(),
  );
  let expected = Rewards::from_map(&recomputed);
  Ok(expected.users == on_chain.users
    && expected.eth_amounts == on_chain.eth_amounts
    && expected.token_amounts == on_chain.token_amounts)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{ConsensusRules, EventMetadata, EventState, RewardAmounts, ResolverNode},
    store::Store,
    test_support,
  };
  use std::collections::BTreeMap;

  fn addr(byte: u8) -> Address {
    format!("0x{:040x}", byte).parse().unwrap()
  }

  fn resolver(byte: u8) -> ResolverNode {
    ResolverNode { address: addr(byte), host: "127.0.0.1".into(), port: 9000 + byte as u16 }
  }

  fn sample_event(round: u32, resolvers: Vec<ResolverNode>) -> Event {
    Event {
      event_id: addr(10),
      owner: addr(99),
      token_address: addr(98),
      node_addresses: resolvers,
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
      state: EventState::ValidationRound,
      is_master_node: round == 1,
      rewards_validation_round: round,
    }
  }

  #[tokio::test]
  async fn round_one_master_proposes_rewards_before_validation_round_state_is_reached() {
    // Per spec.md §4.H the event is still `ConsensusReached` (not yet
    // `ValidationRound`) when the round-1 master must propose — that
    // state transition only happens after `setRewards` makes the
    // contract emit `ValidationStarted`.
    let (runtime, store, chain) = test_support::test_runtime(addr(1));
    let mut event = sample_event(1, vec![resolver(1), resolver(2), resolver(3)]);
    event.state = EventState::ConsensusReached;
    store.put_event(&event).unwrap();

    let mut round_rewards = BTreeMap::new();
    round_rewards.insert(addr(20), RewardAmounts { eth: 5, token: 2 });
    store
      .put_metadata(
        event.event_id,
        &EventMetadata { is_consensus_reached: true, round_rewards, ..Default::default() },
      )
      .unwrap();

    run_round(&runtime, event.event_id).await.unwrap();

    let txs = chain.transactions.lock().unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].1, "setRewards");
  }

  #[tokio::test]
  async fn round_one_non_master_validates_against_the_masters_proposal() {
    let (runtime, store, chain) = test_support::test_runtime(addr(2));
    let event = sample_event(1, vec![resolver(1), resolver(2), resolver(3)]);
    store.put_event(&event).unwrap();

    let rewards = Rewards { users: vec![addr(20)], eth_amounts: vec![5], token_amounts: vec![2] };
    store.put_rewards(event.event_id, &rewards).unwrap();
    chain.push_call(
      event.event_id,
      "getRewards",
      vec![
        Token::Array(vec![Token::Address(addr(20).into())]),
        Token::Array(vec![Token::Uint(5.into())]),
        Token::Array(vec![Token::Uint(2.into())]),
      ],
    );

    run_round(&runtime, event.event_id).await.unwrap();

    let txs = chain.transactions.lock().unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].1, "validateRewards");
    assert_eq!(txs[0].2[1], Token::Bool(true));
  }

  #[tokio::test]
  async fn round_one_non_master_disputes_a_mismatched_proposal() {
    let (runtime, store, chain) = test_support::test_runtime(addr(2));
    let event = sample_event(1, vec![resolver(1), resolver(2), resolver(3)]);
    store.put_event(&event).unwrap();

    let rewards = Rewards { users: vec![addr(20)], eth_amounts: vec![5], token_amounts: vec![2] };
    store.put_rewards(event.event_id, &rewards).unwrap();
    chain.push_call(
      event.event_id,
      "getRewards",
      vec![
        Token::Array(vec![Token::Address(addr(20).into())]),
        Token::Array(vec![Token::Uint(999.into())]),
        Token::Array(vec![Token::Uint(2.into())]),
      ],
    );

    run_round(&runtime, event.event_id).await.unwrap();

    let txs = chain.transactions.lock().unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].1, "validateRewards");
    assert_eq!(txs[0].2[1], Token::Bool(false));
  }

  #[tokio::test]
  async fn round_two_non_master_validates_and_transacts_the_outcome() {
    let (runtime, store, chain) = test_support::test_runtime(addr(3));
    let event = sample_event(2, vec![resolver(1), resolver(2), resolver(3)]);
    store.put_event(&event).unwrap();

    let rewards = Rewards {
      users: vec![addr(20), addr(21)],
      eth_amounts: vec![5, 5],
      token_amounts: vec![2, 2],
    };
    store.put_rewards(event.event_id, &rewards).unwrap();
    chain.push_call(
      event.event_id,
      "getRewards",
      vec![
        Token::Array(vec![Token::Address(addr(20).into()), Token::Address(addr(21).into())]),
        Token::Array(vec![Token::Uint(5.into()), Token::Uint(5.into())]),
        Token::Array(vec![Token::Uint(2.into()), Token::Uint(2.into())]),
      ],
    );

    run_round(&runtime, event.event_id).await.unwrap();

    let txs = chain.transactions.lock().unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].1, "validateRewards");
    assert_eq!(txs[0].2[1], Token::Bool(true));
  }

  #[tokio::test]
  async fn round_two_master_republishes_rewards_after_a_restart() {
    // resolver(1) sits at index 1, so it becomes master once the round
    // advances to 2 (spec.md §4.H: ValidationRestart(round=2) promotes
    // node_addresses[1]).
    let (runtime, store, chain) = test_support::test_runtime(addr(1));
    let event = sample_event(2, vec![resolver(2), resolver(1), resolver(3)]);
    store.put_event(&event).unwrap();

    let mut round_rewards = BTreeMap::new();
    round_rewards.insert(addr(20), RewardAmounts { eth: 5, token: 2 });
    store
      .put_metadata(
        event.event_id,
        &EventMetadata { is_consensus_reached: true, round_rewards, ..Default::default() },
      )
      .unwrap();

    run_round(&runtime, event.event_id).await.unwrap();

    let txs = chain.transactions.lock().unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].1, "setRewards");
  }
}

fn decode_rewards(tokens: &[Token]) -> Option<Rewards> {
  let mut it = tokens.iter().cloned();
  let users = it
    .next()?
    .into_array()?
    .into_iter()
    .map(|t| t.into_address().map(Address::from))
    .collect::<Option<Vec<_>>>()?;
  let eth_amounts = it
    .next()?
    .into_array()?
    .into_iter()
    .map(|t| t.into_uint().map(|u| u.as_u128()))
    .collect::<Option<Vec<_>>>()?;
  let token_amounts = it
    .next()?
    .into_array()?
    .into_iter()
    .map(|t| t.into_uint().map(|u| u.as_u128()))
    .collect::<Option<Vec<_>>>()?;
  Some(Rewards { users, eth_amounts, token_amounts })
}
