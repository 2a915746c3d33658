//! Heuristics for when to compute consensus, the plurality algorithm, and
//! the reward split (spec.md §4.G).

mod reward;

pub use reward::determine_rewards;

use {
  crate::{
    error::NodeError,
    model::{Event, Vote},
    primitives::Address,
    runtime::Runtime,
  },
  std::collections::HashMap,
};

/// `should_calculate` from spec.md §4.G: every clause must hold before a
/// consensus job is worth scheduling.
pub fn should_calculate(event: &Event, vote_count: u64, participant_count: u64) -> bool {
  if vote_count < event.rules.min_total_votes {
    return false;
  }
  if participant_count == 0 {
    return false;
  }
  100 * vote_count / participant_count >= event.rules.min_participant_ratio
}

/// The outcome of a plurality calculation: the winning representation, the
/// users who voted for it, and one representative vote to serve as the
/// canonical consensus answer.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
  pub representation: String,
  pub consensus_set: Vec<Address>,
  pub canonical_answer: Vote,
}

/// `calculate` from spec.md §4.G. Groups votes by their canonical
/// representation, picks the largest group (ties broken lexicographically
/// by representation, so every node reaches the same answer), and checks
/// it against the absolute and ratio thresholds. Returns `None` when no
/// representation clears both bars.
pub fn calculate(
  event: &Event,
  groups: &HashMap<String, Vec<Vote>>,
) -> Option<ConsensusOutcome> {
  let total_votes: usize = groups.values().map(Vec::len).sum();
  if total_votes == 0 {
    return None;
  }

  let winner = groups
    .iter()
    .max_by(|(rep_a, votes_a), (rep_b, votes_b)| {
      votes_a.len().cmp(&votes_b.len()).then_with(|| rep_b.cmp(rep_a))
    })
    .map(|(rep, votes)| (rep.clone(), votes.clone()))?;

  let (representation, votes) = winner;

  if (votes.len() as u64) < event.rules.min_consensus_votes {
    return None;
  }
  if 100 * votes.len() as u64 / total_votes as u64 < event.rules.min_consensus_ratio {
    return None;
  }

  let mut consensus_set: Vec<Address> = votes.iter().map(|v| v.user_id).collect();
  consensus_set.sort();

  // the representative vote: lowest user_id, for a deterministic pick.
  let canonical_answer = votes
    .iter()
    .min_by_key(|v| v.user_id)
    .cloned()
    .expect("votes is non-empty once min_consensus_votes >= 1");

  Some(ConsensusOutcome { representation, consensus_set, canonical_answer })
}

const EVENT_ABI: &str = "Event";

/// Handles a [`crate::runtime::Job::ConsensusCheck`]: re-evaluates
/// `should_calculate`/`calculate` against this event's current vote set
/// and, the first time a representation clears both thresholds, computes
/// the reward split and flips the monotonic `is_consensus_reached` flag
/// (spec.md §3: it is never cleared once set).
pub async fn process_consensus_check(runtime: &Runtime, event_id: Address) -> Result<(), NodeError> {
  let Some(event) = runtime.store.get_event(event_id).map_err(NodeError::from)? else {
    return Ok(());
  };

  let mut metadata = runtime.store.get_metadata(event_id).map_err(NodeError::from)?.unwrap_or_default();
  if metadata.is_consensus_reached {
    return Ok(());
  }

  let vote_count = runtime.store.count_votes(event_id).map_err(NodeError::from)?;
  let participant_count = runtime.store.count_participants(event_id).map_err(NodeError::from)?;
  if !should_calculate(&event, vote_count, participant_count) {
    return Ok(());
  }

  let groups = runtime.store.group_votes_by_representation(event_id).map_err(NodeError::from)?;
  let Some(outcome) = calculate(&event, &groups) else {
    return Ok(());
  };

  let balances = runtime
    .chain
    .call(event_id, EVENT_ABI, "getBalance", &[])
    .await
    .map_err(NodeError::from)?;
  let (eth_total, token_total) = decode_balances(&balances).unwrap_or((0, 0));

  let rewards = determine_rewards(&outcome.consensus_set, eth_total, token_total);

  metadata.is_consensus_reached = true;
  metadata.consensus_answers =
    outcome.canonical_answer.answers.iter().map(|a| a.value.clone()).collect();
  metadata.round_rewards = rewards;
  runtime.store.put_metadata(event_id, &metadata).map_err(NodeError::from)?;

  tracing::info!(%event_id, consensus_set = outcome.consensus_set.len(), "consensus reached");
  runtime.scheduler.enqueue(crate::runtime::Job::ValidationRound(event_id)).await;
  Ok(())
}

fn decode_balances(tokens: &[ethers::abi::Token]) -> Option<(u128, u128)> {
  let mut it = tokens.iter().cloned();
  let eth = it.next()?.into_uint()?.as_u128();
  let token = it.next()?.into_uint()?.as_u128();
  Some((eth, token))
}
