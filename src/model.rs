//! The data model shared by every component: events, participants, votes
//! and the reward sets that fall out of consensus. See spec.md §3.

use {
  crate::primitives::Address,
  serde::{Deserialize, Serialize},
  std::collections::BTreeMap,
};

/// Ordered phases of an event's on-chain lifecycle. Only forward
/// transitions are accepted by the filter pump; same-state is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventState {
  Applications,
  Voting,
  ConsensusReached,
  ValidationRound,
  Finalized,
  Errored,
}

impl EventState {
  /// Errored is a side-channel, not a rank in the forward-only chain;
  /// every other state moves strictly forward.
  pub fn can_advance_to(self, next: EventState) -> bool {
    next == EventState::Errored || next >= self
  }
}

/// Resolution rules mirrored from `getConsensusRules()`, plus the
/// participant-ratio threshold whose contract origin is ambiguous in the
/// source (see spec.md §9) and which defaults to zero until wired up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRules {
  pub min_total_votes: u64,
  pub min_consensus_votes: u64,
  pub min_consensus_ratio: u64,
  pub min_participant_ratio: u64,
  pub max_users: u64,
}

/// The immutable-ish descriptor of an on-chain event contract. `state`,
/// `is_master_node` and `rewards_validation_round` are the mutable fields
/// recomputed by the filter pump and validation protocol; everything else
/// is set once at bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
  pub event_id: Address,
  pub owner: Address,
  pub token_address: Address,
  /// Ordered list of resolver nodes, length R. Index into this list is
  /// the 0-indexed validation round used for master election.
  pub node_addresses: Vec<ResolverNode>,

  pub application_start: i64,
  pub application_end: i64,
  pub event_start: i64,
  pub event_end: i64,
  pub leftovers_recoverable_after: i64,

  pub event_name: String,
  pub data_feed_hash: [u8; 32],

  pub rules: ConsensusRules,

  pub state: EventState,
  pub is_master_node: bool,
  /// 1-indexed; must stay within `[1, node_addresses.len()]`.
  pub rewards_validation_round: u32,
}

impl Event {
  /// Invariants from spec.md §3. Violating any of these means the event
  /// descriptor was malformed at the source and should never be persisted.
  pub fn validate(&self) -> Result<(), String> {
    if self.event_start > self.event_end {
      return Err("event_start must be <= event_end".into());
    }
    if !(self.application_start < self.application_end
      && self.application_end <= self.event_start)
    {
      return Err("application window must precede and not overlap the event window".into());
    }
    if self.rules.min_consensus_votes > self.rules.min_total_votes
      || self.rules.min_total_votes > self.rules.max_users
    {
      return Err(
        "expected min_consensus_votes <= min_total_votes <= max_users".into(),
      );
    }
    if self.node_addresses.is_empty() {
      return Err("node_addresses must contain at least one resolver".into());
    }
    if self.rewards_validation_round < 1
      || self.rewards_validation_round as usize > self.node_addresses.len()
    {
      return Err("rewards_validation_round out of range".into());
    }
    Ok(())
  }

  pub fn in_voting_window(&self, now: i64) -> bool {
    now >= self.event_start && now <= self.event_end
  }

  pub fn own_index(&self, own: Address) -> Option<usize> {
    self.node_addresses.iter().position(|n| n.address == own)
  }
}

/// One federation resolver entry. The websocket `port` is resolver-declared
/// metadata read from the event contract, never a hard-coded constant
/// (spec.md §9's normative resolution of the dual port-scheme anomaly).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverNode {
  pub address: Address,
  pub host: String,
  pub port: u16,
}

impl ResolverNode {
  pub fn websocket_addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

/// Mutable metadata kept separate from [`Event`] so it can be updated
/// without racing the immutable descriptor fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
  /// Monotonic: once true, never cleared.
  pub is_consensus_reached: bool,
  pub consensus_answers: Vec<String>,
  pub round_rewards: BTreeMap<Address, RewardAmounts>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardAmounts {
  pub eth: u128,
  pub token: u128,
}

/// A single answer within a vote's `answers` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
  pub sort_key: String,
  pub value: String,
}

/// Identity is `(event_id, user_id)`; a later write with a higher
/// timestamp replaces an earlier one for the same identity (ties broken by
/// lexicographic `node_id`, see spec.md §5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
  pub event_id: Address,
  pub user_id: Address,
  pub node_id: Address,
  pub timestamp: i64,
  pub answers: Vec<Answer>,
}

impl Vote {
  /// Whether `self` should replace `existing` under the last-writer-wins
  /// rule from spec.md §5.
  pub fn supersedes(&self, existing: &Vote) -> bool {
    match self.timestamp.cmp(&existing.timestamp) {
      std::cmp::Ordering::Greater => true,
      std::cmp::Ordering::Less => false,
      std::cmp::Ordering::Equal => self.node_id.to_string() > existing.node_id.to_string(),
    }
  }

  /// Canonical serialization of `answers`, sorted by `sort_key` then
  /// `value`, used as the consensus grouping key.
  pub fn representation(&self) -> String {
    let mut sorted = self.answers.clone();
    sorted.sort_by(|a, b| {
      a.sort_key.cmp(&b.sort_key).then_with(|| a.value.cmp(&b.value))
    });
    serde_json::to_string(&sorted).expect("answers serialize infallibly")
  }
}

/// Parallel `(user, eth, token)` lists preserving insertion order, as
/// required by the on-chain `setRewards` call (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rewards {
  pub users: Vec<Address>,
  pub eth_amounts: Vec<u128>,
  pub token_amounts: Vec<u128>,
}

impl Rewards {
  pub fn from_map(map: &BTreeMap<Address, RewardAmounts>) -> Self {
    let mut users = Vec::with_capacity(map.len());
    let mut eth_amounts = Vec::with_capacity(map.len());
    let mut token_amounts = Vec::with_capacity(map.len());
    for (user, amounts) in map {
      users.push(*user);
      eth_amounts.push(amounts.eth);
      token_amounts.push(amounts.token);
    }
    Self { users, eth_amounts, token_amounts }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn addr(byte: u8) -> Address {
    format!("0x{:040x}", byte).parse().unwrap()
  }

  #[test]
  fn representation_is_order_independent() {
    let a = Vote {
      event_id: addr(1),
      user_id: addr(2),
      node_id: addr(3),
      timestamp: 1,
      answers: vec![
        Answer { sort_key: "b".into(), value: "2".into() },
        Answer { sort_key: "a".into(), value: "1".into() },
      ],
    };
    let b = Vote {
      answers: vec![
        Answer { sort_key: "a".into(), value: "1".into() },
        Answer { sort_key: "b".into(), value: "2".into() },
      ],
      ..a.clone()
    };
    assert_eq!(a.representation(), b.representation());
  }

  #[test]
  fn supersedes_by_timestamp_then_node_id() {
    let base = Vote {
      event_id: addr(1),
      user_id: addr(2),
      node_id: addr(3),
      timestamp: 10,
      answers: vec![],
    };
    let later = Vote { timestamp: 11, ..base.clone() };
    assert!(later.supersedes(&base));
    assert!(!base.supersedes(&later));

    let tie_higher_node = Vote { node_id: addr(9), ..base.clone() };
    assert!(tie_higher_node.supersedes(&base));
  }

  #[test]
  fn forward_only_state_machine() {
    assert!(EventState::Applications.can_advance_to(EventState::Voting));
    assert!(!EventState::Voting.can_advance_to(EventState::Applications));
    assert!(EventState::Voting.can_advance_to(EventState::Voting));
    assert!(EventState::Voting.can_advance_to(EventState::Errored));
  }
}
