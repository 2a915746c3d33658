//! Persistence for events, participants, votes, filter handles and
//! rewards (spec.md §4.B). The store is a plain key-value engine; every
//! operation here is idempotent so that replaying a chain event or a
//! gossiped vote twice never corrupts state.

mod sled_store;

pub use sled_store::SledStore;

use {
  crate::{
    error::StoreError,
    model::{Event, EventMetadata, Rewards, Vote},
    primitives::Address,
  },
  std::collections::HashMap,
};

/// The public storage contract. The backing engine is an implementation
/// choice (spec.md §4.B); callers only ever see these operations.
pub trait Store: Send + Sync {
  fn put_event(&self, event: &Event) -> Result<(), StoreError>;
  fn get_event(&self, event_id: Address) -> Result<Option<Event>, StoreError>;
  fn list_event_ids(&self) -> Result<Vec<Address>, StoreError>;
  fn delete_event(&self, event_id: Address) -> Result<(), StoreError>;

  /// Unions `addrs` into the existing participant set for `event_id`.
  fn put_participants(
    &self,
    event_id: Address,
    addrs: &[Address],
  ) -> Result<(), StoreError>;
  fn exists_participant(
    &self,
    event_id: Address,
    user_id: Address,
  ) -> Result<bool, StoreError>;
  /// Size of the joined-participant set, the denominator of
  /// `min_participant_ratio` (spec.md §4.G) — distinct from
  /// `event.node_addresses`, which counts resolvers, not end users.
  fn count_participants(&self, event_id: Address) -> Result<u64, StoreError>;

  /// Overwrites any existing vote for `(vote.event_id, vote.user_id)`.
  /// Callers are responsible for the last-writer-wins comparison
  /// ([`Vote::supersedes`]) before calling this.
  fn put_vote(&self, vote: &Vote) -> Result<(), StoreError>;
  fn get_vote(
    &self,
    event_id: Address,
    user_id: Address,
  ) -> Result<Option<Vote>, StoreError>;
  fn list_votes(&self, event_id: Address) -> Result<Vec<Vote>, StoreError>;
  fn count_votes(&self, event_id: Address) -> Result<u64, StoreError>;
  fn group_votes_by_representation(
    &self,
    event_id: Address,
  ) -> Result<HashMap<String, Vec<Vote>>, StoreError> {
    let mut groups: HashMap<String, Vec<Vote>> = HashMap::new();
    for vote in self.list_votes(event_id)? {
      groups.entry(vote.representation()).or_default().push(vote);
    }
    Ok(groups)
  }

  fn put_filter_id(
    &self,
    event_id: Address,
    name: &str,
    id: &str,
  ) -> Result<(), StoreError>;
  fn list_filter_ids(
    &self,
    event_id: Address,
  ) -> Result<Vec<(String, String)>, StoreError>;

  fn get_metadata(
    &self,
    event_id: Address,
  ) -> Result<Option<EventMetadata>, StoreError>;
  fn put_metadata(
    &self,
    event_id: Address,
    metadata: &EventMetadata,
  ) -> Result<(), StoreError>;

  fn put_rewards(
    &self,
    event_id: Address,
    rewards: &Rewards,
  ) -> Result<(), StoreError>;
  fn get_rewards_aligned(
    &self,
    event_id: Address,
  ) -> Result<Option<Rewards>, StoreError>;

  /// Drops all locally persisted state. Used only at startup, since filter
  /// cursors are re-created from "earliest" on every boot.
  fn flush_all(&self) -> Result<(), StoreError>;
}
