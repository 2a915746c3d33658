use {
  super::Store,
  crate::{
    error::StoreError,
    model::{Event, EventMetadata, Rewards, Vote},
    primitives::Address,
  },
  std::{collections::HashSet, path::Path},
};

/// A [`Store`] backed by an embedded `sled` database. Each logical key
/// family from spec.md §4.B (events, participants, votes, filter handles,
/// metadata, rewards) gets its own named tree, mirroring the
/// column-family-per-concern layout the teacher uses for block storage,
/// except keyed on `sled::Tree` since the chosen engine has no native
/// column families.
///
/// Every value is JSON-encoded: the event, vote and gossip wire shapes are
/// already JSON at the HTTP and websocket boundary, so one codec covers
/// storage too instead of keeping a second binary format in sync.
#[derive(Clone)]
pub struct SledStore {
  db: sled::Db,
}

impl SledStore {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, StoreError> {
    let db = sled::Config::new()
      .path(directory)
      .open()
      .map_err(StoreError::Engine)?;
    Ok(Self { db })
  }

  fn tree(&self, name: &str) -> Result<sled::Tree, StoreError> {
    self.db.open_tree(name).map_err(StoreError::Engine)
  }

  fn vote_key(event_id: Address, user_id: Address) -> Vec<u8> {
    format!("{event_id}:{user_id}").into_bytes()
  }
}

impl Store for SledStore {
  fn put_event(&self, event: &Event) -> Result<(), StoreError> {
    let tree = self.tree("events")?;
    tree.insert(event.event_id.to_string(), serde_json::to_vec(event)?)?;
    Ok(())
  }

  fn get_event(&self, event_id: Address) -> Result<Option<Event>, StoreError> {
    let tree = self.tree("events")?;
    match tree.get(event_id.to_string())? {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  fn list_event_ids(&self) -> Result<Vec<Address>, StoreError> {
    let tree = self.tree("events")?;
    tree
      .iter()
      .keys()
      .map(|k| {
        let k = k?;
        std::str::from_utf8(&k)
          .ok()
          .and_then(|s| s.parse().ok())
          .ok_or_else(|| {
            StoreError::Engine(sled::Error::Unsupported(
              "corrupt event key".into(),
            ))
          })
      })
      .collect()
  }

  fn delete_event(&self, event_id: Address) -> Result<(), StoreError> {
    self.tree("events")?.remove(event_id.to_string())?;
    self.tree("participants")?.remove(event_id.to_string())?;
    self.tree("metadata")?.remove(event_id.to_string())?;
    self.tree("rewards")?.remove(event_id.to_string())?;
    self.tree("filters")?.remove(event_id.to_string())?;
    for key in self
      .tree("votes")?
      .scan_prefix(format!("{event_id}:"))
      .keys()
      .flatten()
      .collect::<Vec<_>>()
    {
      self.tree("votes")?.remove(key)?;
    }
    Ok(())
  }

  fn put_participants(
    &self,
    event_id: Address,
    addrs: &[Address],
  ) -> Result<(), StoreError> {
    let tree = self.tree("participants")?;
    let mut set: HashSet<Address> = match tree.get(event_id.to_string())? {
      Some(bytes) => serde_json::from_slice(&bytes)?,
      None => HashSet::new(),
    };
    set.extend(addrs.iter().copied());
    tree.insert(event_id.to_string(), serde_json::to_vec(&set)?)?;
    Ok(())
  }

  fn exists_participant(
    &self,
    event_id: Address,
    user_id: Address,
  ) -> Result<bool, StoreError> {
    let tree = self.tree("participants")?;
    match tree.get(event_id.to_string())? {
      Some(bytes) => {
        let set: HashSet<Address> = serde_json::from_slice(&bytes)?;
        Ok(set.contains(&user_id))
      }
      None => Ok(false),
    }
  }

  fn count_participants(&self, event_id: Address) -> Result<u64, StoreError> {
    let tree = self.tree("participants")?;
    match tree.get(event_id.to_string())? {
      Some(bytes) => {
        let set: HashSet<Address> = serde_json::from_slice(&bytes)?;
        Ok(set.len() as u64)
      }
      None => Ok(0),
    }
  }

  fn put_vote(&self, vote: &Vote) -> Result<(), StoreError> {
    let tree = self.tree("votes")?;
    tree.insert(
      Self::vote_key(vote.event_id, vote.user_id),
      serde_json::to_vec(vote)?,
    )?;
    Ok(())
  }

  fn get_vote(
    &self,
    event_id: Address,
    user_id: Address,
  ) -> Result<Option<Vote>, StoreError> {
    let tree = self.tree("votes")?;
    match tree.get(Self::vote_key(event_id, user_id))? {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  fn list_votes(&self, event_id: Address) -> Result<Vec<Vote>, StoreError> {
    let tree = self.tree("votes")?;
    tree
      .scan_prefix(format!("{event_id}:"))
      .values()
      .map(|v| Ok(serde_json::from_slice(&v?)?))
      .collect()
  }

  fn count_votes(&self, event_id: Address) -> Result<u64, StoreError> {
    Ok(self.list_votes(event_id)?.len() as u64)
  }

  fn put_filter_id(
    &self,
    event_id: Address,
    name: &str,
    id: &str,
  ) -> Result<(), StoreError> {
    let tree = self.tree("filters")?;
    let key = event_id.to_string();
    let mut handles: Vec<(String, String)> = match tree.get(&key)? {
      Some(bytes) => serde_json::from_slice(&bytes)?,
      None => Vec::new(),
    };
    if let Some(entry) = handles.iter_mut().find(|(n, _)| n == name) {
      entry.1 = id.to_owned();
    } else {
      handles.push((name.to_owned(), id.to_owned()));
    }
    tree.insert(key, serde_json::to_vec(&handles)?)?;
    Ok(())
  }

  fn list_filter_ids(
    &self,
    event_id: Address,
  ) -> Result<Vec<(String, String)>, StoreError> {
    let tree = self.tree("filters")?;
    match tree.get(event_id.to_string())? {
      Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
      None => Ok(Vec::new()),
    }
  }

  fn get_metadata(
    &self,
    event_id: Address,
  ) -> Result<Option<EventMetadata>, StoreError> {
    let tree = self.tree("metadata")?;
    match tree.get(event_id.to_string())? {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  fn put_metadata(
    &self,
    event_id: Address,
    metadata: &EventMetadata,
  ) -> Result<(), StoreError> {
    let tree = self.tree("metadata")?;
    tree.insert(event_id.to_string(), serde_json::to_vec(metadata)?)?;
    Ok(())
  }

  fn put_rewards(
    &self,
    event_id: Address,
    rewards: &Rewards,
  ) -> Result<(), StoreError> {
    let tree = self.tree("rewards")?;
    tree.insert(event_id.to_string(), serde_json::to_vec(rewards)?)?;
    Ok(())
  }

  fn get_rewards_aligned(
    &self,
    event_id: Address,
  ) -> Result<Option<Rewards>, StoreError> {
    let tree = self.tree("rewards")?;
    match tree.get(event_id.to_string())? {
      Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      None => Ok(None),
    }
  }

  fn flush_all(&self) -> Result<(), StoreError> {
    for name in ["events", "participants", "votes", "filters", "metadata", "rewards"] {
      self.tree(name)?.clear()?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Answer, ConsensusRules, EventState, ResolverNode};

  fn addr(byte: u8) -> Address {
    format!("0x{:040x}", byte).parse().unwrap()
  }

  fn sample_event(id: Address) -> Event {
    Event {
      event_id: id,
      owner: addr(99),
      token_address: addr(98),
      node_addresses: vec![ResolverNode {
        address: addr(1),
        host: "127.0.0.1".into(),
        port: 9000,
      }],
      application_start: 0,
      application_end: 10,
      event_start: 10,
      event_end: 20,
      leftovers_recoverable_after: 100,
      event_name: "test".into(),
      data_feed_hash: [0u8; 32],
      rules: ConsensusRules {
        min_total_votes: 1,
        min_consensus_votes: 1,
        min_consensus_ratio: 50,
        min_participant_ratio: 0,
        max_users: 10,
      },
      state: EventState::Voting,
      is_master_node: false,
      rewards_validation_round: 1,
    }
  }

  #[test]
  fn put_and_get_event_round_trips() {
    let dir = tempdir();
    let store = SledStore::open(dir.path()).unwrap();
    let event = sample_event(addr(1));
    store.put_event(&event).unwrap();
    let got = store.get_event(addr(1)).unwrap().unwrap();
    assert_eq!(got.event_name, "test");
  }

  #[test]
  fn participants_union_and_lookup() {
    let dir = tempdir();
    let store = SledStore::open(dir.path()).unwrap();
    store.put_participants(addr(1), &[addr(2), addr(3)]).unwrap();
    store.put_participants(addr(1), &[addr(3), addr(4)]).unwrap();
    assert!(store.exists_participant(addr(1), addr(2)).unwrap());
    assert!(store.exists_participant(addr(1), addr(4)).unwrap());
    assert!(!store.exists_participant(addr(1), addr(5)).unwrap());
    assert_eq!(store.count_participants(addr(1)).unwrap(), 3);
  }

  #[test]
  fn vote_overwrite_by_identity() {
    let dir = tempdir();
    let store = SledStore::open(dir.path()).unwrap();
    let v1 = Vote {
      event_id: addr(1),
      user_id: addr(2),
      node_id: addr(3),
      timestamp: 1,
      answers: vec![Answer { sort_key: "a".into(), value: "x".into() }],
    };
    let v2 = Vote { timestamp: 2, ..v1.clone() };
    store.put_vote(&v1).unwrap();
    store.put_vote(&v2).unwrap();
    assert_eq!(store.count_votes(addr(1)).unwrap(), 1);
    assert_eq!(store.get_vote(addr(1), addr(2)).unwrap().unwrap().timestamp, 2);
  }

  #[test]
  fn flush_all_clears_every_tree() {
    let dir = tempdir();
    let store = SledStore::open(dir.path()).unwrap();
    store.put_event(&sample_event(addr(1))).unwrap();
    store.flush_all().unwrap();
    assert!(store.list_event_ids().unwrap().is_empty());
  }

  fn tempdir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
  }
}
