//! Deterministic in-memory fakes for [`crate::store::Store`] and
//! [`crate::chain::ChainClient`], shared by the consensus, ingress,
//! filter-pump and validation test suites instead of re-mocking the same
//! two traits in every module (spec.md §8 test-tooling expansion).

use {
  crate::{
    chain::{ChainClient, FilterId, LogEntry, TxHash},
    error::{ChainError, StoreError},
    model::{Event, EventMetadata, Rewards, Vote},
    primitives::Address,
    runtime::{Runtime, SchedulerHandle},
    store::Store,
  },
  async_trait::async_trait,
  clap::Parser,
  ethers::abi::Token,
  std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
  },
};

/// An entirely in-process [`Store`]. Faster than standing up a `sled`
/// tempdir per test and behaves identically for every operation the test
/// suites exercise.
#[derive(Default)]
pub struct InMemoryStore {
  events: Mutex<HashMap<Address, Event>>,
  participants: Mutex<HashMap<Address, HashSet<Address>>>,
  votes: Mutex<HashMap<(Address, Address), Vote>>,
  filters: Mutex<HashMap<Address, Vec<(String, String)>>>,
  metadata: Mutex<HashMap<Address, EventMetadata>>,
  rewards: Mutex<HashMap<Address, Rewards>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Store for InMemoryStore {
  fn put_event(&self, event: &Event) -> Result<(), StoreError> {
    self.events.lock().unwrap().insert(event.event_id, event.clone());
    Ok(())
  }

  fn get_event(&self, event_id: Address) -> Result<Option<Event>, StoreError> {
    Ok(self.events.lock().unwrap().get(&event_id).cloned())
  }

  fn list_event_ids(&self) -> Result<Vec<Address>, StoreError> {
    Ok(self.events.lock().unwrap().keys().copied().collect())
  }

  fn delete_event(&self, event_id: Address) -> Result<(), StoreError> {
    self.events.lock().unwrap().remove(&event_id);
    self.participants.lock().unwrap().remove(&event_id);
    self.filters.lock().unwrap().remove(&event_id);
    self.metadata.lock().unwrap().remove(&event_id);
    self.rewards.lock().unwrap().remove(&event_id);
    self.votes.lock().unwrap().retain(|(e, _), _| *e != event_id);
    Ok(())
  }

  fn put_participants(&self, event_id: Address, addrs: &[Address]) -> Result<(), StoreError> {
    self
      .participants
      .lock()
      .unwrap()
      .entry(event_id)
      .or_default()
      .extend(addrs.iter().copied());
    Ok(())
  }

  fn exists_participant(&self, event_id: Address, user_id: Address) -> Result<bool, StoreError> {
    Ok(self
      .participants
      .lock()
      .unwrap()
      .get(&event_id)
      .map(|set| set.contains(&user_id))
      .unwrap_or(false))
  }

  fn count_participants(&self, event_id: Address) -> Result<u64, StoreError> {
    Ok(self.participants.lock().unwrap().get(&event_id).map(|s| s.len() as u64).unwrap_or(0))
  }

  fn put_vote(&self, vote: &Vote) -> Result<(), StoreError> {
    self.votes.lock().unwrap().insert((vote.event_id, vote.user_id), vote.clone());
    Ok(())
  }

  fn get_vote(&self, event_id: Address, user_id: Address) -> Result<Option<Vote>, StoreError> {
    Ok(self.votes.lock().unwrap().get(&(event_id, user_id)).cloned())
  }

  fn list_votes(&self, event_id: Address) -> Result<Vec<Vote>, StoreError> {
    Ok(
      self
        .votes
        .lock()
        .unwrap()
        .values()
        .filter(|v| v.event_id == event_id)
        .cloned()
        .collect(),
    )
  }

  fn count_votes(&self, event_id: Address) -> Result<u64, StoreError> {
    Ok(self.list_votes(event_id)?.len() as u64)
  }

  fn put_filter_id(&self, event_id: Address, name: &str, id: &str) -> Result<(), StoreError> {
    let mut filters = self.filters.lock().unwrap();
    let entries = filters.entry(event_id).or_default();
    entries.retain(|(n, _)| n != name);
    entries.push((name.to_owned(), id.to_owned()));
    Ok(())
  }

  fn list_filter_ids(&self, event_id: Address) -> Result<Vec<(String, String)>, StoreError> {
    Ok(self.filters.lock().unwrap().get(&event_id).cloned().unwrap_or_default())
  }

  fn get_metadata(&self, event_id: Address) -> Result<Option<EventMetadata>, StoreError> {
    Ok(self.metadata.lock().unwrap().get(&event_id).cloned())
  }

  fn put_metadata(&self, event_id: Address, metadata: &EventMetadata) -> Result<(), StoreError> {
    self.metadata.lock().unwrap().insert(event_id, metadata.clone());
    Ok(())
  }

  fn put_rewards(&self, event_id: Address, rewards: &Rewards) -> Result<(), StoreError> {
    self.rewards.lock().unwrap().insert(event_id, rewards.clone());
    Ok(())
  }

  fn get_rewards_aligned(&self, event_id: Address) -> Result<Option<Rewards>, StoreError> {
    Ok(self.rewards.lock().unwrap().get(&event_id).cloned())
  }

  fn flush_all(&self) -> Result<(), StoreError> {
    self.events.lock().unwrap().clear();
    self.participants.lock().unwrap().clear();
    self.votes.lock().unwrap().clear();
    self.filters.lock().unwrap().clear();
    self.metadata.lock().unwrap().clear();
    self.rewards.lock().unwrap().clear();
    Ok(())
  }
}

/// Canned responses keyed by `(contract, function)`, consumed in FIFO
/// order per key. Lets a test script a sequence of chain responses
/// (e.g. a filter drain that yields one entry, then none) without
/// standing up an RPC endpoint.
#[derive(Default)]
pub struct FakeChainClient {
  pub call_responses: Mutex<HashMap<(Address, String), Vec<Vec<Token>>>>,
  pub log_responses: Mutex<HashMap<String, Vec<Vec<LogEntry>>>>,
  pub transactions: Mutex<Vec<(Address, String, Vec<Token>)>>,
  next_filter_id: Mutex<u64>,
}

impl FakeChainClient {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push_call(&self, contract: Address, function: &str, response: Vec<Token>) {
    self
      .call_responses
      .lock()
      .unwrap()
      .entry((contract, function.to_owned()))
      .or_default()
      .push(response);
  }

  pub fn push_logs(&self, filter_id: &str, entries: Vec<LogEntry>) {
    self.log_responses.lock().unwrap().entry(filter_id.to_owned()).or_default().push(entries);
  }
}

#[async_trait]
impl ChainClient for FakeChainClient {
  async fn install_filter(
    &self,
    _contract: Address,
    _abi_name: &str,
    event_name: &str,
  ) -> Result<FilterId, ChainError> {
    let mut next = self.next_filter_id.lock().unwrap();
    let id = format!("{event_name}-{next}");
    *next += 1;
    Ok(FilterId(id))
  }

  async fn get_logs(&self, filter_id: &FilterId) -> Result<Vec<LogEntry>, ChainError> {
    let mut responses = self.log_responses.lock().unwrap();
    match responses.get_mut(&filter_id.0) {
      Some(queue) if !queue.is_empty() => Ok(queue.remove(0)),
      _ => Ok(Vec::new()),
    }
  }

  async fn call(
    &self,
    contract: Address,
    _abi_name: &str,
    function: &str,
    _args: &[Token],
  ) -> Result<Vec<Token>, ChainError> {
    let mut responses = self.call_responses.lock().unwrap();
    match responses.get_mut(&(contract, function.to_owned())) {
      Some(queue) if !queue.is_empty() => Ok(queue.remove(0)),
      _ => Err(ChainError::Rpc(format!("no scripted response for {function}"))),
    }
  }

  async fn transact(
    &self,
    contract: Address,
    _abi_name: &str,
    function: &str,
    args: &[Token],
  ) -> Result<TxHash, ChainError> {
    self.transactions.lock().unwrap().push((contract, function.to_owned(), args.to_vec()));
    Ok(TxHash::zero())
  }
}

/// Builds a [`Runtime`] wired to fresh [`InMemoryStore`]/[`FakeChainClient`]
/// instances, handing back `Arc`s to both so a test can seed chain
/// responses or inspect submitted transactions after the fact. Gossip and
/// scheduler channels are left unconsumed; tests that care about either
/// drain the matching receiver themselves.
pub fn test_runtime(own_address: Address) -> (Runtime, Arc<InMemoryStore>, Arc<FakeChainClient>) {
  let store = Arc::new(InMemoryStore::new());
  let chain = Arc::new(FakeChainClient::new());
  let (gossip_tx, _gossip_rx) = tokio::sync::mpsc::channel(16);
  let (sched_tx, _sched_rx) = tokio::sync::mpsc::channel(16);
  let node_private_key = format!("0x{}", "11".repeat(32));
  let config = crate::config::Config::try_parse_from([
    "oracle-node",
    "--chain-rpc-url",
    "http://localhost:8545",
    "--node-private-key",
    &node_private_key,
    "--node-address",
    &own_address.to_string(),
    "--node-public-ip",
    "127.0.0.1",
    "--registry-address",
    &own_address.to_string(),
    "--node-registry-address",
    &own_address.to_string(),
    "--abi-dir",
    ".",
  ])
  .expect("fixed test args always parse");

  let runtime = Runtime::new(
    config,
    own_address,
    store.clone() as Arc<dyn Store>,
    chain.clone() as Arc<dyn ChainClient>,
    crate::gossip::GossipHandle::new(gossip_tx),
    SchedulerHandle::new(sched_tx),
  );
  (runtime, store, chain)
}
