//! HTTP vote ingress (spec.md §4.E, §6). `ingest` is the pure decision
//! function; [`router`] wires it to the axum-facing `POST /vote` route,
//! a deny-list check on the remote address, and a liveness `GET /`.

mod http;

pub use http::router;

use {
  crate::{
    error::{IngestStatus, ValidationError},
    model::Vote,
    primitives::{self, Address},
    runtime::{Job, Runtime},
    signing::verify_personal_signature,
    wire::{GossipFrame, VoteSubmission, WireVote},
  },
};

/// Steps 1-7 of spec.md §4.E:
/// 1. schema check (handled by the caller's JSON decode, a malformed body
///    never reaches this function)
/// 2. signature check against `data.user_id`
/// 3. the event must exist, be within its voting window, and not yet
///    finalized
/// 4. consensus must not already be reached for this event — a hard
///    rejection, not the "continue anyway" anomaly noted in spec.md §9
/// 5. the user must be a registered participant
/// 6. last-writer-wins against any existing vote for this `(event,user)`
/// 7. persist, gossip to the event's other resolvers, and schedule a
///    consensus check
pub async fn ingest(runtime: &Runtime, submission: VoteSubmission) -> IngestStatus {
  let VoteSubmission { data, signed_data } = submission;

  if let Err(e) = verify_personal_signature(&data, &signed_data, data.user_id) {
    tracing::warn!(error = %e, "vote rejected: bad signature");
    return IngestStatus::UserError;
  }

  let event_id = data.task_id;
  let event = match runtime.store.get_event(event_id) {
    Ok(Some(event)) => event,
    Ok(None) => {
      tracing::warn!(%event_id, "vote rejected: unknown event");
      return IngestStatus::UserError;
    }
    Err(e) => {
      tracing::error!(error = %e, "store error while looking up event");
      return IngestStatus::NodeError;
    }
  };

  let now = primitives::now();
  if !event.in_voting_window(now) {
    tracing::warn!(%event_id, "vote rejected: outside voting window");
    return IngestStatus::UserError;
  }

  match runtime.store.get_metadata(event_id) {
    Ok(Some(meta)) if meta.is_consensus_reached => {
      tracing::warn!(%event_id, "vote rejected: consensus already reached");
      return IngestStatus::UserError;
    }
    Ok(_) => {}
    Err(e) => {
      tracing::error!(error = %e, "store error while looking up metadata");
      return IngestStatus::NodeError;
    }
  }

  match runtime.store.exists_participant(event_id, data.user_id) {
    Ok(true) => {}
    Ok(false) => {
      let err = ValidationError::NotAParticipant { event: event_id, user: data.user_id };
      tracing::warn!(error = %err, "vote rejected");
      return IngestStatus::UserError;
    }
    Err(e) => {
      tracing::error!(error = %e, "store error while checking participant");
      return IngestStatus::NodeError;
    }
  }

  let vote = Vote {
    event_id,
    user_id: data.user_id,
    node_id: runtime.own_address,
    timestamp: now,
    answers: data.answers,
  };

  match runtime.store.get_vote(event_id, vote.user_id) {
    Ok(Some(existing)) if !vote.supersedes(&existing) => {
      // stale relative to what we already hold; not an error, just a no-op.
      return IngestStatus::Accepted;
    }
    Ok(_) => {}
    Err(e) => {
      tracing::error!(error = %e, "store error while reading existing vote");
      return IngestStatus::NodeError;
    }
  }

  if let Err(e) = runtime.store.put_vote(&vote) {
    tracing::error!(error = %e, "failed to persist vote");
    return IngestStatus::NodeError;
  }

  let frame = GossipFrame { vote: WireVote::from_vote(&vote, signed_data) };
  runtime.gossip.publish(crate::gossip::GossipOutbound {
    frame,
    peer_addresses: event.node_addresses.clone(),
  });

  runtime.scheduler.enqueue(Job::ConsensusCheck(event_id)).await;

  IngestStatus::Accepted
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{Answer, ConsensusRules, Event, EventState, ResolverNode},
    store::Store,
    test_support,
    wire::SignedVotePayload,
  };
  use ethers::signers::{LocalWallet, Signer};

  fn addr(byte: u8) -> Address {
    format!("0x{:040x}", byte).parse().unwrap()
  }

  fn sample_event(id: Address, state: EventState, now: i64) -> Event {
    Event {
      event_id: id,
      owner: addr(99),
      token_address: addr(98),
      node_addresses: vec![ResolverNode { address: addr(1), host: "127.0.0.1".into(), port: 9000 }],
      application_start: now - 20,
      application_end: now - 10,
      event_start: now - 5,
      event_end: now + 100,
      leftovers_recoverable_after: now + 200,
      event_name: "test".into(),
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

  #[tokio::test]
  async fn accepts_a_well_formed_vote_from_a_participant() {
    let (runtime, _store, _chain) = test_support::test_runtime(addr(1));
    let now = primitives::now();
    let event = sample_event(addr(10), EventState::Voting, now);
    runtime.store.put_event(&event).unwrap();
    runtime.store.put_participants(addr(10), &[addr(20)]).unwrap();

    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let voter: Address = wallet.address().into();
    runtime.store.put_participants(addr(10), &[voter]).unwrap();

    let data = SignedVotePayload {
      task_id: addr(10),
      user_id: voter,
      answers: vec![Answer { sort_key: "q".into(), value: "42".into() }],
    };
    let canonical = serde_json::to_string(&data).unwrap();
    let signature = wallet.sign_message(canonical.as_str()).await.unwrap();

    let submission = VoteSubmission { data, signed_data: signature.to_string() };
    assert_eq!(ingest(&runtime, submission).await, IngestStatus::Accepted);
    assert_eq!(runtime.store.count_votes(addr(10)).unwrap(), 1);
  }

  #[tokio::test]
  async fn rejects_vote_for_unregistered_participant() {
    let (runtime, _store, _chain) = test_support::test_runtime(addr(1));
    let now = primitives::now();
    let event = sample_event(addr(11), EventState::Voting, now);
    runtime.store.put_event(&event).unwrap();

    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let voter: Address = wallet.address().into();
    let data = SignedVotePayload {
      task_id: addr(11),
      user_id: voter,
      answers: vec![Answer { sort_key: "q".into(), value: "42".into() }],
    };
    let canonical = serde_json::to_string(&data).unwrap();
    let signature = wallet.sign_message(canonical.as_str()).await.unwrap();
    let submission = VoteSubmission { data, signed_data: signature.to_string() };
    assert_eq!(ingest(&runtime, submission).await, IngestStatus::UserError);
  }

  #[tokio::test]
  async fn rejects_vote_once_consensus_already_reached() {
    let (runtime, _store, _chain) = test_support::test_runtime(addr(1));
    let now = primitives::now();
    let event = sample_event(addr(12), EventState::ConsensusReached, now);
    runtime.store.put_event(&event).unwrap();
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let voter: Address = wallet.address().into();
    runtime.store.put_participants(addr(12), &[voter]).unwrap();
    runtime
      .store
      .put_metadata(
        addr(12),
        &crate::model::EventMetadata { is_consensus_reached: true, ..Default::default() },
      )
      .unwrap();

    let data = SignedVotePayload {
      task_id: addr(12),
      user_id: voter,
      answers: vec![Answer { sort_key: "q".into(), value: "42".into() }],
    };
    let canonical = serde_json::to_string(&data).unwrap();
    let signature = wallet.sign_message(canonical.as_str()).await.unwrap();
    let submission = VoteSubmission { data, signed_data: signature.to_string() };
    assert_eq!(ingest(&runtime, submission).await, IngestStatus::UserError);
  }
}
