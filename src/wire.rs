//! Wire shapes exchanged over the HTTP and peer-gossip boundaries
//! (spec.md §6). Kept separate from [`crate::model`] because the signed
//! payload a user authored (`task_id`/`user_id`/`answers`) is not quite
//! the same shape as the [`crate::model::Vote`] this node persists —
//! gossip additionally carries the signature so a receiving peer can
//! re-verify it.

use {
  crate::{model::Answer, primitives::Address},
  serde::{Deserialize, Serialize},
};

/// The exact payload a user signs, field order matters: it is
/// canonicalized as compact JSON before hashing (spec.md §4.E step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedVotePayload {
  pub task_id: Address,
  pub user_id: Address,
  pub answers: Vec<Answer>,
}

/// `POST /vote` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct VoteSubmission {
  pub data: SignedVotePayload,
  #[serde(rename = "signedData")]
  pub signed_data: String,
}

/// One gossip frame: `{"vote": <vote-json>}` per spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipFrame {
  pub vote: WireVote,
}

/// The vote shape carried over the peer websocket fabric: a
/// [`crate::model::Vote`] plus the original user signature, so a
/// receiving peer can independently re-verify it before trusting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireVote {
  pub event_id: Address,
  pub user_id: Address,
  pub node_id: Address,
  pub timestamp: i64,
  pub answers: Vec<Answer>,
  pub signature: String,
}

impl WireVote {
  pub fn signed_payload(&self) -> SignedVotePayload {
    SignedVotePayload {
      task_id: self.event_id,
      user_id: self.user_id,
      answers: self.answers.clone(),
    }
  }

  pub fn into_vote(self) -> crate::model::Vote {
    crate::model::Vote {
      event_id: self.event_id,
      user_id: self.user_id,
      node_id: self.node_id,
      timestamp: self.timestamp,
      answers: self.answers,
    }
  }

  pub fn from_vote(vote: &crate::model::Vote, signature: String) -> Self {
    Self {
      event_id: vote.event_id,
      user_id: vote.user_id,
      node_id: vote.node_id,
      timestamp: vote.timestamp,
      answers: vote.answers.clone(),
      signature,
    }
  }
}
