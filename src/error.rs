use thiserror::Error;

/// Malformed payload, bad signature, unknown event, user not registered,
/// vote window closed. Surfaced as HTTP 400 or silently dropped on the
/// gossip path.
#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("missing required field: {0}")]
  MissingField(&'static str),

  #[error("signature recovery failed: {0}")]
  BadSignature(String),

  #[error("signer {signer} does not match claimed user {claimed}")]
  SignerMismatch { signer: String, claimed: String },

  #[error("event {0} does not exist")]
  UnknownEvent(crate::primitives::Address),

  #[error("event {0} has already reached consensus")]
  ConsensusAlreadyReached(crate::primitives::Address),

  #[error("vote for event {0} arrived outside the voting window")]
  OutsideVotingWindow(crate::primitives::Address),

  #[error("user {user} is not a registered participant of event {event}")]
  NotAParticipant {
    event: crate::primitives::Address,
    user: crate::primitives::Address,
  },
}

/// RPC timeout, nonce collision, insufficient gas price. Retried internally;
/// on final failure the operation is abandoned for the current cycle.
#[derive(Debug, Error)]
pub enum ChainError {
  #[error("rpc call failed: {0}")]
  Rpc(String),

  #[error("transaction was not included after {attempts} attempts: {reason}")]
  TransactionFailed { attempts: u32, reason: String },

  #[error("filter {0} is unknown to the RPC endpoint")]
  UnknownFilter(String),

  #[error("timed out waiting for a transaction receipt")]
  ReceiptTimeout,
}

/// Dial/read/write/ping failures on the peer gossip fabric. Logged,
/// the connection is dropped and unregistered; no retry storm.
#[derive(Debug, Error)]
pub enum PeerError {
  #[error("failed to dial {addr}: {reason}")]
  DialFailed { addr: String, reason: String },

  #[error("connection to {0} closed")]
  Closed(String),

  #[error("peer did not answer ping within the deadline")]
  PongTimeout,

  #[error("malformed gossip frame: {0}")]
  MalformedFrame(String),
}

/// Attempts to move state backwards, or to set rewards after finalization.
/// Logged; the operation is a no-op.
#[derive(Debug, Error)]
pub enum StateError {
  #[error(
    "refusing to move event {event} from {from:?} back to {to:?}"
  )]
  BackwardsTransition {
    event: crate::primitives::Address,
    from: String,
    to: String,
  },

  #[error("event {0} is already finalized")]
  AlreadyFinalized(crate::primitives::Address),

  #[error("validation round {got} is out of range [1, {max}]")]
  InvalidRound { got: u32, max: u32 },
}

/// Key-value engine failures from the store.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("storage engine error: {0}")]
  Engine(#[from] sled::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Misconfiguration at startup: missing environment variable, unreadable
/// ABI directory, or an otherwise unrecoverable setup error. The process
/// aborts immediately on this error.
#[derive(Debug, Error)]
pub enum FatalError {
  #[error("missing required configuration: {0}")]
  MissingConfig(&'static str),

  #[error("could not read ABI directory {path}: {reason}")]
  UnreadableAbiDir { path: String, reason: String },

  #[error("invalid configuration value for {field}: {reason}")]
  InvalidConfig { field: &'static str, reason: String },
}

/// Aggregate error type that every component boundary converts into.
/// Propagation policy: errors never cross a component boundary as
/// exceptions. Each component translates to one of the kinds above and
/// either recovers locally or returns a status the caller logs.
#[derive(Debug, Error)]
pub enum NodeError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Chain(#[from] ChainError),

  #[error(transparent)]
  Peer(#[from] PeerError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Fatal(#[from] FatalError),
}

/// The three-valued outcome of [`crate::ingress::ingest`], mirrored by the
/// HTTP layer into a status code and by the gossip receive path into a
/// drop-or-keep decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
  Accepted,
  UserError,
  NodeError,
}
