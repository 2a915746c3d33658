//! The chain client interface (spec.md §4.A). Submits transactions with
//! nonce/gas management, installs log filters, and polls filter entries.
//! The cryptographic primitives behind signing and signature recovery are
//! an external collaborator's concern (spec.md §1); this module only
//! composes the `ethers` provider/signer middleware stack the way a
//! production relayer does, it never reimplements ECDSA itself.

mod abi;
mod client;

pub use abi::AbiDirectory;
pub use client::EthersChainClient;

use {
  crate::{error::ChainError, primitives::Address},
  async_trait::async_trait,
  ethers::{abi::Token, types::H256},
};

/// Opaque handle to a server-side log filter. The chain RPC endpoint owns
/// the cursor; this node only remembers the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterId(pub String);

impl std::fmt::Display for FilterId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A single entry returned by a filter drain, already decoded against the
/// contract's ABI.
#[derive(Debug, Clone)]
pub struct LogEntry {
  pub log_index: u64,
  pub event_name: String,
  pub params: Vec<(String, Token)>,
}

impl LogEntry {
  pub fn address(&self, name: &str) -> Option<Address> {
    self.param(name).and_then(|t| t.clone().into_address()).map(Into::into)
  }

  pub fn uint(&self, name: &str) -> Option<u64> {
    self.param(name).and_then(|t| t.clone().into_uint()).map(|u| u.as_u64())
  }

  pub fn string(&self, name: &str) -> Option<String> {
    self.param(name).and_then(|t| t.clone().into_string())
  }

  fn param(&self, name: &str) -> Option<&Token> {
    self.params.iter().find(|(n, _)| n == name).map(|(_, t)| t)
  }
}

/// Submitted transactions are evidence of acceptance only; callers confirm
/// inclusion by observing filters, never by trusting this hash alone
/// (spec.md §4.A).
pub type TxHash = H256;

#[async_trait]
pub trait ChainClient: Send + Sync {
  /// Installs a log filter on `contract` for `event_name`, starting from
  /// "earliest". Returns an opaque id whose cursor advances server-side.
  async fn install_filter(
    &self,
    contract: Address,
    abi_name: &str,
    event_name: &str,
  ) -> Result<FilterId, ChainError>;

  /// Requests entries observed since the last poll of `filter_id`.
  async fn get_logs(&self, filter_id: &FilterId) -> Result<Vec<LogEntry>, ChainError>;

  /// Read-only contract call.
  async fn call(
    &self,
    contract: Address,
    abi_name: &str,
    function: &str,
    args: &[Token],
  ) -> Result<Vec<Token>, ChainError>;

  /// State-changing contract call. Acquires the current nonce, then
  /// attempts up to 3 times with nonces `N, N+1, N+2`; each attempt sets a
  /// medium gas-price strategy multiplied by 1.2, signs locally, submits
  /// raw, and awaits a receipt with a 15-minute timeout. Sleeps 1s between
  /// attempts. A final failure returns [`ChainError::TransactionFailed`].
  async fn transact(
    &self,
    contract: Address,
    abi_name: &str,
    function: &str,
    args: &[Token],
  ) -> Result<TxHash, ChainError>;
}
