use {
  super::{AbiDirectory, ChainClient, FilterId, LogEntry, TxHash},
  crate::{error::ChainError, primitives::Address},
  async_trait::async_trait,
  dashmap::DashMap,
  ethers::{
    abi::{RawLog, Token},
    middleware::SignerMiddleware,
    providers::{FilterKind, Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{BlockNumber, Filter, Log, TransactionRequest, U256},
  },
  std::{sync::Arc, time::Duration},
  tracing::{debug, warn},
};

/// Transaction retries (spec.md §4.A: attempt nonces N, N+1, N+2).
const TRANSACT_ATTEMPTS: u32 = 3;
/// Fixed backoff between retries; the spec is explicit this is not
/// exponential.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// Maximum time to wait for a transaction receipt per attempt.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Gas price multiplier applied on top of the "medium" strategy estimate.
const GAS_PRICE_NUMERATOR: u64 = 6;
const GAS_PRICE_DENOMINATOR: u64 = 5;

type SignerStack = SignerMiddleware<Provider<Http>, LocalWallet>;

/// A [`ChainClient`] built on an `ethers` JSON-RPC provider wrapped by a
/// local wallet signer, the same provider-then-signer composition a
/// production Ethereum relayer uses (see the `ethers` provider stack
/// grounded in `other_examples`'s `worldcoin-signup-sequencer` ethereum
/// client). Log filters decode against a contract's ABI, loaded lazily
/// from [`AbiDirectory`].
pub struct EthersChainClient {
  provider: Arc<SignerStack>,
  abi_dir: AbiDirectory,
  /// Maps a provider-assigned filter id back to the contract/ABI/event it
  /// was installed for, so `get_logs` knows how to decode entries.
  filters: DashMap<FilterId, (Address, String, String)>,
}

impl EthersChainClient {
  pub async fn new(
    rpc_url: url::Url,
    private_key: &str,
    abi_dir: AbiDirectory,
  ) -> Result<Self, ChainError> {
    let provider = Provider::<Http>::try_from(rpc_url.as_str())
      .map_err(|e| ChainError::Rpc(format!("invalid rpc url: {e}")))?;
    let chain_id = provider
      .get_chainid()
      .await
      .map_err(|e| ChainError::Rpc(e.to_string()))?;
    let wallet: LocalWallet = private_key
      .parse::<LocalWallet>()
      .map_err(|e| ChainError::Rpc(format!("invalid private key: {e}")))?
      .with_chain_id(chain_id.as_u64());
    let signer = SignerMiddleware::new(provider, wallet);
    Ok(Self { provider: Arc::new(signer), abi_dir, filters: DashMap::new() })
  }
}

#[async_trait]
impl ChainClient for EthersChainClient {
  async fn install_filter(
    &self,
    contract: Address,
    abi_name: &str,
    event_name: &str,
  ) -> Result<FilterId, ChainError> {
    let abi = self.abi_dir.get(abi_name)?;
    let event = abi
      .event(event_name)
      .map_err(|e| ChainError::Rpc(format!("no event {event_name} in {abi_name}: {e}")))?;
    let filter = Filter::new()
      .address(ethers::types::H160::from(contract))
      .topic0(event.signature())
      .from_block(BlockNumber::Earliest);
    let id = self
      .provider
      .new_filter(FilterKind::Logs(&filter))
      .await
      .map_err(|e| ChainError::Rpc(e.to_string()))?;
    let filter_id = FilterId(id.to_string());
    self.filters.insert(
      filter_id.clone(),
      (contract, abi_name.to_owned(), event_name.to_owned()),
    );
    Ok(filter_id)
  }

  async fn get_logs(&self, filter_id: &FilterId) -> Result<Vec<LogEntry>, ChainError> {
    let (_, abi_name, event_name) = self
      .filters
      .get(filter_id)
      .map(|e| e.clone())
      .ok_or_else(|| ChainError::UnknownFilter(filter_id.to_string()))?;
    let abi = self.abi_dir.get(&abi_name)?;
    let event = abi
      .event(&event_name)
      .map_err(|e| ChainError::Rpc(format!("no event {event_name} in {abi_name}: {e}")))?;
    let id: U256 = filter_id
      .0
      .parse()
      .map_err(|_| ChainError::UnknownFilter(filter_id.to_string()))?;
    let logs: Vec<Log> = self
      .provider
      .get_filter_changes(id)
      .await
      .map_err(|e| ChainError::Rpc(e.to_string()))?;

    logs
      .into_iter()
      .map(|log| {
        let log_index = log.log_index.unwrap_or_default().as_u64();
        let raw = RawLog { topics: log.topics, data: log.data.to_vec() };
        let parsed = event
          .parse_log(raw)
          .map_err(|e| ChainError::Rpc(format!("decoding {event_name}: {e}")))?;
        Ok(LogEntry {
          log_index,
          event_name: event_name.clone(),
          params: parsed.params.into_iter().map(|p| (p.name, p.value)).collect(),
        })
      })
      .collect()
  }

  async fn call(
    &self,
    contract: Address,
    abi_name: &str,
    function: &str,
    args: &[Token],
  ) -> Result<Vec<Token>, ChainError> {
    let abi = self.abi_dir.get(abi_name)?;
    let func = abi
      .function(function)
      .map_err(|e| ChainError::Rpc(format!("no function {function} in {abi_name}: {e}")))?;
    let data = func
      .encode_input(args)
      .map_err(|e| ChainError::Rpc(format!("encoding {function}: {e}")))?;
    let tx = TransactionRequest::new()
      .to(ethers::types::H160::from(contract))
      .data(data);
    let raw = self
      .provider
      .call(&tx.into(), None)
      .await
      .map_err(|e| ChainError::Rpc(e.to_string()))?;
    func
      .decode_output(&raw)
      .map_err(|e| ChainError::Rpc(format!("decoding {function} output: {e}")))
  }

  async fn transact(
    &self,
    contract: Address,
    abi_name: &str,
    function: &str,
    args: &[Token],
  ) -> Result<TxHash, ChainError> {
    let abi = self.abi_dir.get(abi_name)?;
    let func = abi
      .function(function)
      .map_err(|e| ChainError::Rpc(format!("no function {function} in {abi_name}: {e}")))?;
    let data = func
      .encode_input(args)
      .map_err(|e| ChainError::Rpc(format!("encoding {function}: {e}")))?;

    let base_nonce = self
      .provider
      .get_transaction_count(self.provider.address(), None)
      .await
      .map_err(|e| ChainError::Rpc(e.to_string()))?;

    let mut last_reason = String::new();
    for attempt in 0..TRANSACT_ATTEMPTS {
      let nonce = base_nonce + attempt;
      match self.attempt_transact(contract, &data, nonce).await {
        Ok(hash) => return Ok(hash),
        Err(reason) => {
          warn!(%function, attempt, %reason, "transaction attempt failed");
          last_reason = reason;
          tokio::time::sleep(RETRY_BACKOFF).await;
        }
      }
    }

    Err(ChainError::TransactionFailed { attempts: TRANSACT_ATTEMPTS, reason: last_reason })
  }
}

impl EthersChainClient {
  async fn attempt_transact(
    &self,
    contract: Address,
    data: &[u8],
    nonce: U256,
  ) -> Result<TxHash, String> {
    let base_gas_price =
      self.provider.get_gas_price().await.map_err(|e| e.to_string())?;
    let gas_price = base_gas_price * GAS_PRICE_NUMERATOR / GAS_PRICE_DENOMINATOR;

    let tx = TransactionRequest::new()
      .to(ethers::types::H160::from(contract))
      .data(data.to_vec())
      .nonce(nonce)
      .gas_price(gas_price);

    let pending = self
      .provider
      .send_transaction(tx, None)
      .await
      .map_err(|e| e.to_string())?;
    debug!(tx_hash = ?pending.tx_hash(), "submitted transaction");

    match tokio::time::timeout(RECEIPT_TIMEOUT, pending).await {
      Ok(Ok(Some(receipt))) => Ok(receipt.transaction_hash),
      Ok(Ok(None)) => Err("transaction dropped from mempool".into()),
      Ok(Err(e)) => Err(e.to_string()),
      Err(_) => Err("timed out waiting for receipt".into()),
    }
  }
}
