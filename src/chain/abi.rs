use {
  crate::error::ChainError,
  dashmap::DashMap,
  ethers::abi::Abi,
  std::path::PathBuf,
};

/// Loads and caches contract ABI JSON files from a directory, one file per
/// contract name (`<name>.json`), per spec.md §6's configuration contract.
pub struct AbiDirectory {
  dir: PathBuf,
  cache: DashMap<String, Abi>,
}

impl AbiDirectory {
  pub fn new(dir: PathBuf) -> Self {
    Self { dir, cache: DashMap::new() }
  }

  pub fn get(&self, contract: &str) -> Result<Abi, ChainError> {
    if let Some(abi) = self.cache.get(contract) {
      return Ok(abi.clone());
    }
    let path = self.dir.join(format!("{contract}.json"));
    let raw = std::fs::read_to_string(&path).map_err(|e| {
      ChainError::Rpc(format!("reading ABI {}: {e}", path.display()))
    })?;
    let abi: Abi = serde_json::from_str(&raw)
      .map_err(|e| ChainError::Rpc(format!("parsing ABI {}: {e}", path.display())))?;
    self.cache.insert(contract.to_owned(), abi.clone());
    Ok(abi)
  }
}
