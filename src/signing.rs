//! Signature verification shared by the HTTP vote ingress and the gossip
//! receive path (spec.md §4.E step 2 / §4.F receive path step 2). The
//! actual elliptic-curve recovery math is an external collaborator's
//! concern (spec.md §1); this module only canonicalizes the payload and
//! calls into `ethers`'s signature recovery.

use {
  crate::{error::ValidationError, primitives::Address},
  ethers::types::Signature,
  serde::Serialize,
};

/// Canonicalizes `data` as JSON with `(',', ':')` separators (serde_json's
/// compact writer already produces exactly that), hashes it with the
/// standard personal-message prefix, recovers the signer, and requires it
/// to match `claimed_signer`.
pub fn verify_personal_signature<T: Serialize>(
  data: &T,
  signature_hex: &str,
  claimed_signer: Address,
) -> Result<(), ValidationError> {
  let canonical = serde_json::to_string(data)
    .map_err(|e| ValidationError::BadSignature(e.to_string()))?;

  let signature: Signature = signature_hex
    .parse()
    .map_err(|e: ethers::types::SignatureError| ValidationError::BadSignature(e.to_string()))?;

  let recovered = signature
    .recover(canonical.as_str())
    .map_err(|e| ValidationError::BadSignature(e.to_string()))?;

  let recovered: Address = recovered.into();
  if recovered != claimed_signer {
    return Err(ValidationError::SignerMismatch {
      signer: recovered.to_string(),
      claimed: claimed_signer.to_string(),
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use ethers::signers::{LocalWallet, Signer};

  #[derive(Serialize)]
  struct Payload {
    task_id: String,
    value: u64,
  }

  #[tokio::test]
  async fn accepts_matching_signer_and_rejects_others() {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let payload = Payload { task_id: "abc".into(), value: 1 };
    let canonical = serde_json::to_string(&payload).unwrap();
    let signature = wallet.sign_message(canonical.as_str()).await.unwrap();
    let signer: Address = wallet.address().into();

    assert!(verify_personal_signature(&payload, &signature.to_string(), signer).is_ok());

    let other = LocalWallet::new(&mut rand::thread_rng());
    let other_addr: Address = other.address().into();
    assert!(verify_personal_signature(&payload, &signature.to_string(), other_addr).is_err());
  }
}
