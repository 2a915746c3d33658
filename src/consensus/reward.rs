use {crate::primitives::Address, std::collections::BTreeMap};

/// The reference reward split from spec.md §4.G, superseding the
/// hard-coded `{eth: 1, token: 2}` placeholder noted as a source anomaly
/// in spec.md §9. Floor-divides each balance by the consensus set size and
/// hands the remainder to users sorted by address ascending, giving a
/// split that is deterministic, integer-only, and stable under any
/// permutation of `consensus_set`.
pub fn determine_rewards(
  consensus_set: &[Address],
  eth_total: u128,
  token_total: u128,
) -> BTreeMap<Address, crate::model::RewardAmounts> {
  let mut sorted: Vec<Address> = consensus_set.to_vec();
  sorted.sort();
  sorted.dedup();

  let n = sorted.len() as u128;
  let mut result = BTreeMap::new();
  if n == 0 {
    return result;
  }

  let eth_share = eth_total / n;
  let eth_remainder = eth_total % n;
  let token_share = token_total / n;
  let token_remainder = token_total % n;

  for (i, user) in sorted.into_iter().enumerate() {
    let i = i as u128;
    let eth = eth_share + u128::from(i < eth_remainder);
    let token = token_share + u128::from(i < token_remainder);
    result.insert(user, crate::model::RewardAmounts { eth, token });
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;

  fn addr(byte: u8) -> Address {
    format!("0x{:040x}", byte).parse().unwrap()
  }

  #[test]
  fn s1_reference_split_matches_spec_example() {
    let set = vec![addr(1), addr(2)];
    let rewards = determine_rewards(&set, 10, 4);
    assert_eq!(rewards[&addr(1)].eth, 5);
    assert_eq!(rewards[&addr(1)].token, 2);
    assert_eq!(rewards[&addr(2)].eth, 5);
    assert_eq!(rewards[&addr(2)].token, 2);
  }

  #[test]
  fn conserves_balance_with_remainder() {
    let set = vec![addr(1), addr(2), addr(3)];
    let rewards = determine_rewards(&set, 10, 7);
    let eth_sum: u128 = rewards.values().map(|r| r.eth).sum();
    let token_sum: u128 = rewards.values().map(|r| r.token).sum();
    assert!(eth_sum <= 10);
    assert!(token_sum <= 7);
    assert_eq!(eth_sum, 10);
    assert_eq!(token_sum, 7);
  }

  #[test]
  fn deterministic_and_stable_under_permutation() {
    let ordered = vec![addr(1), addr(2), addr(3)];
    let shuffled = vec![addr(3), addr(1), addr(2)];
    assert_eq!(determine_rewards(&ordered, 100, 50), determine_rewards(&shuffled, 100, 50));
  }
}
