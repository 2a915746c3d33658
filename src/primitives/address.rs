use {
  ethers::types::H160,
  serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer},
  std::{fmt::Display, ops::Deref, str::FromStr},
  thiserror::Error,
};

#[derive(Debug, Error)]
pub enum AddressError {
  #[error("invalid hex address: {0}")]
  InvalidHex(String),
}

/// A 20-byte EVM account or contract address.
///
/// Wraps [`ethers::types::H160`] so every component of this crate refers to
/// addresses through a single type instead of threading `H160` directly
/// through the store, the gossip wire format and the HTTP boundary.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(H160);

impl Deref for Address {
  type Target = H160;
  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Display for Address {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}", self.0)
  }
}

impl std::fmt::Debug for Address {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Address({:?})", self.0)
  }
}

impl From<H160> for Address {
  fn from(h: H160) -> Self {
    Self(h)
  }
}

impl From<Address> for H160 {
  fn from(a: Address) -> Self {
    a.0
  }
}

impl FromStr for Address {
  type Err = AddressError;
  fn from_str(value: &str) -> Result<Self, Self::Err> {
    value
      .parse::<H160>()
      .map(Self)
      .map_err(|_| AddressError::InvalidHex(value.to_owned()))
  }
}

impl Serialize for Address {
  fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{:?}", self.0))
  }
}

impl<'de> Deserialize<'de> for Address {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(d)?;
    raw.parse().map_err(DeError::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_json() {
    let addr: Address =
      "0x0102030405060708090a0b0c0d0e0f1011121314".parse().unwrap();
    let json = serde_json::to_string(&addr).unwrap();
    let back: Address = serde_json::from_str(&json).unwrap();
    assert_eq!(addr, back);
  }

  #[test]
  fn orders_ascending_for_reward_split() {
    let a: Address = "0x0000000000000000000000000000000000000001".parse().unwrap();
    let b: Address = "0x0000000000000000000000000000000000000002".parse().unwrap();
    assert!(a < b);
  }

  #[test]
  fn rejects_malformed_hex() {
    assert!("not-an-address".parse::<Address>().is_err());
  }
}
