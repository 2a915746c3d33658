mod address;

pub use address::Address;

/// Current unix time, in seconds. Centralized so tests can stub it
/// if this ever needs to be deterministic.
pub fn now() -> i64 {
  chrono::Utc::now().timestamp()
}
