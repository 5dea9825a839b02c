//! Content digests over computation inputs.
//!
//! A digest is the SHA-256 of the canonical JSON encoding of a value.
//! Callers order collections before hashing so the digest does not depend
//! on the order rows were fetched in.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::Result;

/// Namespace for record ids derived from digests.
const RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_52c4_0d3e_4b8e_9c77_1e5a_b0d2_f3a9);

/// Hex-encoded SHA-256 of `value`'s JSON encoding.
pub fn digest<T: Serialize + ?Sized>(value: &T) -> Result<String> {
  let bytes = serde_json::to_vec(value)?;
  Ok(hex::encode(Sha256::digest(&bytes)))
}

/// A stable record id for output computed from `digest` under `kind`.
///
/// Re-running a computation on identical inputs yields the same id, so
/// re-inserting its output is a no-op.
pub fn record_id(kind: &str, digest: &str) -> Uuid {
  Uuid::new_v5(&RECORD_NAMESPACE, format!("{kind}:{digest}").as_bytes())
}
