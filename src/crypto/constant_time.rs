//! Constant-time comparison for sensitive values (commitments, signatures).
//! Grounded in the teacher's sibling `secure-legion-core` crate's
//! `crypto/constant_time.rs`, which exists for exactly this reason: the PAKE
//! commitment and STS signature checks in `session/task.rs` must not leak
//! timing information about how many leading bytes matched.

use subtle::ConstantTimeEq;

/// Constant-time equality for 32-byte arrays (commitments, public keys).
#[inline(always)]
pub fn eq_32(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.ct_eq(b).into()
}

/// Constant-time equality for 64-byte arrays (signatures).
#[inline(always)]
pub fn eq_64(a: &[u8; 64], b: &[u8; 64]) -> bool {
    a.ct_eq(b).into()
}
