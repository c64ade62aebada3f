//! The `CryptoAdapter` collaborator and the two handshake constructions
//! built on top of it (spec.md §4.5): PIN-based PAKE for binding, STS for
//! stored-key re-auth.

mod adapter;
pub mod constant_time;
pub mod pake;
mod software;
pub mod sts;

pub use adapter::{CryptoAdapter, CryptoError, KeyId};
pub use software::SoftwareCryptoAdapter;
