//! The handshake layer: wire messages, channels, the per-request session
//! state machine, and the session table that owns them (spec.md §4.5,
//! §6, §7).

mod auth_module;
mod channel;
mod engine;
mod error;
mod message;
mod task;

pub use auth_module::{AuthModule, AuthVariant, Operation as AuthOperation};
pub use channel::{Channel, DiscoveryBusChannel, DiscoveryBusTransport, ServiceChannel};
pub use engine::{AutoCreate, SessionEngine, SessionOutcome};
pub use error::SessionError;
pub use message::{GroupOp, WireMessage};
pub use task::{Operation, Session, SessionRole, SessionState};
