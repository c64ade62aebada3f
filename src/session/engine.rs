//! Owns every in-flight [`Session`], keyed by `request_id` (spec.md §4.5,
//! §7). Grounded in `crypto/ack_state.rs` from the teacher's sibling
//! `secure-legion-core` crate, which keeps the same shape for its own
//! per-contact state: one mutex-guarded map keyed by a caller-provided
//! id, with entries removed once their business is done rather than
//! threaded through as owned values.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::TrustConfig;
use crate::crypto::CryptoAdapter;
use crate::engine::GroupEngine;
use crate::model::DeviceType;

use super::channel::Channel;
use super::error::SessionError;
use super::task::{Outcome, Session, SessionRole};

/// What a caller gets back after feeding the engine one inbound message or
/// driving a session forward. `IgnoreMsg` never becomes a public `Error`
/// (spec.md §7) — callers see it only through this enum, never `Result`.
pub enum SessionOutcome {
    Sent,
    AwaitingConfirmation,
    Bound,
    Authenticated([u8; 32]),
    Ignored,
}

struct Tables {
    sessions: HashMap<i64, Session>,
}

/// Describes how to register a server-side session lazily, the first time
/// an inbound message names a `request_id` this engine has never seen.
/// Used by the Public API facade for `process_data`/`process_key_agree_data`,
/// where the peer dials in before the local side has made any call of its
/// own (spec.md §4.6: "inbound channel bytes for an existing session are
/// also posted as tasks" — the session that receives them first is this
/// lazy-created one).
pub enum AutoCreate {
    Bind {
        group_id: String,
        local_udid: String,
        local_auth_id: String,
        peer_device_type: DeviceType,
    },
    Auth {
        group_id: String,
        local_udid: String,
        local_auth_id: String,
        peer_auth_id: String,
        peer_device_type: DeviceType,
        peer_static_x25519_pub: [u8; 32],
        peer_static_ed25519_pub: [u8; 32],
    },
}

/// Owns the handshake session table and the one `GroupEngine` it persists
/// completed binds into.
/// How often the background sweep checks the table for expired sessions.
/// Independent of `bind_timeout`/`auth_timeout`: this just bounds how late a
/// timed-out session can linger before it's reaped.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

pub struct SessionEngine {
    tables: Mutex<Tables>,
    crypto: Arc<dyn CryptoAdapter>,
    group_engine: Arc<GroupEngine>,
    bind_timeout: Duration,
    auth_timeout: Duration,
    sweep_stop: Mutex<Option<Sender<()>>>,
    sweep_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SessionEngine {
    /// Builds the engine and starts its background expiry sweep (spec.md
    /// §4.5: "the worker's per-tick scan tears down expired sessions").
    /// Grounded in the teacher's `queue.rs` worker-thread shape, but this
    /// thread runs on a timer instead of draining a job channel.
    pub fn new(crypto: Arc<dyn CryptoAdapter>, group_engine: Arc<GroupEngine>, config: &TrustConfig) -> Arc<Self> {
        let engine = Arc::new(SessionEngine {
            tables: Mutex::new(Tables { sessions: HashMap::new() }),
            crypto,
            group_engine,
            bind_timeout: config.bind_timeout,
            auth_timeout: config.auth_timeout,
            sweep_stop: Mutex::new(None),
            sweep_thread: Mutex::new(None),
        });
        engine.spawn_sweep_thread();
        engine
    }

    fn spawn_sweep_thread(self: &Arc<Self>) {
        let (tx, rx) = mpsc::channel();
        let weak: Weak<SessionEngine> = Arc::downgrade(self);
        let handle = std::thread::Builder::new()
            .name("devicetrust-session-sweep".into())
            .spawn(move || loop {
                match rx.recv_timeout(SWEEP_INTERVAL) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => match weak.upgrade() {
                        Some(engine) => {
                            engine.sweep_expired();
                        }
                        None => break,
                    },
                }
            })
            .expect("spawning the session sweep thread");
        *self.sweep_stop.lock().unwrap() = Some(tx);
        *self.sweep_thread.lock().unwrap() = Some(handle);
    }

    /// Stops the background sweep thread. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(tx) = self.sweep_stop.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.sweep_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Starts a client-side bind session and sends M1. `request_id` must
    /// not already be in flight (spec.md §7: `DuplicateRequest`).
    #[allow(clippy::too_many_arguments)]
    pub fn start_client_bind(
        &self,
        request_id: i64,
        group_id: &str,
        local_udid: &str,
        local_auth_id: &str,
        peer_auth_id: &str,
        peer_device_type: DeviceType,
        pin: String,
        channel: &mut dyn Channel,
    ) -> Result<SessionOutcome, SessionError> {
        let mut session = Session::new_client_bind(
            request_id,
            group_id,
            local_udid,
            local_auth_id,
            peer_auth_id,
            peer_device_type,
            pin,
            self.crypto.clone(),
            self.bind_timeout,
        );
        let outcome = session.start(channel)?;
        self.insert_new(request_id, session)?;
        Ok(translate(outcome))
    }

    /// Registers a server-side bind session that will process an inbound
    /// M1 once it arrives (via [`Self::handle_inbound`]), or once
    /// [`Self::confirm_request`] supplies the PIN if M1 arrives first.
    pub fn start_server_bind(
        &self,
        request_id: i64,
        group_id: &str,
        local_udid: &str,
        local_auth_id: &str,
        peer_device_type: DeviceType,
    ) -> Result<(), SessionError> {
        let session = Session::new_server_bind(request_id, group_id, local_udid, local_auth_id, peer_device_type, self.crypto.clone(), self.bind_timeout);
        self.insert_new(request_id, session)
    }

    /// Starts a client-side STS re-auth session and sends A1. The caller
    /// must already know the peer's stored static keys (looked up from the
    /// peer's `Device.ext`, see `api::auth_key_agree`).
    #[allow(clippy::too_many_arguments)]
    pub fn start_client_auth(
        &self,
        request_id: i64,
        group_id: &str,
        local_udid: &str,
        local_auth_id: &str,
        peer_auth_id: &str,
        peer_device_type: DeviceType,
        peer_static_x25519_pub: [u8; 32],
        peer_static_ed25519_pub: [u8; 32],
        channel: &mut dyn Channel,
    ) -> Result<SessionOutcome, SessionError> {
        let mut session = Session::new_auth(
            request_id,
            SessionRole::Client,
            group_id,
            local_udid,
            local_auth_id,
            peer_auth_id,
            peer_device_type,
            peer_static_x25519_pub,
            peer_static_ed25519_pub,
            self.crypto.clone(),
            self.auth_timeout,
        );
        let outcome = session.start(channel)?;
        self.insert_new(request_id, session)?;
        Ok(translate(outcome))
    }

    /// Supplies the PIN for a pending server-side bind, per spec.md §4.5's
    /// `confirm_request` gate: the application confirms before the
    /// session is allowed past `challenge_received`.
    pub fn confirm_request(&self, request_id: i64, pin: String, channel: &mut dyn Channel) -> Result<SessionOutcome, SessionError> {
        let mut tables = self.tables.lock().unwrap();
        let session = tables.sessions.get_mut(&request_id).ok_or(SessionError::TaskIdMismatch(request_id))?;
        let outcome = session.confirm(pin, channel)?;
        self.finish_if_terminal(&mut tables, request_id, &outcome);
        Ok(translate(outcome))
    }

    /// Feeds one inbound wire message to its session, creating a
    /// server-side session on first contact if `auto_create` names one.
    /// Returns `TaskIdMismatch` if no session exists and none was asked to
    /// be created.
    pub fn handle_inbound(
        &self,
        request_id: i64,
        bytes: &[u8],
        channel: &mut dyn Channel,
        auto_create: Option<AutoCreate>,
    ) -> Result<SessionOutcome, SessionError> {
        let mut tables = self.tables.lock().unwrap();
        if !tables.sessions.contains_key(&request_id) {
            match auto_create {
                Some(AutoCreate::Bind { group_id, local_udid, local_auth_id, peer_device_type }) => {
                    let session = Session::new_server_bind(request_id, &group_id, &local_udid, &local_auth_id, peer_device_type, self.crypto.clone(), self.bind_timeout);
                    tables.sessions.insert(request_id, session);
                }
                Some(AutoCreate::Auth {
                    group_id,
                    local_udid,
                    local_auth_id,
                    peer_auth_id,
                    peer_device_type,
                    peer_static_x25519_pub,
                    peer_static_ed25519_pub,
                }) => {
                    let session = Session::new_auth(
                        request_id,
                        SessionRole::Server,
                        &group_id,
                        &local_udid,
                        &local_auth_id,
                        &peer_auth_id,
                        peer_device_type,
                        peer_static_x25519_pub,
                        peer_static_ed25519_pub,
                        self.crypto.clone(),
                        self.auth_timeout,
                    );
                    tables.sessions.insert(request_id, session);
                }
                None => return Err(SessionError::TaskIdMismatch(request_id)),
            }
        }

        let session = tables.sessions.get_mut(&request_id).expect("inserted above or already present");
        if session.is_expired() {
            tables.sessions.remove(&request_id);
            return Err(SessionError::TimedOut);
        }
        let outcome = session.handle_inbound(bytes, channel)?;
        self.finish_if_terminal(&mut tables, request_id, &outcome);
        Ok(translate(outcome))
    }

    fn finish_if_terminal(&self, tables: &mut Tables, request_id: i64, outcome: &Outcome) {
        match outcome {
            Outcome::Bound(device) => {
                let _ = self.group_engine.complete_bind((**device).clone());
                tables.sessions.remove(&request_id);
            }
            Outcome::Authenticated(_) => {
                tables.sessions.remove(&request_id);
            }
            _ => {}
        }
    }

    fn insert_new(&self, request_id: i64, session: Session) -> Result<(), SessionError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.sessions.contains_key(&request_id) {
            return Err(SessionError::DuplicateRequest(request_id));
        }
        tables.sessions.insert(request_id, session);
        Ok(())
    }

    /// Tears down every session whose deadline has passed. Driven by the
    /// background sweep thread started in [`Self::new`]; exposed for tests
    /// that want to force a sweep without waiting out [`SWEEP_INTERVAL`].
    pub fn sweep_expired(&self) -> Vec<i64> {
        let mut tables = self.tables.lock().unwrap();
        let expired: Vec<i64> = tables.sessions.iter().filter(|(_, s)| s.is_expired()).map(|(id, _)| *id).collect();
        for id in &expired {
            tables.sessions.remove(id);
        }
        expired
    }

    pub fn in_flight_count(&self) -> usize {
        self.tables.lock().unwrap().sessions.len()
    }

    pub fn session_role(&self, request_id: i64) -> Option<SessionRole> {
        self.tables.lock().unwrap().sessions.get(&request_id).map(|s| s.role)
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn translate(outcome: Outcome) -> SessionOutcome {
    match outcome {
        Outcome::Sent => SessionOutcome::Sent,
        Outcome::AwaitingConfirmation => SessionOutcome::AwaitingConfirmation,
        Outcome::Bound(_) => SessionOutcome::Bound,
        Outcome::Authenticated(key) => SessionOutcome::Authenticated(key),
        Outcome::Ignored => SessionOutcome::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::crypto::SoftwareCryptoAdapter;
    use crate::model::DeviceType;
    use crate::store::TrustStore;

    fn engine_in(dir: &std::path::Path, bind_timeout: Duration) -> Arc<SessionEngine> {
        let mut cfg = TrustConfig::default();
        cfg.storage_path = dir.join("hcgroup.dat");
        cfg.bind_timeout = bind_timeout;
        let store = TrustStore::new(&cfg).unwrap();
        let broadcaster = Arc::new(Broadcaster::new());
        let crypto: Arc<dyn CryptoAdapter> = Arc::new(SoftwareCryptoAdapter::new());
        let group_engine = GroupEngine::new(store, broadcaster, crypto.clone());
        SessionEngine::new(crypto, group_engine, &cfg)
    }

    #[test]
    fn configured_bind_timeout_is_honored_by_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine_in(dir.path(), Duration::from_millis(10));
        sessions
            .start_server_bind(1, "group", "udid-server", "auth-server", DeviceType::Controller)
            .unwrap();
        assert_eq!(sessions.in_flight_count(), 1);

        std::thread::sleep(Duration::from_millis(30));
        let expired = sessions.sweep_expired();
        assert_eq!(expired, vec![1]);
        assert_eq!(sessions.in_flight_count(), 0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = engine_in(dir.path(), Duration::from_secs(20));
        sessions.shutdown();
        sessions.shutdown();
    }
}
