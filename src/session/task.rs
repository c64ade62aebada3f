//! The per-`request_id` handshake state machine (spec.md §4.5, §7): four
//! wire messages carry either a PIN bind or a stored-key re-auth to
//! completion. The ephemeral/static X25519 key generation this drives
//! is grounded in `crypto/key_exchange.rs` from the teacher's sibling
//! `secure-legion-core` crate; the state machine shape itself follows
//! the teacher's own `protocol/security_mode.rs` habit of modeling a
//! handshake as a small closed set of named states rather than a
//! boolean soup (spec.md §9 redesign notes keep the states, replace the
//! cipher construction).

use std::sync::Arc;
use std::time::{Duration, Instant};

use zeroize::Zeroize;

use crate::crypto::{constant_time, pake, sts, CryptoAdapter};
use crate::model::{CredentialType, Device, DeviceType};

use super::error::SessionError;
use super::message::{GroupOp, WireMessage, STEP_M1, STEP_M2, STEP_M3, STEP_M4};
use super::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Bind,
    Authenticate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    ReqSent,
    ChallengeReceived,
    KeyConfirmed,
    Finished,
}

/// Result of feeding a session one inbound message or one `start`/`confirm`
/// call.
pub enum Outcome {
    /// A reply went out; the session is still in progress.
    Sent,
    /// The server received M1 but has no PIN yet; the application must
    /// call [`Session::confirm`] before the handshake can continue.
    AwaitingConfirmation,
    /// Bind finished; the caller should persist this device row.
    Bound(Box<Device>),
    /// Re-auth finished; the derived session key is available to the
    /// caller for whatever it wants to protect next.
    Authenticated([u8; 32]),
    /// A duplicate, non-restart message was swallowed (spec.md §7:
    /// `step & 0x000F == 0` restarts; anything else repeated is ignored).
    Ignored,
}

/// One in-flight handshake. Holds no network socket — it only ever speaks
/// through whatever [`Channel`] its engine hands it.
pub struct Session {
    pub request_id: i64,
    pub role: SessionRole,
    pub op: Operation,
    pub group_id: String,
    pub local_auth_id: String,
    pub local_udid: String,
    pub peer_auth_id: String,
    pub peer_device_type: DeviceType,
    pub state: SessionState,
    pub deadline: Instant,

    crypto: Arc<dyn CryptoAdapter>,

    // Bind-only.
    pin: Option<String>,
    pending_m1: Option<WireMessage>,
    eph_key_id: String,
    local_nonce: Vec<u8>,
    transcript: Vec<u8>,
    session_key: Option<[u8; 32]>,
    peer_udid: Option<String>,
    peer_ephemeral_pub: Option<[u8; 32]>,

    // Long-term identity, established during bind and reused for re-auth.
    longterm_x25519_key_id: String,
    longterm_ed25519_key_id: String,

    // Auth (STS)-only: the peer's long-term public keys, learned during
    // the original bind and looked up by the engine from the stored
    // device row.
    peer_static_x25519_pub: Option<[u8; 32]>,
    peer_static_ed25519_pub: Option<[u8; 32]>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new_client_bind(
        request_id: i64,
        group_id: &str,
        local_udid: &str,
        local_auth_id: &str,
        peer_auth_id: &str,
        peer_device_type: DeviceType,
        pin: String,
        crypto: Arc<dyn CryptoAdapter>,
        bind_timeout: Duration,
    ) -> Self {
        Session {
            request_id,
            role: SessionRole::Client,
            op: Operation::Bind,
            group_id: group_id.to_string(),
            local_auth_id: local_auth_id.to_string(),
            local_udid: local_udid.to_string(),
            peer_auth_id: peer_auth_id.to_string(),
            peer_device_type,
            state: SessionState::Init,
            deadline: Instant::now() + bind_timeout,
            crypto,
            pin: Some(pin),
            pending_m1: None,
            eph_key_id: format!("bind-eph:{request_id}:client"),
            local_nonce: Vec::new(),
            transcript: Vec::new(),
            session_key: None,
            peer_udid: None,
            peer_ephemeral_pub: None,
            longterm_x25519_key_id: format!("device:{group_id}:{local_udid}:x25519"),
            longterm_ed25519_key_id: format!("device:{group_id}:{local_udid}:ed25519"),
            peer_static_x25519_pub: None,
            peer_static_ed25519_pub: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_server_bind(
        request_id: i64,
        group_id: &str,
        local_udid: &str,
        local_auth_id: &str,
        peer_device_type: DeviceType,
        crypto: Arc<dyn CryptoAdapter>,
        bind_timeout: Duration,
    ) -> Self {
        Session {
            request_id,
            role: SessionRole::Server,
            op: Operation::Bind,
            group_id: group_id.to_string(),
            local_auth_id: local_auth_id.to_string(),
            local_udid: local_udid.to_string(),
            peer_auth_id: String::new(),
            peer_device_type,
            state: SessionState::Init,
            deadline: Instant::now() + bind_timeout,
            crypto,
            pin: None,
            pending_m1: None,
            eph_key_id: format!("bind-eph:{request_id}:server"),
            local_nonce: Vec::new(),
            transcript: Vec::new(),
            session_key: None,
            peer_udid: None,
            peer_ephemeral_pub: None,
            longterm_x25519_key_id: format!("device:{group_id}:{local_udid}:x25519"),
            longterm_ed25519_key_id: format!("device:{group_id}:{local_udid}:ed25519"),
            peer_static_x25519_pub: None,
            peer_static_ed25519_pub: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_auth(
        request_id: i64,
        role: SessionRole,
        group_id: &str,
        local_udid: &str,
        local_auth_id: &str,
        peer_auth_id: &str,
        peer_device_type: DeviceType,
        peer_static_x25519_pub: [u8; 32],
        peer_static_ed25519_pub: [u8; 32],
        crypto: Arc<dyn CryptoAdapter>,
        auth_timeout: Duration,
    ) -> Self {
        Session {
            request_id,
            role,
            op: Operation::Authenticate,
            group_id: group_id.to_string(),
            local_auth_id: local_auth_id.to_string(),
            local_udid: local_udid.to_string(),
            peer_auth_id: peer_auth_id.to_string(),
            peer_device_type,
            state: SessionState::Init,
            deadline: Instant::now() + auth_timeout,
            crypto,
            pin: None,
            pending_m1: None,
            eph_key_id: String::new(),
            local_nonce: Vec::new(),
            transcript: Vec::new(),
            session_key: None,
            peer_udid: None,
            peer_ephemeral_pub: None,
            longterm_x25519_key_id: format!("device:{group_id}:{local_udid}:x25519"),
            longterm_ed25519_key_id: format!("device:{group_id}:{local_udid}:ed25519"),
            peer_static_x25519_pub: Some(peer_static_x25519_pub),
            peer_static_ed25519_pub: Some(peer_static_ed25519_pub),
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Exposes the long-term public keys this device established during
    /// bind, so the engine can stash them in the peer's `Device.ext` for
    /// future re-auth.
    pub fn exported_longterm_keys(&self) -> Result<([u8; 32], [u8; 32]), SessionError> {
        Ok((
            self.crypto.export_x25519_public(&self.longterm_x25519_key_id)?,
            self.crypto.export_ed25519_public(&self.longterm_ed25519_key_id)?,
        ))
    }

    /// Client-only: sends M1 and moves to `req_sent`.
    pub fn start(&mut self, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        match self.op {
            Operation::Bind => self.start_bind(channel),
            Operation::Authenticate => self.start_auth(channel),
        }
    }

    fn start_bind(&mut self, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        assert_eq!(self.role, SessionRole::Client);
        let ephemeral_pub = self.crypto.generate_x25519_keypair(&self.eph_key_id)?;
        let (longterm_x_pub, longterm_ed_pub) = {
            let x = self.crypto.generate_x25519_keypair(&self.longterm_x25519_key_id)?;
            let ed = self.crypto.generate_ed25519_keypair(&self.longterm_ed25519_key_id)?;
            (x, ed)
        };
        self.local_nonce = random_nonce(&self.crypto);

        let msg = WireMessage {
            request_id: self.request_id,
            group_op: GroupOp::MemberJoin as i32,
            step: STEP_M1,
            auth_id: Some(self.local_auth_id.clone()),
            udid: Some(self.local_udid.clone()),
            nonce: Some(hex::encode(&self.local_nonce)),
            ephemeral_pk: Some(hex::encode(ephemeral_pub)),
            static_pk: Some(hex::encode(longterm_x_pub)),
            sign_pk: Some(hex::encode(longterm_ed_pub)),
            commitment: None,
            signature: None,
            group_error_msg: None,
        };
        self.transcript = msg.to_bytes();
        channel.send(self.request_id, &self.transcript)?;
        self.state = SessionState::ReqSent;
        Ok(Outcome::Sent)
    }

    fn start_auth(&mut self, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        assert_eq!(self.role, SessionRole::Client);
        self.local_nonce = random_nonce(&self.crypto);
        let msg = WireMessage {
            request_id: self.request_id,
            group_op: GroupOp::Authenticate as i32,
            step: STEP_M1,
            auth_id: Some(self.local_auth_id.clone()),
            udid: Some(self.local_udid.clone()),
            nonce: Some(hex::encode(&self.local_nonce)),
            ephemeral_pk: None,
            static_pk: None,
            sign_pk: None,
            commitment: None,
            signature: None,
            group_error_msg: None,
        };
        self.transcript = msg.to_bytes();
        channel.send(self.request_id, &self.transcript)?;
        self.state = SessionState::ReqSent;
        Ok(Outcome::Sent)
    }

    /// Server-only: supplies the PIN once the application has confirmed
    /// the pending request, then processes any inbound M1 that was
    /// buffered waiting for it.
    pub fn confirm(&mut self, pin: String, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        self.pin = Some(pin);
        if let Some(m1) = self.pending_m1.take() {
            return self.handle_m1(&m1, channel);
        }
        Ok(Outcome::Sent)
    }

    /// Feeds one inbound wire message to the session.
    pub fn handle_inbound(&mut self, bytes: &[u8], channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        let msg = WireMessage::from_bytes(bytes)?;
        if msg.request_id != self.request_id {
            return Err(SessionError::TaskIdMismatch(msg.request_id));
        }

        let expected = self.expected_incoming_step();
        if msg.step != expected {
            if msg.step & 0x000F == 0 {
                // Restart: the peer is re-driving the handshake from
                // scratch. Reset to `init` and accept it as a fresh M1/A1.
                self.state = SessionState::Init;
                self.pending_m1 = None;
            } else {
                return Ok(Outcome::Ignored);
            }
        }

        match self.op {
            Operation::Bind => self.handle_bind_inbound(&msg, channel),
            Operation::Authenticate => self.handle_auth_inbound(&msg, channel),
        }
    }

    fn expected_incoming_step(&self) -> u32 {
        match (self.role, self.state) {
            (SessionRole::Server, SessionState::Init) => STEP_M1,
            (SessionRole::Server, SessionState::ReqSent) => STEP_M3,
            (SessionRole::Client, SessionState::ReqSent) => STEP_M2,
            (SessionRole::Client, SessionState::KeyConfirmed) => STEP_M4,
            _ => 0,
        }
    }

    fn handle_bind_inbound(&mut self, msg: &WireMessage, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        match (self.role, self.state) {
            (SessionRole::Server, SessionState::Init) => {
                if self.pin.is_none() {
                    self.pending_m1 = Some(msg.clone());
                    return Ok(Outcome::AwaitingConfirmation);
                }
                self.handle_m1(msg, channel)
            }
            (SessionRole::Client, SessionState::ReqSent) => self.handle_m2(msg, channel),
            (SessionRole::Server, SessionState::ReqSent) => self.handle_m3(msg, channel),
            (SessionRole::Client, SessionState::KeyConfirmed) => self.handle_m4(msg),
            _ => Ok(Outcome::Ignored),
        }
    }

    fn handle_m1(&mut self, msg: &WireMessage, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        let pin = self.pin.clone().expect("handle_m1 only runs once a pin is set");
        self.peer_auth_id = msg.required_str(|m| &m.auth_id, "authId")?;
        self.peer_udid = Some(msg.required_str(|m| &m.udid, "udid")?);
        let peer_nonce = hex::decode(msg.nonce.as_deref().ok_or_else(|| SessionError::BadMessage("missing nonce".into()))?)
            .map_err(|e| SessionError::BadMessage(e.to_string()))?;
        let peer_ephemeral = msg.hex_field_32(|m| &m.ephemeral_pk, "ephemeralPk")?;
        let peer_static_x = msg.hex_field_32(|m| &m.static_pk, "staticPk")?;
        let peer_static_ed = msg.hex_field_32(|m| &m.sign_pk, "signPk")?;
        self.peer_ephemeral_pub = Some(peer_ephemeral);
        self.peer_static_x25519_pub = Some(peer_static_x);
        self.peer_static_ed25519_pub = Some(peer_static_ed);
        self.transcript = msg.to_bytes();

        let ephemeral_pub = self.crypto.generate_x25519_keypair(&self.eph_key_id)?;
        let (longterm_x_pub, longterm_ed_pub) = {
            let x = self.crypto.generate_x25519_keypair(&self.longterm_x25519_key_id)?;
            let ed = self.crypto.generate_ed25519_keypair(&self.longterm_ed25519_key_id)?;
            (x, ed)
        };
        self.local_nonce = random_nonce(&self.crypto);

        let ecdh = self.crypto.ecdh_x25519(&self.eph_key_id, &peer_ephemeral)?;
        let pin_base = pake::stretch_pin(&pin, &peer_nonce)?;
        let session_key = pake::derive_session_key(self.crypto.as_ref(), &pin_base, &ecdh, &self.transcript)?;
        self.session_key = Some(session_key);
        let commitment = pake::commitment(self.crypto.as_ref(), &session_key, &self.transcript);

        let reply = WireMessage {
            request_id: self.request_id,
            group_op: GroupOp::MemberJoin as i32,
            step: STEP_M2,
            auth_id: Some(self.local_auth_id.clone()),
            udid: Some(self.local_udid.clone()),
            nonce: Some(hex::encode(&self.local_nonce)),
            ephemeral_pk: Some(hex::encode(ephemeral_pub)),
            static_pk: Some(hex::encode(longterm_x_pub)),
            sign_pk: Some(hex::encode(longterm_ed_pub)),
            commitment: Some(hex::encode(commitment)),
            signature: None,
            group_error_msg: None,
        };
        self.transcript.extend_from_slice(&reply.to_bytes());
        channel.send(self.request_id, &reply.to_bytes())?;
        self.state = SessionState::ReqSent;
        Ok(Outcome::Sent)
    }

    fn handle_m2(&mut self, msg: &WireMessage, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        let pin = self.pin.clone().expect("client bind always has a pin");
        self.peer_auth_id = msg.required_str(|m| &m.auth_id, "authId")?;
        self.peer_udid = Some(msg.required_str(|m| &m.udid, "udid")?);
        let peer_ephemeral = msg.hex_field_32(|m| &m.ephemeral_pk, "ephemeralPk")?;
        let peer_static_x = msg.hex_field_32(|m| &m.static_pk, "staticPk")?;
        let peer_static_ed = msg.hex_field_32(|m| &m.sign_pk, "signPk")?;
        let peer_commitment = msg.hex_field_32(|m| &m.commitment, "commitment")?;
        self.peer_ephemeral_pub = Some(peer_ephemeral);
        self.peer_static_x25519_pub = Some(peer_static_x);
        self.peer_static_ed25519_pub = Some(peer_static_ed);

        let mut full_transcript = self.transcript.clone();
        full_transcript.extend_from_slice(&msg.to_bytes());

        let ecdh = self.crypto.ecdh_x25519(&self.eph_key_id, &peer_ephemeral)?;
        // M2 still carries a nonce field (part of the wire format and the
        // transcript both sides sign over), but it is the *server's*
        // nonce — not the salt the server stretched the PIN with. The
        // server salted with the client's M1 nonce (`self.local_nonce`,
        // already sent and still held from `start_bind`), so the client
        // must stretch with that same nonce to derive the same key.
        if msg.nonce.is_none() {
            return Err(SessionError::BadMessage("missing nonce".into()));
        }
        let pin_base = pake::stretch_pin(&pin, &self.local_nonce)?;

        // Recompute the key with the original M1-only transcript,
        // matching the server's derivation.
        let msg1_only = &self.transcript;
        let session_key = pake::derive_session_key(self.crypto.as_ref(), &pin_base, &ecdh, msg1_only)?;
        let expected_commitment = pake::commitment(self.crypto.as_ref(), &session_key, msg1_only);
        if !constant_time::eq_32(&expected_commitment, &peer_commitment) {
            return Err(SessionError::AuthFail);
        }
        self.session_key = Some(session_key);
        self.transcript = full_transcript;

        let proof = pake::commitment(self.crypto.as_ref(), &session_key, &self.transcript);
        let reply = WireMessage {
            request_id: self.request_id,
            group_op: GroupOp::MemberJoin as i32,
            step: STEP_M3,
            auth_id: Some(self.local_auth_id.clone()),
            udid: Some(self.local_udid.clone()),
            nonce: None,
            ephemeral_pk: None,
            static_pk: None,
            sign_pk: None,
            commitment: Some(hex::encode(proof)),
            signature: None,
            group_error_msg: None,
        };
        self.transcript.extend_from_slice(&reply.to_bytes());
        channel.send(self.request_id, &reply.to_bytes())?;
        self.state = SessionState::KeyConfirmed;
        Ok(Outcome::Sent)
    }

    fn handle_m3(&mut self, msg: &WireMessage, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        let session_key = self.session_key.expect("server set its session key in handle_m1");
        let peer_proof = msg.hex_field_32(|m| &m.commitment, "commitment")?;
        let mut full_transcript = self.transcript.clone();
        full_transcript.extend_from_slice(&msg.to_bytes());
        let expected = pake::commitment(self.crypto.as_ref(), &session_key, &self.transcript);
        if !constant_time::eq_32(&expected, &peer_proof) {
            return Err(SessionError::AuthFail);
        }
        self.transcript = full_transcript;

        let reply = WireMessage {
            request_id: self.request_id,
            group_op: GroupOp::MemberJoin as i32,
            step: STEP_M4,
            auth_id: Some(self.local_auth_id.clone()),
            udid: Some(self.local_udid.clone()),
            nonce: None,
            ephemeral_pk: None,
            static_pk: None,
            sign_pk: None,
            commitment: None,
            signature: None,
            group_error_msg: None,
        };
        channel.send(self.request_id, &reply.to_bytes())?;
        self.state = SessionState::Finished;
        Ok(Outcome::Bound(Box::new(self.build_peer_device())))
    }

    fn handle_m4(&mut self, _msg: &WireMessage) -> Result<Outcome, SessionError> {
        self.state = SessionState::Finished;
        Ok(Outcome::Bound(Box::new(self.build_peer_device())))
    }

    fn build_peer_device(&self) -> Device {
        let mut ext = Vec::with_capacity(64);
        ext.extend_from_slice(&self.peer_static_x25519_pub.unwrap_or([0; 32]));
        ext.extend_from_slice(&self.peer_static_ed25519_pub.unwrap_or([0; 32]));
        Device {
            group_id: self.group_id.clone(),
            udid: self.peer_udid.clone().unwrap_or_default(),
            auth_id: self.peer_auth_id.clone(),
            user_id_hash: String::new(),
            service_type: self.group_id.clone(),
            credential_type: CredentialType::Symmetric,
            device_type: self.peer_device_type,
            last_tm: chrono::Utc::now().timestamp(),
            ext,
        }
    }

    fn handle_auth_inbound(&mut self, msg: &WireMessage, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        match (self.role, self.state) {
            (SessionRole::Server, SessionState::Init) => self.handle_a1(msg, channel),
            (SessionRole::Client, SessionState::ReqSent) => self.handle_a2(msg, channel),
            (SessionRole::Server, SessionState::ReqSent) => self.handle_a3(msg, channel),
            (SessionRole::Client, SessionState::KeyConfirmed) => self.handle_a4(msg),
            _ => Ok(Outcome::Ignored),
        }
    }

    fn handle_a1(&mut self, msg: &WireMessage, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        self.peer_auth_id = msg.required_str(|m| &m.auth_id, "authId")?;
        let peer_nonce = hex::decode(msg.nonce.as_deref().ok_or_else(|| SessionError::BadMessage("missing nonce".into()))?)
            .map_err(|e| SessionError::BadMessage(e.to_string()))?;
        self.transcript = msg.to_bytes();
        self.local_nonce = random_nonce(&self.crypto);

        let peer_static = self.peer_static_x25519_pub.ok_or_else(|| SessionError::BadMessage("no stored peer key".into()))?;
        let ecdh = self.crypto.ecdh_x25519(&self.longterm_x25519_key_id, &peer_static)?;
        let mut transcript_with_nonces = self.transcript.clone();
        transcript_with_nonces.extend_from_slice(&peer_nonce);
        let session_key = sts::derive_session_key(self.crypto.as_ref(), &ecdh, &transcript_with_nonces)?;
        self.session_key = Some(session_key);

        let signature = sts::sign_transcript(self.crypto.as_ref(), &self.longterm_ed25519_key_id, &transcript_with_nonces)?;
        let reply = WireMessage {
            request_id: self.request_id,
            group_op: GroupOp::Authenticate as i32,
            step: STEP_M2,
            auth_id: Some(self.local_auth_id.clone()),
            udid: Some(self.local_udid.clone()),
            nonce: Some(hex::encode(&self.local_nonce)),
            ephemeral_pk: None,
            static_pk: None,
            sign_pk: None,
            commitment: None,
            signature: Some(hex::encode(signature)),
            group_error_msg: None,
        };
        self.transcript = transcript_with_nonces;
        self.transcript.extend_from_slice(&reply.to_bytes());
        channel.send(self.request_id, &reply.to_bytes())?;
        self.state = SessionState::ReqSent;
        Ok(Outcome::Sent)
    }

    fn handle_a2(&mut self, msg: &WireMessage, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        self.peer_auth_id = msg.required_str(|m| &m.auth_id, "authId")?;
        let peer_nonce = hex::decode(msg.nonce.as_deref().ok_or_else(|| SessionError::BadMessage("missing nonce".into()))?)
            .map_err(|e| SessionError::BadMessage(e.to_string()))?;
        let peer_sig = msg.hex_field_64(|m| &m.signature, "signature")?;

        let peer_static = self.peer_static_x25519_pub.ok_or_else(|| SessionError::BadMessage("no stored peer key".into()))?;
        let peer_signing = self.peer_static_ed25519_pub.ok_or_else(|| SessionError::BadMessage("no stored peer signing key".into()))?;
        let ecdh = self.crypto.ecdh_x25519(&self.longterm_x25519_key_id, &peer_static)?;

        let mut transcript_with_nonces = self.transcript.clone();
        transcript_with_nonces.extend_from_slice(&peer_nonce);
        let session_key = sts::derive_session_key(self.crypto.as_ref(), &ecdh, &transcript_with_nonces)?;
        sts::verify_transcript(self.crypto.as_ref(), &peer_signing, &transcript_with_nonces, &peer_sig).map_err(|_| SessionError::AuthFail)?;
        self.session_key = Some(session_key);
        self.transcript = transcript_with_nonces;
        self.transcript.extend_from_slice(&msg.to_bytes());

        let signature = sts::sign_transcript(self.crypto.as_ref(), &self.longterm_ed25519_key_id, &self.transcript)?;
        let reply = WireMessage {
            request_id: self.request_id,
            group_op: GroupOp::Authenticate as i32,
            step: STEP_M3,
            auth_id: Some(self.local_auth_id.clone()),
            udid: Some(self.local_udid.clone()),
            nonce: None,
            ephemeral_pk: None,
            static_pk: None,
            sign_pk: None,
            commitment: None,
            signature: Some(hex::encode(signature)),
            group_error_msg: None,
        };
        channel.send(self.request_id, &reply.to_bytes())?;
        self.state = SessionState::KeyConfirmed;
        Ok(Outcome::Sent)
    }

    fn handle_a3(&mut self, msg: &WireMessage, channel: &mut dyn Channel) -> Result<Outcome, SessionError> {
        let session_key = self.session_key.expect("server derived its session key in handle_a1");
        let peer_signing = self.peer_static_ed25519_pub.expect("stored at session creation");
        let peer_sig = msg.hex_field_64(|m| &m.signature, "signature")?;
        sts::verify_transcript(self.crypto.as_ref(), &peer_signing, &self.transcript, &peer_sig).map_err(|_| SessionError::AuthFail)?;

        let reply = WireMessage {
            request_id: self.request_id,
            group_op: GroupOp::Authenticate as i32,
            step: STEP_M4,
            auth_id: Some(self.local_auth_id.clone()),
            udid: Some(self.local_udid.clone()),
            nonce: None,
            ephemeral_pk: None,
            static_pk: None,
            sign_pk: None,
            commitment: None,
            signature: None,
            group_error_msg: None,
        };
        channel.send(self.request_id, &reply.to_bytes())?;
        self.state = SessionState::Finished;
        Ok(Outcome::Authenticated(session_key))
    }

    fn handle_a4(&mut self, _msg: &WireMessage) -> Result<Outcome, SessionError> {
        self.state = SessionState::Finished;
        Ok(Outcome::Authenticated(self.session_key.expect("client derived its session key in handle_a2")))
    }
}

/// Scrubs the plaintext PIN and derived session key when a session is
/// dropped, whether it finished, timed out, or was torn down mid-handshake
/// (teacher pattern: `secure-legion-core/src/crypto/deadman.rs` zeroizes
/// in-memory key material on teardown).
impl Drop for Session {
    fn drop(&mut self) {
        if let Some(pin) = self.pin.as_mut() {
            pin.zeroize();
        }
        if let Some(key) = self.session_key.as_mut() {
            key.zeroize();
        }
    }
}

fn random_nonce(crypto: &Arc<dyn CryptoAdapter>) -> Vec<u8> {
    // `sha256` over fresh randomness doubles as this crate's "give me N
    // unpredictable bytes" primitive; the adapter has no raw RNG export
    // because nothing outside the handshake needs one.
    use rand_core::RngCore;
    let mut seed = [0u8; 32];
    rand_core::OsRng.fill_bytes(&mut seed);
    crypto.sha256(&seed).to_vec()
}
