//! The two channel shapes a session can transmit over (spec.md §4.5 /
//! §6): a caller-supplied `on_transmit` callback, or an `open`/`send`/
//! `close` transport the session drives itself. Grounded in the
//! teacher's `transport/mod.rs`, which is explicit that its packet
//! primitives are transport-agnostic — the channel owning the socket is
//! a detail the protocol layer above never needs to know.

use super::error::SessionError;

pub trait Channel: Send {
    fn send(&mut self, request_id: i64, bytes: &[u8]) -> Result<(), SessionError>;
    fn close(&mut self) {}
}

/// Wraps a callback the caller already has wired to its own transport —
/// the session never touches sockets directly.
pub struct ServiceChannel<F: FnMut(i64, &[u8]) + Send> {
    on_transmit: F,
}

impl<F: FnMut(i64, &[u8]) + Send> ServiceChannel<F> {
    pub fn new(on_transmit: F) -> Self {
        ServiceChannel { on_transmit }
    }
}

impl<F: FnMut(i64, &[u8]) + Send> Channel for ServiceChannel<F> {
    fn send(&mut self, request_id: i64, bytes: &[u8]) -> Result<(), SessionError> {
        (self.on_transmit)(request_id, bytes);
        Ok(())
    }
}

/// Underlying transport for [`DiscoveryBusChannel`]: opened lazily on
/// first send, closed once the session tears down.
pub trait DiscoveryBusTransport: Send {
    fn open(&mut self) -> Result<(), SessionError>;
    fn send(&mut self, bytes: &[u8]) -> Result<(), SessionError>;
    fn close(&mut self);
}

pub struct DiscoveryBusChannel {
    transport: Box<dyn DiscoveryBusTransport>,
    opened: bool,
}

impl DiscoveryBusChannel {
    pub fn new(transport: Box<dyn DiscoveryBusTransport>) -> Self {
        DiscoveryBusChannel { transport, opened: false }
    }
}

impl Channel for DiscoveryBusChannel {
    fn send(&mut self, _request_id: i64, bytes: &[u8]) -> Result<(), SessionError> {
        if !self.opened {
            self.transport.open()?;
            self.opened = true;
        }
        self.transport.send(bytes)
    }

    fn close(&mut self) {
        if self.opened {
            self.transport.close();
            self.opened = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_channel_forwards_to_callback() {
        let mut seen = Vec::new();
        {
            let mut channel = ServiceChannel::new(|request_id, bytes: &[u8]| {
                seen.push((request_id, bytes.to_vec()));
            });
            channel.send(7, b"hello").unwrap();
        }
        assert_eq!(seen, vec![(7, b"hello".to_vec())]);
    }
}
