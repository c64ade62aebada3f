//! Registry of authentication variants and the version-bitmask negotiation
//! between them (spec.md §4.5). Grounded in the teacher's
//! `protocol/security_mode.rs`, which also resolves to one concrete mode
//! (`Direct`/`Relay`/`Auto`) out of a small fixed set rather than
//! threading an enum through the whole call stack; here the set is
//! bind/auth variants and the resolution rule is a bitmask intersection
//! instead of a default fallback.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Bind,
    Authenticate,
}

/// A concrete auth variant this crate can run. `DasDevicePake{V1,V2}`
/// drive the PIN bind; `AccountPakeV2` drives stored-key re-auth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVariant {
    DasDevicePakeV1,
    DasDevicePakeV2,
    AccountPakeV2,
}

const ALL_VARIANTS: [AuthVariant; 3] = [AuthVariant::DasDevicePakeV1, AuthVariant::DasDevicePakeV2, AuthVariant::AccountPakeV2];

impl AuthVariant {
    pub fn version_no(&self) -> u32 {
        match self {
            AuthVariant::DasDevicePakeV1 => 0b001,
            AuthVariant::DasDevicePakeV2 => 0b010,
            AuthVariant::AccountPakeV2 => 0b100,
        }
    }

    /// This crate's `SoftwareCryptoAdapter` backs every variant; a real
    /// deployment gated by hardware capability would return `false` for
    /// variants the platform key store can't back.
    pub fn is_supported(&self) -> bool {
        true
    }

    pub fn supports_op(&self, op: Operation) -> bool {
        match (self, op) {
            (AuthVariant::DasDevicePakeV1, Operation::Bind) => true,
            (AuthVariant::DasDevicePakeV2, Operation::Bind) => true,
            (AuthVariant::AccountPakeV2, Operation::Authenticate) => true,
            _ => false,
        }
    }
}

/// Registry of locally supported auth variants.
pub struct AuthModule {
    variants: Vec<AuthVariant>,
}

impl Default for AuthModule {
    fn default() -> Self {
        AuthModule {
            variants: ALL_VARIANTS.iter().copied().filter(AuthVariant::is_supported).collect(),
        }
    }
}

impl AuthModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bitmask advertised to a peer during negotiation.
    pub fn local_mask(&self) -> u32 {
        self.variants.iter().fold(0, |mask, v| mask | v.version_no())
    }

    /// Picks the first locally supported variant that both sides have a
    /// bit set for and that covers `op`. `None` means negotiation failed
    /// and the session should fail with `AuthFail`.
    pub fn negotiate(&self, peer_mask: u32, op: Operation) -> Option<AuthVariant> {
        self.variants
            .iter()
            .copied()
            .find(|v| v.version_no() & peer_mask != 0 && v.supports_op(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiates_bind_variant_when_peer_supports_it() {
        let module = AuthModule::new();
        let peer_mask = AuthVariant::DasDevicePakeV2.version_no();
        assert_eq!(module.negotiate(peer_mask, Operation::Bind), Some(AuthVariant::DasDevicePakeV2));
    }

    #[test]
    fn no_match_when_peer_mask_covers_nothing_supported() {
        let module = AuthModule::new();
        assert_eq!(module.negotiate(0, Operation::Bind), None);
    }

    #[test]
    fn account_variant_does_not_cover_bind() {
        let module = AuthModule::new();
        let peer_mask = AuthVariant::AccountPakeV2.version_no();
        assert_eq!(module.negotiate(peer_mask, Operation::Bind), None);
    }
}
