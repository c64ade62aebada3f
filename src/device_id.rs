//! The local hardware-id collaborator (spec.md §4.4): this crate never
//! reads real hardware identifiers itself, matching how `CryptoAdapter`
//! stays behind a trait rather than an OS keystore FFI.

/// Supplies this device's own 64-char hex `udid`.
pub trait DeviceIdProvider: Send + Sync {
    fn device_id(&self) -> String;
}

/// Fallback used when the embedding application never supplies a real
/// [`DeviceIdProvider`] (spec.md §4.4). Fixed, recognizable, and never
/// mistaken for a real hardware id.
pub struct PlaceholderDeviceId;

const PLACEHOLDER_UDID: &str = "ABCDEF00ABCDEF00ABCDEF00ABCDEF00ABCDEF00ABCDEF00ABCDEF00ABCDEF00";

impl DeviceIdProvider for PlaceholderDeviceId {
    fn device_id(&self) -> String {
        PLACEHOLDER_UDID.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_64_hex_chars() {
        let id = PlaceholderDeviceId.device_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
