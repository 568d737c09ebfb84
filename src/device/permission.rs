/// Runtime permission to use the radio.
///
/// Asked on every scan and connect request; answers are never cached by the link.
pub trait PermissionGate: Send + Sync {
    fn can_scan(&self) -> bool;

    fn can_connect(&self) -> bool;
}

/// Desktop platforms grant access up front; denials surface as `btleplug::Error::PermissionDenied`
/// from the adapter instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn can_scan(&self) -> bool {
        true
    }

    fn can_connect(&self) -> bool {
        true
    }
}
