//! Screen share: the permission protocol and the share lifecycle.

pub mod permission;
pub mod session;

pub use permission::{PendingRequest, PermissionGrant, ScreenSharePermission};
pub use session::{
    AudioStrategy, DiscoveryOutcome, LocalShareInfo, RemoteShareInfo, ScreenShareManager,
    ScreenShareSnapshot, ShareStartResult, ShareState,
};
