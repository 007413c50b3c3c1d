//! Extended attributes handler.
//!
//! Every status transition is written as an extended attribute on the local
//! path so that shell tools and file managers can surface sync state without
//! talking to the bus.
//!
//! ## Supported Extended Attributes
//!
//! - `user.onemount.status` - Current status enum string (see `FileStatus::as_xattr_value`)
//! - `user.onemount.error` - Diagnostic message, present only when status is `Error`

use onemount_core::domain::FileStatus;

/// Extended attribute carrying the current status enum string.
pub const XATTR_STATUS: &str = "user.onemount.status";

/// Extended attribute carrying the diagnostic message, present only on `Error`.
pub const XATTR_ERROR: &str = "user.onemount.error";

/// Returns a list of all supported extended attribute names.
///
/// Used to respond to `listxattr`. `XATTR_ERROR` is listed even when absent
/// for the current item, matching `getxattr`'s presence rule.
#[must_use]
pub fn list_xattrs() -> Vec<&'static str> {
    vec![XATTR_STATUS, XATTR_ERROR]
}

/// Gets the value of an extended attribute given an item's derived status.
///
/// # Returns
///
/// - `Some(Vec<u8>)` if the attribute is recognized and applies to this status
/// - `None` if the attribute is unrecognized, or is `XATTR_ERROR` on a
///   non-`Error` status
#[must_use]
pub fn get_xattr(status: &FileStatus, name: &str) -> Option<Vec<u8>> {
    match name {
        XATTR_STATUS => Some(status.as_xattr_value().into_bytes()),
        XATTR_ERROR => match status {
            FileStatus::Error { message } => Some(message.clone().into_bytes()),
            _ => None,
        },
        _ => None,
    }
}
