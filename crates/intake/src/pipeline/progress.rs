//! Progress checkpoints reported to the live view.
//!
//! Progress is presentation only. Status is never derived from it.

use crate::queue::item::RemoteStatus;

pub const UPLOAD_STARTED: u8 = 10;
pub const UPLOADED: u8 = 40;
pub const RECORD_CREATED: u8 = 60;
pub const REMOTE_PENDING: u8 = 70;
pub const REMOTE_PROCESSING: u8 = 85;
pub const COMPLETE: u8 = 100;

/// Progress estimate for a remote status seen while polling.
pub fn estimate_remote(remote: RemoteStatus) -> u8 {
    match remote {
        RemoteStatus::Pending => REMOTE_PENDING,
        RemoteStatus::Processing => REMOTE_PROCESSING,
        RemoteStatus::Completed | RemoteStatus::Failed => COMPLETE,
    }
}
