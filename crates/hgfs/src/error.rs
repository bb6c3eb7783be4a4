//! Error types for the HGFS client core.
//!
//! Every failure is classified so the vnode layer can hand the right errno
//! back to the system call: a host that refused an operation (`Host`) is not
//! the same as a host that sent something unparseable (`Protocol`), and
//! neither is the same as a channel that is simply not there (`Io`).

use hgfs_error::define_hgfs_error;
use linux_raw_sys::errno::{EBADF, EBUSY, EEXIST, EINTR, EINVAL, EIO, ENODEV, EPROTO};

use crate::proto::HgfsStatus;

define_hgfs_error! {
    /// Failures surfaced by the request core.
    pub enum HgfsError(0x48) {
        /// Waiting thread was interrupted before the reply arrived (EINTR)
        Interrupted = 0x01 => "Interrupted while waiting for the host" errno(EINTR),
        /// Request rejected because the file system is unmounted (ENODEV)
        NoDevice = 0x02 => "File system is not mounted" errno(ENODEV),
        /// Channel to the host could not be opened or dispatched (EIO)
        Io = 0x03 => "Transport unavailable" errno(EIO),
        /// Reply too short, too long, or for the wrong request (EPROTO)
        Protocol = 0x04 => "Malformed reply from host" errno(EPROTO),
        /// Files are still open at unmount (EBUSY)
        Busy = 0x05 => "File system busy" errno(EBUSY),
        /// Caller passed something unusable (EINVAL)
        InvalidArgument = 0x06 => "Invalid argument" errno(EINVAL),
        /// Single-assignment value was already set (EEXIST)
        AlreadySet = 0x07 => "Value already set" errno(EEXIST),
        /// Single-assignment value was read before being set (EBADF)
        NotSet = 0x08 => "Value not set" errno(EBADF),
        /// Host answered with a non-success status
        Host(HgfsStatus) = 0x09 => "Host returned an error status",
    }
}

/// Result type for HGFS client operations
pub type HgfsResult<T> = Result<T, HgfsError>;
