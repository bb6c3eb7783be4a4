//! # hgfs
//!
//! Guest-side client core for the Host-Guest File System.
//!
//! The crate owns everything between a vnode operation and the channel to the
//! host:
//! - [`RequestPool`] - fixed set of reusable request slots and their free list
//! - [`SuperInfo`] - per-mount state and the submit/wait/wake coordinator
//! - [`Transport`] - channel abstraction, with the synchronous
//!   [`BackdoorTransport`] and the daemon-served [`DeviceTransport`]
//! - [`FileTable`] - path keyed, reference counted file state shared by all
//!   opens of the same file
//!
//! Vnode operations follow one pattern: acquire a request, populate it, submit
//! it, read the reply, drop it.
//!
//! ```ignore
//! let sip = SuperInfo::mount(BackdoorTransport::new(channel), MountOptions::default())?;
//! let intr = Interrupt::new();
//! let mut req = sip.pool().acquire(&intr)?;
//! req.prepare(HgfsOp::GetAttr, &payload)?;
//! sip.submit_and_wait(&mut req, &intr)?;
//! let reply = req.reply(GETATTR_REPLY_LEN)?;
//! ```

pub mod config;
pub mod error;
pub mod files;
pub mod interrupt;
pub mod logger;
pub mod proto;
pub mod request;
pub mod superinfo;
pub mod transport;

pub use config::MountOptions;
pub use error::{HgfsError, HgfsResult};
pub use files::{
    FileHandle, FileState, FileTable, FileType, HgfsOpenFlags, OpenFileState, OpenFlags, OpenMode,
    node_id,
};
pub use hgfs_error::Errno;
pub use interrupt::Interrupt;
pub use proto::{HgfsOp, HgfsStatus, MAX_PACKET, ReplyHeader, RequestHeader};
pub use request::{Packet, Request, RequestPool, RequestState};
pub use superinfo::SuperInfo;
pub use transport::{
    BackdoorTransport, COMMAND_PREFIX, Completions, DeviceEnd, DeviceTransport, Outcome,
    RequestRef, RpcChannel, Ticket, Transport,
};
