//! HGFS packet framing.
//!
//! Only the parts of the wire format the request core depends on live here:
//! the fixed packet ceiling, the request and reply headers that carry the
//! correlation id, the opcode and status tables, and reply validation.
//! Operation payloads are the vnode layer's business.

use core::fmt;

use hgfs_error::Errno;
use linux_raw_sys::errno::{
    EACCES, EBADF, EEXIST, EINVAL, EIO, ENAMETOOLONG, ENOENT, ENOSPC, ENOTDIR, ENOTEMPTY,
    EOPNOTSUPP, EPERM, EPROTO, EXDEV,
};

use crate::error::{HgfsError, HgfsResult};

/// Largest packet either side of a transport will produce.
pub const MAX_PACKET: usize = 6144;
/// Encoded size of [`RequestHeader`].
pub const REQUEST_HEADER_LEN: usize = 8;
/// Encoded size of [`ReplyHeader`].
pub const REPLY_HEADER_LEN: usize = 8;

/// Operation codes understood by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum HgfsOp {
    Open = 0,
    Read = 1,
    Write = 2,
    Close = 3,
    SearchOpen = 4,
    SearchRead = 5,
    SearchClose = 6,
    GetAttr = 7,
    SetAttr = 8,
    CreateDir = 9,
    DeleteFile = 10,
    DeleteDir = 11,
    Rename = 12,
    QueryVolumeInfo = 13,
}

impl TryFrom<u32> for HgfsOp {
    type Error = HgfsError;

    fn try_from(value: u32) -> HgfsResult<Self> {
        Ok(match value {
            0 => Self::Open,
            1 => Self::Read,
            2 => Self::Write,
            3 => Self::Close,
            4 => Self::SearchOpen,
            5 => Self::SearchRead,
            6 => Self::SearchClose,
            7 => Self::GetAttr,
            8 => Self::SetAttr,
            9 => Self::CreateDir,
            10 => Self::DeleteFile,
            11 => Self::DeleteDir,
            12 => Self::Rename,
            13 => Self::QueryVolumeInfo,
            _ => return Err(HgfsError::Protocol),
        })
    }
}

/// Status codes carried in every reply header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum HgfsStatus {
    Success = 0,
    NoSuchFileOrDir = 1,
    InvalidHandle = 2,
    OperationNotPermitted = 3,
    FileExists = 4,
    NotDirectory = 5,
    DirNotEmpty = 6,
    ProtocolError = 7,
    AccessDenied = 8,
    InvalidName = 9,
    GenericError = 10,
    SharingViolation = 11,
    NoSpace = 12,
    OperationNotSupported = 13,
    NameTooLong = 14,
    InvalidParameter = 15,
    NotSameDevice = 16,
}

impl HgfsStatus {
    /// Decode a raw status. A code outside the table means the host speaks a
    /// protocol revision we do not, which is a protocol error.
    pub fn from_raw(raw: u32) -> HgfsResult<Self> {
        Ok(match raw {
            0 => Self::Success,
            1 => Self::NoSuchFileOrDir,
            2 => Self::InvalidHandle,
            3 => Self::OperationNotPermitted,
            4 => Self::FileExists,
            5 => Self::NotDirectory,
            6 => Self::DirNotEmpty,
            7 => Self::ProtocolError,
            8 => Self::AccessDenied,
            9 => Self::InvalidName,
            10 => Self::GenericError,
            11 => Self::SharingViolation,
            12 => Self::NoSpace,
            13 => Self::OperationNotSupported,
            14 => Self::NameTooLong,
            15 => Self::InvalidParameter,
            16 => Self::NotSameDevice,
            _ => return Err(HgfsError::Protocol),
        })
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Fail with [`HgfsError::Host`] unless the status is `Success`.
    pub fn check(self) -> HgfsResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(HgfsError::Host(self))
        }
    }
}

impl Errno for HgfsStatus {
    fn errno(&self) -> u32 {
        match self {
            Self::Success => 0,
            Self::NoSuchFileOrDir | Self::InvalidName => ENOENT,
            Self::InvalidHandle => EBADF,
            Self::OperationNotPermitted => EPERM,
            Self::FileExists => EEXIST,
            Self::NotDirectory => ENOTDIR,
            Self::DirNotEmpty => ENOTEMPTY,
            Self::ProtocolError => EPROTO,
            Self::AccessDenied | Self::SharingViolation => EACCES,
            Self::NoSpace => ENOSPC,
            Self::OperationNotSupported => EOPNOTSUPP,
            Self::NameTooLong => ENAMETOOLONG,
            Self::InvalidParameter => EINVAL,
            Self::NotSameDevice => EXDEV,
            Self::GenericError => EIO,
        }
    }
}

impl fmt::Display for HgfsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host status {:?} ({})", self, *self as u32)
    }
}

/// Header at the start of every request packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    pub id: u32,
    pub op: HgfsOp,
}

impl RequestHeader {
    pub const fn new(id: u32, op: HgfsOp) -> Self {
        Self { id, op }
    }

    pub fn encode_into(self, buf: &mut [u8]) -> HgfsResult<()> {
        let header = buf
            .get_mut(..REQUEST_HEADER_LEN)
            .ok_or(HgfsError::InvalidArgument)?;
        header[0..4].copy_from_slice(&self.id.to_le_bytes());
        header[4..8].copy_from_slice(&(self.op as u32).to_le_bytes());
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> HgfsResult<Self> {
        let (id, op) = split_header(bytes)?;
        Ok(Self {
            id,
            op: HgfsOp::try_from(op)?,
        })
    }
}

/// Header at the start of every reply packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyHeader {
    pub id: u32,
    pub status: HgfsStatus,
}

impl ReplyHeader {
    pub const fn new(id: u32, status: HgfsStatus) -> Self {
        Self { id, status }
    }

    pub fn encode_into(self, buf: &mut [u8]) -> HgfsResult<()> {
        let header = buf
            .get_mut(..REPLY_HEADER_LEN)
            .ok_or(HgfsError::InvalidArgument)?;
        header[0..4].copy_from_slice(&self.id.to_le_bytes());
        header[4..8].copy_from_slice(&(self.status as u32).to_le_bytes());
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> HgfsResult<Self> {
        let (id, status) = split_header(bytes)?;
        Ok(Self {
            id,
            status: HgfsStatus::from_raw(status)?,
        })
    }
}

fn split_header(bytes: &[u8]) -> HgfsResult<(u32, u32)> {
    let Some(header) = bytes.get(..8) else {
        return Err(HgfsError::Protocol);
    };
    let first = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let second = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    Ok((first, second))
}

/// Validate a reply to request `expected_id`.
///
/// A reply must carry a header with the issuing request's id. A non-success
/// status is returned as [`HgfsError::Host`] before the size check because
/// failure replies are allowed to be header-only. `min_size` counts the
/// header.
pub fn validate_reply(reply: &[u8], expected_id: u32, min_size: usize) -> HgfsResult<ReplyHeader> {
    if reply.len() > MAX_PACKET {
        log::warn!("hgfs: reply of {} bytes exceeds packet maximum", reply.len());
        return Err(HgfsError::Protocol);
    }
    let header = ReplyHeader::decode(reply)?;
    if header.id != expected_id {
        log::warn!(
            "hgfs: reply id {} does not match request {}",
            header.id,
            expected_id
        );
        return Err(HgfsError::Protocol);
    }
    header.status.check()?;
    if reply.len() < min_size {
        log::warn!(
            "hgfs: reply for request {} too short ({} < {})",
            expected_id,
            reply.len(),
            min_size
        );
        return Err(HgfsError::Protocol);
    }
    Ok(header)
}

/// Fixed-size replies must match their structure size exactly.
pub fn expect_exact_size(reply: &[u8], size: usize) -> HgfsResult<()> {
    if reply.len() == size {
        Ok(())
    } else {
        log::warn!("hgfs: reply is {} bytes, expected {}", reply.len(), size);
        Err(HgfsError::Protocol)
    }
}

/// Trace a packet. Only produces output with the `verbose-requests` feature.
#[cfg(feature = "verbose-requests")]
pub fn dump(label: &str, id: u32, bytes: &[u8]) {
    use hgfs_utils::hex::{BYTES_PER_LINE, LINE_LEN, dump_line};

    log::trace!("hgfs: {} id={} len={}", label, id, bytes.len());
    let mut line = [0u8; LINE_LEN];
    for (i, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        log::trace!("  {}", dump_line(i * BYTES_PER_LINE, chunk, &mut line));
    }
}

#[cfg(not(feature = "verbose-requests"))]
#[inline]
pub fn dump(_label: &str, _id: u32, _bytes: &[u8]) {}
