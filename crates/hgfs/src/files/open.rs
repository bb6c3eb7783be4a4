//! Per-open state and open flag translation.

use bitflags::bitflags;
use hgfs_utils::SetOnce;
use linux_raw_sys::general::{O_APPEND, O_CREAT, O_EXCL, O_RDWR, O_TRUNC, O_WRONLY};

use super::table::FileHandle;
use crate::error::{HgfsError, HgfsResult};

bitflags! {
    /// Open flags as passed to the open system call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRITE = O_WRONLY;
        const READ_WRITE = O_RDWR;
        const CREATE = O_CREAT;
        const EXCLUSIVE = O_EXCL;
        const TRUNCATE = O_TRUNC;
        const APPEND = O_APPEND;
    }
}

/// Access mode sent to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum OpenMode {
    ReadOnly = 0,
    WriteOnly = 1,
    ReadWrite = 2,
}

impl TryFrom<OpenFlags> for OpenMode {
    type Error = HgfsError;

    fn try_from(flags: OpenFlags) -> HgfsResult<Self> {
        match (
            flags.contains(OpenFlags::WRITE),
            flags.contains(OpenFlags::READ_WRITE),
        ) {
            (false, false) => Ok(Self::ReadOnly),
            (true, false) => Ok(Self::WriteOnly),
            (false, true) => Ok(Self::ReadWrite),
            (true, true) => Err(HgfsError::InvalidArgument),
        }
    }
}

/// Creation disposition sent to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum HgfsOpenFlags {
    /// Open an existing file
    Open = 0,
    /// Open an existing file and truncate it
    OpenEmpty = 1,
    /// Open, creating the file if missing
    OpenOrCreate = 2,
    /// Open and truncate, creating the file if missing
    OpenEmptyOrCreate = 3,
    /// Create a new file, failing if it exists
    CreateSafe = 4,
}

impl From<OpenFlags> for HgfsOpenFlags {
    fn from(flags: OpenFlags) -> Self {
        let create = flags.contains(OpenFlags::CREATE);
        let truncate = flags.contains(OpenFlags::TRUNCATE);
        if create && flags.contains(OpenFlags::EXCLUSIVE) {
            Self::CreateSafe
        } else if create && truncate {
            Self::OpenEmptyOrCreate
        } else if create {
            Self::OpenOrCreate
        } else if truncate {
            Self::OpenEmpty
        } else {
            Self::Open
        }
    }
}

/// State of one open instance of a file.
///
/// The host handle and the access mode are each assigned once per open and
/// cleared again at close.
#[derive(Debug)]
pub struct OpenFileState {
    handle: SetOnce<u32>,
    mode: SetOnce<OpenMode>,
    file: FileHandle,
}

impl OpenFileState {
    pub fn new(file: FileHandle) -> Self {
        Self {
            handle: SetOnce::new(),
            mode: SetOnce::new(),
            file,
        }
    }

    pub fn file(&self) -> &FileHandle {
        &self.file
    }

    pub fn set_handle(&self, handle: u32) -> HgfsResult<()> {
        self.handle.set(handle).map_err(|_| {
            log::warn!("hgfs: {} already has a host handle", self.file.path());
            HgfsError::AlreadySet
        })
    }

    pub fn handle(&self) -> HgfsResult<u32> {
        self.handle.get().ok_or(HgfsError::NotSet)
    }

    pub fn clear_handle(&self) -> HgfsResult<u32> {
        self.handle.clear().ok_or(HgfsError::NotSet)
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_set()
    }

    pub fn set_mode(&self, mode: OpenMode) -> HgfsResult<()> {
        self.mode.set(mode).map_err(|_| HgfsError::AlreadySet)
    }

    pub fn mode(&self) -> HgfsResult<OpenMode> {
        self.mode.get().ok_or(HgfsError::NotSet)
    }

    pub fn clear_mode(&self) -> HgfsResult<OpenMode> {
        self.mode.clear().ok_or(HgfsError::NotSet)
    }

    pub fn has_mode(&self) -> bool {
        self.mode.is_set()
    }
}
