//! Path keyed file table.
//!
//! Every open of the same path shares one [`FileState`]. The table stores
//! weak references only: a file's reference count is the number of live
//! [`FileHandle`]s, and the last handle to go removes the entry. Creation and
//! lookup happen in one critical section, and removal only drops an entry
//! whose state is dead, so a lookup racing with the last release either
//! revives nothing or installs a fresh state that the release leaves alone.

use std::sync::{Arc, Weak};

use hgfs_utils::{HashMap, Mutex};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::node_id::node_id;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

type Entries = Mutex<HashMap<String, Weak<FileState>>>;

/// Shared per-path file state.
pub struct FileState {
    path: String,
    node_id: u64,
    file_type: FileType,
    /// Serializes reads against writes on this file.
    io: RwLock<()>,
    table: Weak<Entries>,
}

impl FileState {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.io.read()
    }

    pub fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.io.write()
    }
}

impl core::fmt::Debug for FileState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileState")
            .field("path", &self.path)
            .field("node_id", &format_args!("{:#x}", self.node_id))
            .field("file_type", &self.file_type)
            .finish_non_exhaustive()
    }
}

impl Drop for FileState {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut entries = table.lock();
        // A concurrent get_or_create may already have replaced the entry.
        if entries
            .get(&self.path)
            .is_some_and(|weak| weak.strong_count() == 0)
        {
            entries.remove(&self.path);
            log::trace!("hgfs: file {} dropped from table", self.path);
        }
    }
}

/// One reference to a [`FileState`].
#[derive(Clone, Debug)]
pub struct FileHandle(Arc<FileState>);

impl FileHandle {
    /// References currently held on this file, this one included.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn same_file(&self, other: &FileHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl core::ops::Deref for FileHandle {
    type Target = FileState;

    fn deref(&self) -> &FileState {
        &self.0
    }
}

/// Table of files currently referenced on one mount.
pub struct FileTable {
    entries: Arc<Entries>,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reference the state for `path`, creating it if nobody holds it.
    pub fn get_or_create(&self, path: &str, file_type: FileType) -> FileHandle {
        let mut entries = self.entries.lock();
        if let Some(state) = entries.get(path).and_then(Weak::upgrade) {
            if state.file_type != file_type {
                log::debug!(
                    "hgfs: {} looked up as {:?}, cached as {:?}",
                    path,
                    file_type,
                    state.file_type
                );
            }
            return FileHandle(state);
        }
        let state = Arc::new(FileState {
            path: path.to_owned(),
            node_id: node_id(path),
            file_type,
            io: RwLock::new(()),
            table: Arc::downgrade(&self.entries),
        });
        entries.insert(path.to_owned(), Arc::downgrade(&state));
        log::trace!("hgfs: file {} added, node {:#x}", path, state.node_id);
        FileHandle(state)
    }

    /// Reference the state for `path` only if it already exists.
    pub fn lookup(&self, path: &str) -> Option<FileHandle> {
        self.entries
            .lock()
            .get(path)
            .and_then(Weak::upgrade)
            .map(FileHandle)
    }

    /// Drop one reference. Equivalent to dropping the handle.
    pub fn release(&self, file: FileHandle) {
        drop(file);
    }

    /// True when no file is referenced apart from `root`, which may hold
    /// exactly one standing reference.
    pub fn is_empty(&self, root: &FileHandle) -> bool {
        let entries = self.entries.lock();
        entries.iter().all(|(path, weak)| match weak.strong_count() {
            0 => true,
            1 => path == root.path() && core::ptr::eq(weak.as_ptr(), Arc::as_ptr(&root.0)),
            _ => false,
        })
    }

    /// Number of paths with live state.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Log every live entry at debug level.
    pub fn dump(&self) {
        let entries = self.entries.lock();
        log::debug!("hgfs: file table, {} entries", entries.len());
        for (path, weak) in entries.iter() {
            log::debug!("  {} refs={}", path, weak.strong_count());
        }
    }
}
