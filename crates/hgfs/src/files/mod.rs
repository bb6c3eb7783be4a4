//! File state shared across opens.
//!
//! - `table` - path keyed table of reference counted [`FileState`]
//! - `open` - per-open handle and mode, open flag translation
//! - `node_id` - stable node number derived from the path

mod node_id;
mod open;
mod table;

pub use node_id::node_id;
pub use open::{HgfsOpenFlags, OpenFileState, OpenFlags, OpenMode};
pub use table::{FileHandle, FileState, FileTable, FileType};
