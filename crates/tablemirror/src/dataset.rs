//! Local dataset files: the CSV row set and its metadata JSON.
//!
//! Both are written atomically (temp file, then rename) and read back at the
//! start of the next run.

mod atomic;
mod error;
mod metadata;
mod table;

pub use error::{DatasetError, Result};
pub use metadata::{SyncMetadata, read_metadata, write_metadata};
pub use table::{Row, Table, read_table, write_table};
