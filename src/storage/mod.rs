//! Key-value persistence for the connection identity.
//!
//! The identity provider only needs get/set/delete with read-your-writes
//! consistency inside one process. Any medium that offers that can back it:
//! - [`MemoryStore`]: process-local, lost on exit
//! - [`FileStore`]: a single checksummed file on disk

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;

/// Minimal persistence contract for string values.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Missing keys are `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}
