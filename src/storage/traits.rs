use anyhow::Result;

use super::{ContentId, MirrorState};

/// Read access to blob contents held by an object store.
///
/// Implementations must be shareable across the concurrent writers of the
/// materializer.
pub trait BlobSource: Send + Sync {
    /// Read a blob's bytes.
    /// Returns Ok(None) if the store does not hold the object.
    fn read_blob(&self, id: &ContentId) -> Result<Option<Vec<u8>>>;
}

/// Trait for mutable bookkeeping kept next to the objects
pub trait MutableState {
    /// Read the current state.
    /// Returns default state if none exists.
    fn read_state(&self) -> Result<MirrorState>;

    /// Atomically write new state.
    /// Implementation should ensure atomicity (temp file + rename or equivalent).
    fn write_state(&self, state: &MirrorState) -> Result<()>;

    /// Atomically update state using a closure.
    fn update_state<F>(&self, update_fn: F) -> Result<()>
    where
        F: FnOnce(&mut MirrorState) -> Result<()>,
    {
        let mut state = self.read_state()?;
        update_fn(&mut state)?;
        self.write_state(&state)
    }
}
