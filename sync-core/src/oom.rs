//! Process-wide out-of-memory flag.
//!
//! Set by any component whose fallible allocation fails. Never cleared
//! automatically; the operation that hit the failure degrades (empty reply,
//! skipped snapshot) instead of aborting.

use std::sync::atomic::{AtomicBool, Ordering};

static OUT_OF_MEMORY: AtomicBool = AtomicBool::new(false);

/// Whether any allocation has failed since start (or the last [`clear_out_of_memory`]).
pub fn out_of_memory() -> bool {
    OUT_OF_MEMORY.load(Ordering::Relaxed)
}

/// Record an allocation failure.
pub fn flag_out_of_memory() {
    if !OUT_OF_MEMORY.swap(true, Ordering::Relaxed) {
        tracing::error!("allocation failed, out-of-memory flag raised");
    }
}

/// Reset the flag. Operator action only.
pub fn clear_out_of_memory() {
    OUT_OF_MEMORY.store(false, Ordering::Relaxed);
}

/// Allocate an empty buffer with room for `len` bytes, raising the flag on failure.
pub(crate) fn try_buffer(len: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    match buf.try_reserve_exact(len) {
        Ok(()) => Some(buf),
        Err(_) => {
            flag_out_of_memory();
            None
        }
    }
}
