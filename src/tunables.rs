//! Process-wide tuning knobs for slab size and socket loop iteration caps.
//!
//! The reference implementation kept these as plain C module statics
//! (`socket_recv_size`, `socket_recv_count`, `socket_send_count`); this is
//! the same idea rendered as a `Cell`-backed singleton. The crate is
//! single-threaded by contract (see the crate-level docs), so a bare `Cell`
//! guarded only by that discipline is appropriate here, matching the
//! reference implementation's lack of any locking around its own statics.

use std::cell::Cell;

use crate::error::{BufferError, Result};
use crate::pool::slab_pool_len;

/// Default slab payload size.
///
/// `8192 - 33` keeps parity with the reference implementation's default,
/// which subtracted the size of a `PyBytesObject` header (33 bytes on a
/// 64-bit build) from a round 8 KiB so that the underlying allocation fit a
/// single allocator size class. There's no equivalent header in this
/// rendition, but the resulting default chunk size is kept for parity.
pub const DEFAULT_SLAB_SIZE: usize = 8192 - 33;

/// Default number of `recv`/`recvfrom` iterations `SocketIO` performs per
/// call before yielding, even if the socket has more data buffered.
pub const DEFAULT_RECV_ITERATION_CAP: u32 = 8;

/// Default number of `send`/`sendto` iterations `SocketIO` performs per call
/// before yielding, even if the queue has more chunks to drain.
pub const DEFAULT_SEND_ITERATION_CAP: u32 = 8;

thread_local! {
    static SLAB_SIZE: Cell<usize> = Cell::new(DEFAULT_SLAB_SIZE);
    static RECV_ITERATION_CAP: Cell<u32> = Cell::new(DEFAULT_RECV_ITERATION_CAP);
    static SEND_ITERATION_CAP: Cell<u32> = Cell::new(DEFAULT_SEND_ITERATION_CAP);
}

/// Read and write access to the process-wide tunables (`C7` in the design).
///
/// All methods are associated functions rather than methods on an instance:
/// there is exactly one set of tunables for the whole process, matching the
/// reference implementation's module-level getters and setters.
#[derive(Debug, Clone, Copy)]
pub struct Tunables;

impl Tunables {
    /// Current slab payload size used for newly allocated pool slabs.
    #[must_use]
    pub fn slab_size() -> usize {
        SLAB_SIZE.with(Cell::get)
    }

    /// Change the slab size used for future slab allocations.
    ///
    /// Fails with [`BufferError::RuntimeConflict`] if `SlabPool` currently
    /// holds any free slabs, since those slabs were sized to the old value
    /// and mixing sizes in the free list would make pool accounting
    /// meaningless. Drain the pool (or simply avoid calling this after the
    /// pool has warmed up) before changing the size.
    pub fn set_slab_size(size: usize) -> Result<()> {
        if slab_pool_len() != 0 {
            log::warn!(
                "rejected slab_size change to {size}: SlabPool still holds {} free slabs",
                slab_pool_len()
            );
            return Err(BufferError::RuntimeConflict(
                "SlabPool is non-empty; drain it before changing slab_size".to_string(),
            ));
        }
        log::debug!("slab_size changed to {size}");
        SLAB_SIZE.with(|cell| cell.set(size));
        Ok(())
    }

    /// Current per-call iteration cap for `socket_recv`/`socket_recvfrom`.
    #[must_use]
    pub fn recv_iteration_cap() -> u32 {
        RECV_ITERATION_CAP.with(Cell::get)
    }

    /// Change the per-call iteration cap for `socket_recv`/`socket_recvfrom`.
    pub fn set_recv_iteration_cap(cap: u32) {
        RECV_ITERATION_CAP.with(|cell| cell.set(cap));
    }

    /// Current per-call iteration cap for `socket_send`/`socket_sendto`.
    #[must_use]
    pub fn send_iteration_cap() -> u32 {
        SEND_ITERATION_CAP.with(Cell::get)
    }

    /// Change the per-call iteration cap for `socket_send`/`socket_sendto`.
    pub fn set_send_iteration_cap(cap: u32) {
        SEND_ITERATION_CAP.with(|cell| cell.set(cap));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{acquire_slab, drain_slab_pool_for_test, release_slab};

    #[test]
    fn default_slab_size_matches_constant() {
        assert_eq!(Tunables::slab_size(), DEFAULT_SLAB_SIZE);
    }

    #[test]
    fn set_slab_size_rejected_while_pool_warm() {
        drain_slab_pool_for_test();
        let slab = acquire_slab();
        release_slab(slab);
        assert!(slab_pool_len() > 0);

        let err = Tunables::set_slab_size(4096).unwrap_err();
        assert!(matches!(err, BufferError::RuntimeConflict(_)));

        drain_slab_pool_for_test();
        assert!(Tunables::set_slab_size(DEFAULT_SLAB_SIZE).is_ok());
    }
}
