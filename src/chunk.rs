//! A single immutable-once-shared segment of buffered bytes (`C1`).

use bytes::{Bytes, BytesMut};

use crate::pool::{acquire_slab, release_slab};

/// The storage backing a [`Chunk`]: either a slab checked out of
/// [`SlabPool`][crate::pool::SlabPool] (mutable, tail-reusable, returned to
/// the pool on release) or caller-supplied bytes that never touch the pool.
///
/// Modeling this as an enum rather than a `from_pool: bool` flag alongside a
/// single bytes field lets the compiler enforce that only pool-sourced
/// chunks are ever handed back to `SlabPool`: there is no representable
/// state where a `Pooled` chunk lacks the `BytesMut` needed to recycle it.
enum Storage {
    /// Exclusively owned, growable in its trailing capacity, returned to
    /// `SlabPool` on release.
    Pooled(BytesMut),
    /// Immutable, reference-counted bytes. Used both for caller-supplied
    /// data and for a pool slab that has been shared (via `join`, `fetch`
    /// or `copyfrom`) and has therefore given up tail-reuse eligibility.
    Owned(Bytes),
}

/// One chunk of buffered bytes plus an optional opaque attachment.
///
/// Attachments travel with the bytes they were received alongside (for
/// example, a datagram's source address) and are never interpreted by this
/// crate.
pub struct Chunk<A> {
    storage: Storage,
    attachment: Option<A>,
}

impl<A> Chunk<A> {
    /// An empty, attachment-less chunk. Used to reset pooled queue nodes.
    pub(crate) fn empty() -> Self {
        Self { storage: Storage::Owned(Bytes::new()), attachment: None }
    }

    /// Wrap caller-supplied bytes that never interact with `SlabPool`.
    pub fn from_bytes(bytes: impl Into<Bytes>, attachment: Option<A>) -> Self {
        Self { storage: Storage::Owned(bytes.into()), attachment }
    }

    /// Check out a slab from `SlabPool` and wrap it as an empty, writable
    /// chunk ready to receive socket data.
    pub(crate) fn from_pool(attachment: Option<A>) -> Self {
        Self { storage: Storage::Pooled(acquire_slab()), attachment }
    }

    /// Wrap an already-acquired pool slab.
    pub(crate) fn from_slab(slab: BytesMut, attachment: Option<A>) -> Self {
        Self { storage: Storage::Pooled(slab), attachment }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Pooled(buf) => buf.len(),
            Storage::Owned(buf) => buf.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match &self.storage {
            Storage::Pooled(buf) => buf.as_ref(),
            Storage::Owned(buf) => buf.as_ref(),
        }
    }

    #[must_use]
    pub fn attachment(&self) -> Option<&A> {
        self.attachment.as_ref()
    }

    pub(crate) fn set_attachment(&mut self, attachment: Option<A>) {
        self.attachment = attachment;
    }

    pub(crate) fn take_attachment(&mut self) -> Option<A> {
        self.attachment.take()
    }

    /// True if this chunk still owns an exclusive, pool-sourced slab that
    /// can be grown in place (tail-reuse eligible).
    pub(crate) fn is_pool_exclusive(&self) -> bool {
        matches!(self.storage, Storage::Pooled(_))
    }

    /// Remaining writable capacity at the tail of a pool-exclusive chunk.
    /// Zero for `Owned` chunks, which can never be extended in place.
    pub(crate) fn spare_capacity(&self) -> usize {
        match &self.storage {
            Storage::Pooled(buf) => buf.capacity() - buf.len(),
            Storage::Owned(_) => 0,
        }
    }

    /// Append `data` into this chunk's trailing pool capacity. Caller must
    /// have already checked `spare_capacity() >= data.len()`.
    pub(crate) fn extend_in_place(&mut self, data: &[u8]) {
        match &mut self.storage {
            Storage::Pooled(buf) => buf.extend_from_slice(data),
            Storage::Owned(_) => unreachable!("extend_in_place on non-pooled chunk"),
        }
    }

    /// Grow this pool-exclusive chunk's logical length by `extra` bytes,
    /// writing directly into already-reserved (but logically unwritten)
    /// slab capacity, typically just filled by a `recv` syscall.
    ///
    /// # Safety
    /// Caller must guarantee that the `extra` bytes immediately following
    /// the chunk's current length have been initialized (written to) before
    /// this call, and that `extra <= spare_capacity()`.
    pub(crate) unsafe fn commit_written(&mut self, extra: usize) {
        match &mut self.storage {
            Storage::Pooled(buf) => {
                let new_len = buf.len() + extra;
                debug_assert!(new_len <= buf.capacity());
                // SAFETY: forwarded from this function's own safety contract.
                unsafe { buf.set_len(new_len) };
            }
            Storage::Owned(_) => unreachable!("commit_written on non-pooled chunk"),
        }
    }

    /// Mutable access to this pool-exclusive chunk's spare capacity, for a
    /// `recv` syscall to write into directly.
    pub(crate) fn spare_capacity_mut(&mut self) -> &mut [std::mem::MaybeUninit<u8>] {
        match &mut self.storage {
            Storage::Pooled(buf) => buf.spare_capacity_mut(),
            Storage::Owned(_) => &mut [],
        }
    }

    /// Freeze this chunk's storage into cheaply cloneable `Bytes`, giving up
    /// tail-reuse eligibility in the process. No-op if already frozen.
    pub(crate) fn freeze_in_place(&mut self) {
        if let Storage::Pooled(buf) = &mut self.storage {
            let frozen = std::mem::take(buf).freeze();
            self.storage = Storage::Owned(frozen);
        }
    }

    /// A cheap, reference-counted clone of this chunk's bytes and
    /// attachment, freezing this chunk's storage first if necessary. Used
    /// by `copyfrom` to share whole chunks between queues without copying.
    pub(crate) fn share(&mut self) -> Chunk<A>
    where
        A: Clone,
    {
        self.freeze_in_place();
        let Storage::Owned(bytes) = &self.storage else {
            unreachable!("freeze_in_place always leaves Owned storage");
        };
        Chunk { storage: Storage::Owned(bytes.clone()), attachment: self.attachment.clone() }
    }

    /// Split this chunk at `at`, returning the head as a new chunk and
    /// retaining the tail in `self`. Used when a partial chunk must be
    /// consumed or handed off. The tail keeps the original attachment; the
    /// detached head gets none (attachments travel with the last byte of a
    /// chunk, per the tail tie-break rule used throughout this crate).
    pub(crate) fn split_to(&mut self, at: usize) -> Chunk<A> {
        debug_assert!(at <= self.len());
        self.freeze_in_place();
        match &mut self.storage {
            Storage::Owned(buf) => {
                let head = buf.split_to(at);
                Chunk { storage: Storage::Owned(head), attachment: None }
            }
            Storage::Pooled(_) => unreachable!("freeze_in_place always leaves Owned storage"),
        }
    }

    /// Release this chunk's storage. Pool-exclusive slabs go back to
    /// `SlabPool`; everything else is simply dropped.
    pub(crate) fn release(self) {
        if let Storage::Pooled(buf) = self.storage {
            release_slab(buf);
        }
    }

    /// Consume this chunk, freezing it if necessary, and hand back its
    /// bytes and attachment. Used by `Buffer::next`/`Buffer::join` to hand
    /// a chunk's content to a caller outside the crate.
    pub(crate) fn into_parts(mut self) -> (Bytes, Option<A>) {
        self.freeze_in_place();
        let attachment = self.attachment.take();
        match self.storage {
            Storage::Owned(bytes) => (bytes, attachment),
            Storage::Pooled(_) => unreachable!("freeze_in_place always leaves Owned storage"),
        }
    }
}

/// A true deep copy: a `Pooled` chunk's bytes are copied out rather than
/// shared by reference count. Use [`Chunk::share`] instead when a cheap,
/// reference-counted copy is acceptable (the common case for `copyfrom`);
/// this `Clone` impl exists for callers that need full independence from
/// the source chunk's storage, matching the `Clone` trait's usual meaning.
impl<A: Clone> Clone for Chunk<A> {
    fn clone(&self) -> Self {
        match &self.storage {
            Storage::Pooled(buf) => {
                Self { storage: Storage::Owned(Bytes::copy_from_slice(buf)), attachment: self.attachment.clone() }
            }
            Storage::Owned(buf) => Self { storage: Storage::Owned(buf.clone()), attachment: self.attachment.clone() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_chunk_never_pool_exclusive() {
        let chunk: Chunk<()> = Chunk::from_bytes(&b"hello"[..], None);
        assert_eq!(chunk.len(), 5);
        assert!(!chunk.is_pool_exclusive());
        assert_eq!(chunk.spare_capacity(), 0);
    }

    #[test]
    fn pooled_chunk_reports_spare_capacity() {
        let chunk: Chunk<()> = Chunk::from_pool(None);
        assert!(chunk.is_pool_exclusive());
        assert!(chunk.spare_capacity() > 0);
        assert_eq!(chunk.len(), 0);
    }

    #[test]
    fn freeze_gives_up_exclusivity() {
        let mut chunk: Chunk<()> = Chunk::from_pool(None);
        chunk.extend_in_place(b"abc");
        chunk.freeze_in_place();
        assert!(!chunk.is_pool_exclusive());
        assert_eq!(chunk.as_slice(), b"abc");
    }

    #[test]
    fn share_bumps_refcount_not_copy() {
        let mut chunk: Chunk<u32> = Chunk::from_bytes(&b"attached"[..], Some(7));
        let shared = chunk.share();
        assert_eq!(shared.as_slice(), b"attached");
        assert_eq!(shared.attachment(), Some(&7));
    }

    #[test]
    fn split_to_detaches_head_without_attachment() {
        let mut chunk: Chunk<u32> = Chunk::from_bytes(&b"hello world"[..], Some(1));
        let head = chunk.split_to(5);
        assert_eq!(head.as_slice(), b"hello");
        assert_eq!(head.attachment(), None);
        assert_eq!(chunk.as_slice(), b" world");
        assert_eq!(chunk.attachment(), Some(&1));
    }
}
