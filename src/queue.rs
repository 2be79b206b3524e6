//! The singly-linked chunk queue (`C4`) underlying [`Buffer`][crate::buffer::Buffer].

use bytes::{Bytes, BytesMut};

use crate::chunk::Chunk;
use crate::error::{BufferError, Result};
use crate::pool::NodePool;

/// Minimum spare tail capacity, in bytes, required before a `recv` call is
/// allowed to extend the queue's current tail chunk in place rather than
/// allocating a fresh slab. Below this threshold the per-syscall overhead
/// of a short recv isn't worth saving an allocation.
///
/// Matches the reference implementation's own threshold for reusing the
/// trailing space of the last buffer in its `BufferQueue` before falling
/// back to a new allocation.
pub(crate) const TAIL_REUSE_THRESHOLD: usize = 256;

/// One cell in the queue's internal linked list: a chunk plus a link to the
/// next cell. Recyclable independently of the [`Chunk`] it holds, via
/// [`NodePool`].
pub struct QueueNode<A> {
    chunk: Chunk<A>,
    next: Option<Box<QueueNode<A>>>,
}

impl<A> QueueNode<A> {
    pub(crate) fn empty() -> Self {
        Self { chunk: Chunk::empty(), next: None }
    }

    pub(crate) fn reset(&mut self) {
        self.chunk = Chunk::empty();
        self.next = None;
    }
}

/// A FIFO queue of [`Chunk`]s forming one logical byte stream.
///
/// `ChunkQueue` is the data structure; [`Buffer`][crate::buffer::Buffer] is
/// the public-facing façade most callers should use. `ChunkQueue` is kept
/// `pub` because `Buffer` is a thin wrapper around exactly one queue and
/// some callers may want the lower-level type directly (for example, to
/// build a custom façade with different pooling policy).
pub struct ChunkQueue<A> {
    head: Option<Box<QueueNode<A>>>,
    tail: *mut QueueNode<A>,
    head_offset: usize,
    total_len: usize,
    nodes: NodePool<A>,
}

impl<A> ChunkQueue<A> {
    /// An empty queue with a private, default-capacity node pool.
    #[must_use]
    pub fn new() -> Self {
        Self::with_node_pool(NodePool::new())
    }

    /// An empty queue that recycles queue-node cells through `nodes`
    /// instead of a private pool. Pass a pool shared (via your own
    /// `Rc<RefCell<_>>` or similar) across multiple queues of the same
    /// attachment type to pool node cells across them.
    #[must_use]
    pub fn with_node_pool(nodes: NodePool<A>) -> Self {
        Self { head: None, tail: std::ptr::null_mut(), head_offset: 0, total_len: 0, nodes }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.total_len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// Number of free node cells in this queue's node pool.
    #[must_use]
    pub fn node_pool_len(&self) -> usize {
        self.nodes.len()
    }

    fn push_node(&mut self, mut node: Box<QueueNode<A>>) {
        node.next = None;
        let raw: *mut QueueNode<A> = &mut *node;
        if self.tail.is_null() {
            debug_assert!(self.head.is_none());
            self.head = Some(node);
        } else {
            // SAFETY: `self.tail` always points at the last node reachable
            // from `self.head`'s owning chain, or is null when the chain is
            // empty (checked above). The node it points to is kept alive by
            // that chain, not by this raw pointer.
            unsafe { (*self.tail).next = Some(node) };
        }
        self.tail = raw;
    }

    fn pop_node(&mut self) -> Option<Box<QueueNode<A>>> {
        let mut node = self.head.take()?;
        self.head = node.next.take();
        if self.head.is_none() {
            self.tail = std::ptr::null_mut();
        }
        Some(node)
    }

    /// Append `data` as one or more new chunks at the tail, tagging the
    /// final chunk written with `attachment`.
    ///
    /// If the current tail chunk is pool-exclusive and has at least
    /// [`TAIL_REUSE_THRESHOLD`] bytes of spare capacity, `data` (or the
    /// portion of it that fits) is appended in place rather than allocating
    /// a new chunk node.
    pub fn write(&mut self, data: &[u8], attachment: Option<A>) {
        if data.is_empty() {
            return;
        }
        let mut remaining = data;
        if let Some(tail_ptr) = self.tail_ptr_mut() {
            let spare = tail_ptr.chunk.spare_capacity();
            if tail_ptr.chunk.is_pool_exclusive() && spare >= TAIL_REUSE_THRESHOLD {
                let take = remaining.len().min(spare);
                tail_ptr.chunk.extend_in_place(&remaining[..take]);
                remaining = &remaining[take..];
                self.total_len += take;
            }
        }
        if !remaining.is_empty() {
            let mut node = self.nodes.acquire();
            node.chunk = Chunk::from_bytes(Bytes::copy_from_slice(remaining), None);
            self.total_len += remaining.len();
            self.push_node(node);
        }
        if let Some(tail_ptr) = self.tail_ptr_mut() {
            tail_ptr.chunk.set_attachment(attachment);
        }
    }

    /// Append an already-constructed chunk at the tail. Used by `SocketIO`
    /// after a `recv` syscall has filled a pool slab.
    pub(crate) fn push_chunk(&mut self, chunk: Chunk<A>) {
        self.total_len += chunk.len();
        let mut node = self.nodes.acquire();
        node.chunk = chunk;
        self.push_node(node);
    }

    fn tail_ptr_mut(&mut self) -> Option<&mut QueueNode<A>> {
        if self.tail.is_null() {
            None
        } else {
            // SAFETY: see push_node.
            Some(unsafe { &mut *self.tail })
        }
    }

    /// Remove `k` bytes from the head and append them to `data`. Returns the
    /// number of bytes actually moved, which is always `min(k, self.len())`.
    ///
    /// This is the low-level primitive behind [`Self::read`]; unlike
    /// `read`, `consume` never fails and always moves as many bytes as are
    /// available, even if that's fewer than `k`.
    pub fn consume(&mut self, k: usize, data: &mut Vec<u8>) -> usize {
        let mut remaining = k.min(self.total_len);
        let moved = remaining;
        while remaining > 0 {
            let Some(mut node) = self.pop_node() else { break };
            let available = node.chunk.len() - self.head_offset;
            if available <= remaining {
                data.extend_from_slice(&node.chunk.as_slice()[self.head_offset..]);
                remaining -= available;
                self.head_offset = 0;
                self.total_len -= available;
                node.chunk.take_attachment();
                let chunk = std::mem::replace(&mut node.chunk, Chunk::empty());
                chunk.release();
                self.nodes.release(node);
            } else {
                let end = self.head_offset + remaining;
                data.extend_from_slice(&node.chunk.as_slice()[self.head_offset..end]);
                self.head_offset = end;
                self.total_len -= remaining;
                remaining = 0;
                self.push_front(node);
            }
        }
        moved
    }

    fn push_front(&mut self, mut node: Box<QueueNode<A>>) {
        node.next = self.head.take();
        if self.tail.is_null() {
            self.tail = &mut *node;
        }
        self.head = Some(node);
    }

    /// Read exactly `k` bytes from the head without consuming them from the
    /// queue semantics described in the module docs:
    ///
    /// - `k < 0` reads the entire queue (equivalent to [`Self::read_all`]).
    /// - `k == 0`, or `k` greater than [`Self::len`], returns an empty
    ///   result — this is a short-read sentinel, never a partial read.
    /// - Otherwise exactly `k` bytes are removed from the head and returned.
    pub fn read(&mut self, k: i64) -> Bytes {
        if k < 0 {
            return self.read_all();
        }
        let k = k as usize;
        if k == 0 || k > self.total_len {
            return Bytes::new();
        }
        let mut out = Vec::with_capacity(k);
        self.consume(k, &mut out);
        Bytes::from(out)
    }

    /// Read and remove every byte currently queued.
    pub fn read_all(&mut self) -> Bytes {
        let mut out = Vec::with_capacity(self.total_len);
        self.consume(self.total_len, &mut out);
        Bytes::from(out)
    }

    /// Peek at the next `k` bytes without removing them. Same short-read
    /// sentinel rules as [`Self::read`] for `k`.
    #[must_use]
    pub fn peek(&self, k: i64) -> Bytes {
        if k < 0 {
            return self.peek_exact(self.total_len);
        }
        let k = k as usize;
        if k == 0 || k > self.total_len {
            return Bytes::new();
        }
        self.peek_exact(k)
    }

    fn peek_exact(&self, k: usize) -> Bytes {
        let mut out = Vec::with_capacity(k);
        let mut remaining = k;
        let mut offset = self.head_offset;
        let mut cursor = self.head.as_deref();
        while remaining > 0 {
            let Some(node) = cursor else { break };
            let slice = &node.chunk.as_slice()[offset..];
            let take = slice.len().min(remaining);
            out.extend_from_slice(&slice[..take]);
            remaining -= take;
            offset = 0;
            cursor = node.next.as_deref();
        }
        Bytes::from(out)
    }

    /// Merge `other` into the tail of `self`, emptying `other` in the
    /// process (on success or failure alike).
    ///
    /// Splicing moves whole nodes, so this is O(number of chunks in
    /// `other`), not O(bytes). If extending the queue's node-ownership
    /// bookkeeping were ever to fail partway through, the remainder of
    /// `other` is still drained (its nodes released back to its own pool)
    /// before the error is returned, so `other` is never left half-merged:
    /// the caller only has to handle "all of it landed in `self`" or "none
    /// of it did, and `other` is now empty either way".
    pub fn extend(&mut self, other: &mut ChunkQueue<A>) -> Result<()> {
        let result = self.extend_impl(other);
        if result.is_err() {
            // Drain whatever's left so `other` is empty even on failure,
            // matching the reference implementation's `join_impl` contract.
            let mut sink = Vec::new();
            other.consume(other.total_len, &mut sink);
        }
        result
    }

    fn extend_impl(&mut self, other: &mut ChunkQueue<A>) -> Result<()> {
        if other.total_len == 0 {
            return Ok(());
        }
        if other.head_offset > 0 {
            if let Some(mut node) = other.pop_node() {
                let available = node.chunk.len() - other.head_offset;
                let attachment = node.chunk.take_attachment();
                let trimmed = Bytes::copy_from_slice(&node.chunk.as_slice()[other.head_offset..]);
                other.total_len -= available;
                other.head_offset = 0;
                let chunk = std::mem::replace(&mut node.chunk, Chunk::empty());
                chunk.release();
                other.nodes.release(node);
                self.push_chunk(Chunk::from_bytes(trimmed, attachment));
            }
        }
        while let Some(node) = other.pop_node() {
            self.total_len += node.chunk.len();
            self.push_node(node);
        }
        other.total_len = 0;
        other.head_offset = 0;
        Ok(())
    }

    /// Move the first `k` bytes out of `self` and into a freshly constructed
    /// queue, preferring to move whole chunks (zero-copy) and splitting only
    /// at the exact boundary when `k` falls inside a chunk. The returned
    /// queue's final chunk carries the attachment in effect at byte `k-1` of
    /// `self`, per this crate's tail-attachment tie-break rule.
    #[must_use]
    pub fn fetch(&mut self, k: usize) -> ChunkQueue<A> {
        let k = k.min(self.total_len);
        let mut out = ChunkQueue::new();
        let mut remaining = k;
        while remaining > 0 {
            let Some(mut node) = self.pop_node() else { break };
            if self.head_offset > 0 {
                // Discard the already-consumed prefix permanently; the
                // split-off head carries no attachment, and none is needed
                // here since it was never part of what `fetch` returns.
                let _ = node.chunk.split_to(self.head_offset);
                self.head_offset = 0;
            }
            let available = node.chunk.len();
            if available <= remaining {
                remaining -= available;
                self.total_len -= available;
                out.total_len += available;
                out.push_node(node);
            } else {
                let head = node.chunk.split_to(remaining);
                self.total_len -= remaining;
                let mut head_node = self.nodes.acquire();
                head_node.chunk = head;
                out.total_len += remaining;
                out.push_node(head_node);
                remaining = 0;
                self.push_front(node);
            }
        }
        out
    }

    /// Like [`Self::fetch`], but `self` is left unchanged: whole chunks are
    /// shared (reference-counted, not copied) and only a partial tail
    /// segment requires an actual byte copy.
    ///
    /// Takes `&mut self` even though it conceptually reads: sharing a
    /// pool-exclusive chunk requires freezing it into reference-counted
    /// bytes first (see [`Chunk::share`]), which changes `self`'s internal
    /// representation (and forfeits that chunk's tail-reuse eligibility)
    /// without changing its observable content.
    #[must_use]
    pub fn copyfrom(&mut self, k: usize) -> ChunkQueue<A>
    where
        A: Clone,
    {
        let k = k.min(self.total_len);
        let mut out = ChunkQueue::new();
        let mut remaining = k;
        let mut offset = self.head_offset;
        let mut cursor = self.head.as_deref_mut();
        while remaining > 0 {
            let Some(node) = cursor else { break };
            let mut piece = node.chunk.share();
            if offset > 0 {
                let _ = piece.split_to(offset);
            }
            let available = piece.len();
            if available <= remaining {
                remaining -= available;
                out.push_chunk(piece);
            } else {
                let head = piece.split_to(remaining);
                out.push_chunk(head);
                remaining = 0;
            }
            offset = 0;
            cursor = node.next.as_deref_mut();
        }
        out
    }

    /// The attachment on the first chunk currently queued.
    #[must_use]
    pub fn peek_head_attachment(&self) -> Option<A>
    where
        A: Clone,
    {
        self.head.as_deref().and_then(|node| node.chunk.attachment().cloned())
    }

    /// The attachment on the last chunk currently queued, i.e. the
    /// attachment in effect at the final byte of the queue.
    #[must_use]
    pub fn peek_tail_attachment(&self) -> Option<A>
    where
        A: Clone,
    {
        if self.tail.is_null() {
            return None;
        }
        // SAFETY: see push_node; `tail` points at a node kept alive by the
        // `head` ownership chain whenever it is non-null.
        unsafe { (*self.tail).chunk.attachment().cloned() }
    }

    /// The head chunk's remaining content and attachment, without consuming
    /// anything. Empty (and `None`) if the queue is empty.
    #[must_use]
    pub fn peek_head(&self) -> (Bytes, Option<A>)
    where
        A: Clone,
    {
        match self.head.as_deref() {
            None => (Bytes::new(), None),
            Some(node) => {
                (Bytes::copy_from_slice(&node.chunk.as_slice()[self.head_offset..]), node.chunk.attachment().cloned())
            }
        }
    }

    /// The tail chunk's content and attachment, without consuming anything.
    /// Empty (and `None`) if the queue is empty.
    #[must_use]
    pub fn peek_tail(&self) -> (Bytes, Option<A>)
    where
        A: Clone,
    {
        if self.tail.is_null() {
            return (Bytes::new(), None);
        }
        // SAFETY: see push_node.
        unsafe { (Bytes::copy_from_slice((*self.tail).chunk.as_slice()), (*self.tail).chunk.attachment().cloned()) }
    }

    /// Remove and return the head chunk whole: if `head_offset == 0`, the
    /// physical head chunk is handed off unchanged; otherwise a fresh chunk
    /// holding only the unconsumed remainder is built, carrying the head's
    /// attachment, and the physical head node is released. Returns an empty,
    /// attachment-less chunk if the queue is empty.
    pub fn next(&mut self) -> Chunk<A> {
        let Some(mut node) = self.pop_node() else {
            return Chunk::empty();
        };
        if self.head_offset > 0 {
            // Discard the already-consumed prefix; `split_to` leaves the
            // remainder (with the original attachment) in `node.chunk`.
            let _ = node.chunk.split_to(self.head_offset);
            self.head_offset = 0;
        }
        self.total_len -= node.chunk.len();
        let chunk = std::mem::replace(&mut node.chunk, Chunk::empty());
        self.nodes.release(node);
        chunk
    }

    /// Spare capacity available at the tail for in-place extension by a
    /// `recv` syscall: nonzero only when the tail chunk is pool-exclusive.
    #[must_use]
    pub(crate) fn tail_reuse_capacity(&self) -> usize {
        if self.tail.is_null() {
            return 0;
        }
        // SAFETY: see push_node.
        let node = unsafe { &*self.tail };
        if node.chunk.is_pool_exclusive() {
            node.chunk.spare_capacity()
        } else {
            0
        }
    }

    /// Mutable access to the tail chunk's spare capacity, for a `recv`
    /// syscall to write into directly. Empty if there is no tail node.
    pub(crate) fn tail_spare_capacity_mut(&mut self) -> &mut [std::mem::MaybeUninit<u8>] {
        match self.tail_ptr_mut() {
            Some(node) => node.chunk.spare_capacity_mut(),
            None => &mut [],
        }
    }

    /// Commit `extra` freshly written bytes into the tail chunk's spare
    /// capacity, re-tagging it with `attachment` if one is given, and grow
    /// `total_len` to match.
    ///
    /// # Safety
    /// Caller must guarantee the first `extra` bytes of
    /// [`Self::tail_spare_capacity_mut`]'s last returned slice have been
    /// initialized before this call.
    pub(crate) unsafe fn commit_tail_write(&mut self, extra: usize, attachment: Option<A>) {
        if let Some(node) = self.tail_ptr_mut() {
            // SAFETY: forwarded from this function's own contract.
            unsafe { node.chunk.commit_written(extra) };
            if attachment.is_some() {
                node.chunk.set_attachment(attachment);
            }
        }
        self.total_len += extra;
    }

    /// All chunk contents, concatenated, without consuming anything.
    /// Intended for diagnostics (mirrors the reference implementation's
    /// buffer-list introspection), not for hot-path use.
    #[must_use]
    pub fn buffers_view(&self) -> Vec<Bytes> {
        let mut out = Vec::new();
        let mut offset = self.head_offset;
        let mut cursor = self.head.as_deref();
        while let Some(node) = cursor {
            out.push(Bytes::copy_from_slice(&node.chunk.as_slice()[offset..]));
            offset = 0;
            cursor = node.next.as_deref();
        }
        out
    }

    /// Drop every chunk, releasing pool-exclusive slabs and node cells back
    /// to their pools.
    pub fn clear(&mut self) {
        let mut sink = Vec::new();
        self.consume(self.total_len, &mut sink);
    }
}

impl<A> Default for ChunkQueue<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Drop for ChunkQueue<A> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_all_roundtrips() {
        let mut q: ChunkQueue<()> = ChunkQueue::new();
        q.write(b"hello ", None);
        q.write(b"world", None);
        assert_eq!(q.len(), 11);
        assert_eq!(q.read_all(), Bytes::from_static(b"hello world"));
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn read_zero_or_oversized_is_short_read_sentinel() {
        let mut q: ChunkQueue<()> = ChunkQueue::new();
        q.write(b"abc", None);
        assert_eq!(q.read(0), Bytes::new());
        assert_eq!(q.read(100), Bytes::new());
        assert_eq!(q.len(), 3);
        assert_eq!(q.read(-1), Bytes::from_static(b"abc"));
    }

    #[test]
    fn partial_read_leaves_remainder_queued() {
        let mut q: ChunkQueue<()> = ChunkQueue::new();
        q.write(b"abcdef", None);
        assert_eq!(q.read(2), Bytes::from_static(b"ab"));
        assert_eq!(q.read(4), Bytes::from_static(b"cdef"));
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn extend_moves_bytes_and_empties_source() {
        let mut a: ChunkQueue<()> = ChunkQueue::new();
        let mut b: ChunkQueue<()> = ChunkQueue::new();
        a.write(b"foo", None);
        b.write(b"bar", None);
        a.extend(&mut b).unwrap();
        assert_eq!(a.len(), 6);
        assert_eq!(b.len(), 0);
        assert_eq!(a.read_all(), Bytes::from_static(b"foobar"));
    }

    #[test]
    fn next_hands_off_whole_head_chunk() {
        let mut q: ChunkQueue<u32> = ChunkQueue::new();
        q.write(b"hello", Some(1));
        q.write(b"world", Some(2));
        let first = q.next();
        assert_eq!(first.as_slice(), b"hello");
        assert_eq!(first.attachment(), Some(&1));
        assert_eq!(q.len(), 5);
    }

    #[test]
    fn next_copies_remainder_after_partial_read() {
        let mut q: ChunkQueue<u32> = ChunkQueue::new();
        q.write(b"hello world", Some(9));
        assert_eq!(q.read(6), Bytes::from_static(b"hello "));
        let rest = q.next();
        assert_eq!(rest.as_slice(), b"world");
        assert_eq!(rest.attachment(), Some(&9));
        assert!(q.is_empty());
    }

    #[test]
    fn attachment_follows_tail_contributor() {
        let mut q: ChunkQueue<u32> = ChunkQueue::new();
        q.write(b"a", Some(1));
        q.write(b"b", Some(2));
        let view = q.buffers_view();
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn fetch_splits_at_exact_boundary() {
        let mut q: ChunkQueue<()> = ChunkQueue::new();
        q.write(b"hello world", None);
        let mut head = q.fetch(5);
        assert_eq!(head.read_all(), Bytes::from_static(b"hello"));
        assert_eq!(q.read_all(), Bytes::from_static(b" world"));
    }

    #[test]
    fn copyfrom_leaves_source_untouched() {
        let mut q: ChunkQueue<()> = ChunkQueue::new();
        q.write(b"hello world", None);
        let mut copy = q.copyfrom(5);
        assert_eq!(copy.read_all(), Bytes::from_static(b"hello"));
        assert_eq!(q.len(), 11);
        assert_eq!(q.read_all(), Bytes::from_static(b"hello world"));
    }
}
