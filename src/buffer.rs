//! [`Buffer`], the public façade over one [`ChunkQueue`] (`C5`).

use bytes::Bytes;

use crate::chunk::Chunk;
use crate::error::{BufferError, Result};
use crate::pool::NodePool;
use crate::queue::ChunkQueue;

/// A chunked byte buffer, backed by a single [`ChunkQueue`].
///
/// `Buffer` is the type most callers reach for directly; it wraps one
/// `ChunkQueue` and exposes a smaller, more ergonomic surface over it,
/// mirroring how the reference implementation's Python-facing `Buffer`
/// object wrapped its internal queue. Operations that need exact-boundary
/// chunk access (`byte`, `slice`, `as_bytes`) collapse the queue to a single
/// contiguous chunk first, since `Buffer` makes no promise about chunk
/// boundaries to its callers.
pub struct Buffer<A> {
    queue: ChunkQueue<A>,
}

impl<A> Buffer<A> {
    /// An empty buffer with a private node pool.
    #[must_use]
    pub fn new() -> Self {
        Self { queue: ChunkQueue::new() }
    }

    /// An empty buffer that recycles queue-node cells through `nodes`
    /// rather than a private pool. See
    /// [`ChunkQueue::with_node_pool`] for when sharing a pool across
    /// buffers is worthwhile.
    #[must_use]
    pub fn with_node_pool(nodes: NodePool<A>) -> Self {
        Self { queue: ChunkQueue::with_node_pool(nodes) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Append `data` at the tail, tagging the final chunk written with
    /// `attachment`.
    pub fn write(&mut self, data: &[u8], attachment: Option<A>) {
        self.queue.write(data, attachment);
    }

    /// Remove and return `k` bytes from the head. See
    /// [`ChunkQueue::read`] for the exact `k` semantics (negative reads
    /// everything; zero or oversized is a short-read sentinel, never a
    /// partial read).
    pub fn read(&mut self, k: i64) -> Bytes {
        self.queue.read(k)
    }

    /// Remove and return every queued byte.
    pub fn read_all(&mut self) -> Bytes {
        self.queue.read_all()
    }

    /// Peek at the next `k` bytes without removing them.
    #[must_use]
    pub fn peek(&self, k: i64) -> Bytes {
        self.queue.peek(k)
    }

    /// Merge `other` onto the tail of this buffer, emptying `other`
    /// (whether or not this call succeeds).
    pub fn extend(&mut self, other: &mut Buffer<A>) -> Result<()> {
        self.queue.extend(&mut other.queue)
    }

    /// Collapse this buffer to a single contiguous chunk in place and
    /// return it, tagged with the attachment in effect at its last byte.
    /// `(Bytes::new(), None)` if the buffer is empty.
    pub fn join(&mut self) -> (Bytes, Option<A>)
    where
        A: Clone,
    {
        if self.is_empty() {
            return (Bytes::new(), None);
        }
        let bytes = self.as_bytes();
        let attachment = self.last_attachment();
        (bytes, attachment)
    }

    /// Remove and return the head chunk whole, along with its attachment.
    /// `(Bytes::new(), None)` if the buffer is empty. See
    /// [`ChunkQueue::next`] for exact boundary handling.
    pub fn next(&mut self) -> (Bytes, Option<A>)
    where
        A: Clone,
    {
        self.queue.next().into_parts()
    }

    /// Move the first `k` bytes of this buffer into a new, independent
    /// buffer, splitting a chunk only if `k` falls inside one.
    #[must_use]
    pub fn fetch(&mut self, k: usize) -> Buffer<A> {
        Buffer { queue: self.queue.fetch(k) }
    }

    /// Copy the first `k` bytes of this buffer into a new, independent
    /// buffer, leaving this buffer unchanged. Whole chunks are shared by
    /// reference count, not copied; only a partial boundary chunk costs an
    /// actual byte copy.
    #[must_use]
    pub fn copyfrom(&mut self, k: usize) -> Buffer<A>
    where
        A: Clone,
    {
        Buffer { queue: self.queue.copyfrom(k) }
    }

    /// Drop every queued chunk.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// The head chunk's remaining content and attachment, without consuming
    /// anything. `(Bytes::new(), None)` if the buffer is empty.
    pub fn head(&self) -> (Bytes, Option<A>)
    where
        A: Clone,
    {
        self.queue.peek_head()
    }

    /// The tail chunk's content and attachment, without consuming anything.
    /// `(Bytes::new(), None)` if the buffer is empty.
    pub fn last(&self) -> (Bytes, Option<A>)
    where
        A: Clone,
    {
        self.queue.peek_tail()
    }

    /// The attachment carried by the first chunk currently queued, or
    /// `None` if the buffer is empty.
    pub fn head_attachment(&self) -> Option<A>
    where
        A: Clone,
    {
        self.queue.peek_head_attachment()
    }

    /// The attachment carried by the last byte currently queued, or `None`
    /// if the buffer is empty. This is the attachment a `read`/`fetch` of
    /// the whole buffer would surface, per the tail-attachment tie-break
    /// rule.
    pub fn last_attachment(&self) -> Option<A>
    where
        A: Clone,
    {
        self.queue.peek_tail_attachment()
    }

    /// A single byte at logical index `i`, or an error if `i` is out of
    /// range. Collapses the queue to a single contiguous chunk first, since
    /// indexing across chunk boundaries is otherwise undefined.
    pub fn byte(&mut self, i: i64) -> Result<u8>
    where
        A: Clone,
    {
        let len = self.len();
        let idx = normalize_index(i, len)?;
        let all = self.as_bytes();
        Ok(all[idx])
    }

    /// A contiguous slice `[i, j)` of logical indices, or an error if either
    /// bound is out of range.
    pub fn slice(&mut self, i: i64, j: i64) -> Result<Bytes>
    where
        A: Clone,
    {
        let len = self.len();
        let start = normalize_index(i, len)?;
        let end = if j < 0 { len } else { (j as usize).min(len) };
        if end < start {
            return Err(BufferError::index_out_of_range(j, len));
        }
        let all = self.as_bytes();
        Ok(all.slice(start..end))
    }

    /// The entire buffer's content as one contiguous, read-only view.
    /// Collapses multi-chunk buffers in place (subsequent calls are O(1)
    /// until more data is written), preserving the tail attachment across
    /// the collapse.
    pub fn as_bytes(&mut self) -> Bytes
    where
        A: Clone,
    {
        let snapshot = self.queue.peek(-1);
        if self.queue.buffers_view().len() > 1 {
            let attachment = self.queue.peek_tail_attachment();
            let all = self.queue.read_all();
            self.queue.write(&all, attachment);
        }
        snapshot
    }

    /// All chunk contents, concatenated per chunk, without consuming
    /// anything. Intended for diagnostics.
    #[must_use]
    pub fn buffers_view(&self) -> Vec<Bytes> {
        self.queue.buffers_view()
    }

    /// Number of free node cells in this buffer's node pool.
    #[must_use]
    pub fn node_pool_len(&self) -> usize {
        self.queue.node_pool_len()
    }

    /// Append an already-filled chunk directly, skipping the byte copy
    /// `write` would otherwise perform. Used by [`crate::socket_io`] to
    /// hand off a pool slab a `recv` syscall just wrote into.
    pub(crate) fn push_chunk_from_socket(&mut self, chunk: Chunk<A>) {
        self.queue.push_chunk(chunk);
    }

    /// Spare capacity available at the tail for in-place `recv` extension.
    /// Used by [`crate::socket_io`]'s tail-reuse fast path.
    pub(crate) fn tail_reuse_capacity(&self) -> usize {
        self.queue.tail_reuse_capacity()
    }

    /// Mutable access to the tail chunk's spare capacity, for a `recv`
    /// syscall to write into directly.
    pub(crate) fn tail_spare_capacity_mut(&mut self) -> &mut [std::mem::MaybeUninit<u8>] {
        self.queue.tail_spare_capacity_mut()
    }

    /// Commit `extra` freshly written bytes into the tail chunk in place.
    ///
    /// # Safety
    /// Caller must guarantee the first `extra` bytes of
    /// [`Self::tail_spare_capacity_mut`]'s last returned slice have been
    /// initialized before this call.
    pub(crate) unsafe fn commit_tail_write(&mut self, extra: usize, attachment: Option<A>) {
        // SAFETY: forwarded from this function's own contract.
        unsafe { self.queue.commit_tail_write(extra, attachment) };
    }
}

fn normalize_index(i: i64, len: usize) -> Result<usize> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx < 0 || idx as usize >= len {
        return Err(BufferError::index_out_of_range(i, len));
    }
    Ok(idx as usize)
}

impl<A> Default for Buffer<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for Buffer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer").field("len", &self.len()).finish_non_exhaustive()
    }
}

/// Renders the buffer's content lossily as UTF-8, not its structure.
/// Equivalent to the reference implementation's string conversion of its
/// `Buffer` type.
impl<A> std::fmt::Display for Buffer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.queue.peek(-1)))
    }
}

/// Hashes by content, not by chunk boundaries or attachments, matching
/// `Eq`-by-content semantics a caller would expect from a byte buffer.
impl<A> std::hash::Hash for Buffer<A> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.queue.peek(-1).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let mut buf: Buffer<()> = Buffer::new();
        buf.write(b"hello", None);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.read_all(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn byte_and_slice_collapse_multi_chunk() {
        let mut buf: Buffer<()> = Buffer::new();
        buf.write(b"foo", None);
        buf.write(b"bar", None);
        assert_eq!(buf.byte(0).unwrap(), b'f');
        assert_eq!(buf.byte(-1).unwrap(), b'r');
        assert_eq!(buf.slice(1, 4).unwrap(), Bytes::from_static(b"ooba"));
    }

    #[test]
    fn byte_out_of_range_errors() {
        let mut buf: Buffer<()> = Buffer::new();
        buf.write(b"ab", None);
        assert!(matches!(buf.byte(5), Err(BufferError::IndexOutOfRange { .. })));
        assert!(matches!(buf.byte(-5), Err(BufferError::IndexOutOfRange { .. })));
    }

    #[test]
    fn fetch_and_copyfrom_differ_in_source_mutation() {
        let mut buf: Buffer<()> = Buffer::new();
        buf.write(b"hello world", None);
        let mut copy = buf.copyfrom(5);
        assert_eq!(copy.read_all(), Bytes::from_static(b"hello"));
        assert_eq!(buf.len(), 11);

        let mut moved = buf.fetch(5);
        assert_eq!(moved.read_all(), Bytes::from_static(b"hello"));
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn last_attachment_reflects_tail_contributor() {
        let mut buf: Buffer<u32> = Buffer::new();
        buf.write(b"a", Some(1));
        buf.write(b"b", Some(2));
        assert_eq!(buf.last_attachment(), Some(2));
    }

    #[test]
    fn join_collapses_to_single_chunk_tagged_with_tail_attachment() {
        let mut buf: Buffer<u32> = Buffer::new();
        buf.write(b"1", Some(1));
        buf.write(b"2", Some(2));
        let (bytes, attachment) = buf.join();
        assert_eq!(bytes, Bytes::from_static(b"12"));
        assert_eq!(attachment, Some(2));
        assert_eq!(buf.buffers_view().len(), 1);
    }

    #[test]
    fn join_on_empty_buffer_is_empty_pair() {
        let mut buf: Buffer<u32> = Buffer::new();
        assert_eq!(buf.join(), (Bytes::new(), None));
    }

    #[test]
    fn extend_merges_another_buffer_and_empties_it() {
        let mut a: Buffer<()> = Buffer::new();
        let mut b: Buffer<()> = Buffer::new();
        a.write(b"foo", None);
        b.write(b"bar", None);
        a.extend(&mut b).unwrap();
        assert_eq!(a.read_all(), Bytes::from_static(b"foobar"));
        assert!(b.is_empty());
    }

    #[test]
    fn next_hands_off_head_chunk_with_its_attachment() {
        let mut buf: Buffer<u32> = Buffer::new();
        buf.write(b"hello", Some(1));
        buf.write(b"world", Some(2));
        let (bytes, attachment) = buf.next();
        assert_eq!(bytes, Bytes::from_static(b"hello"));
        assert_eq!(attachment, Some(1));
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn head_and_last_read_the_extreme_chunks_without_consuming() {
        let mut buf: Buffer<u32> = Buffer::new();
        buf.write(b"hello", Some(1));
        buf.write(b"world", Some(2));
        assert_eq!(buf.head(), (Bytes::from_static(b"hello"), Some(1)));
        assert_eq!(buf.last(), (Bytes::from_static(b"world"), Some(2)));
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn head_and_last_are_empty_on_an_empty_buffer() {
        let buf: Buffer<()> = Buffer::new();
        assert_eq!(buf.head(), (Bytes::new(), None));
        assert_eq!(buf.last(), (Bytes::new(), None));
    }
}
