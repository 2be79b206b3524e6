//! Bounded, single-threaded object pools for slabs and queue nodes.
//!
//! Grounded on the reference implementation's `buffer_queue_fast_buffer`
//! and `bytes_fast_buffer` module-level arrays: both are bounded LIFO free
//! lists that hand out pre-allocated objects and take them back on release,
//! falling back to the system allocator (and simply dropping on release)
//! once the bound is reached. Here they're `Vec`-backed stacks instead of
//! fixed-size C arrays, but the acquire/release discipline is the same.

use std::cell::RefCell;

use bytes::BytesMut;

use crate::queue::QueueNode;
use crate::tunables::Tunables;

/// Default number of free slabs `SlabPool` retains before falling back to
/// the system allocator.
pub const DEFAULT_SLAB_POOL_CAPACITY: usize = 128;

/// Default number of free queue-node cells `NodePool` retains.
pub const DEFAULT_NODE_POOL_CAPACITY: usize = 1024;

/// A bounded LIFO stack of reusable byte slabs (`C2` in the design).
///
/// There is exactly one `SlabPool` per process, accessed only through the
/// free functions in this module ([`acquire_slab`], [`release_slab`],
/// [`slab_pool_len`]); the type itself is private, since exposing it would
/// invite constructing a second, unshared pool that defeats the point of
/// process-wide recycling.
///
/// Every slab handed out has capacity equal to [`Tunables::slab_size`] at
/// the time it was allocated. Slabs already sitting in the free list keep
/// whatever size they were allocated with; [`Tunables::set_slab_size`]
/// refuses to change the size while the pool is non-empty specifically to
/// avoid a free list of mixed-size slabs.
struct SlabPool {
    free: Vec<BytesMut>,
    capacity: usize,
}

impl SlabPool {
    fn new(capacity: usize) -> Self {
        Self { free: Vec::with_capacity(capacity.min(64)), capacity }
    }

    fn acquire(&mut self) -> BytesMut {
        match self.free.pop() {
            Some(slab) => {
                log::trace!("SlabPool hit, {} slabs remaining", self.free.len());
                slab
            }
            None => {
                let size = Tunables::slab_size();
                log::trace!("SlabPool miss, allocating a new {size}-byte slab");
                BytesMut::with_capacity(size)
            }
        }
    }

    fn release(&mut self, mut slab: BytesMut) {
        if self.free.len() >= self.capacity {
            log::trace!("SlabPool full ({} slabs), dropping released slab", self.capacity);
            return;
        }
        slab.clear();
        self.free.push(slab);
        log::trace!("SlabPool now holds {} free slabs", self.free.len());
    }

    fn len(&self) -> usize {
        self.free.len()
    }
}

thread_local! {
    static SLAB_POOL: RefCell<SlabPool> = RefCell::new(SlabPool::new(DEFAULT_SLAB_POOL_CAPACITY));
}

/// Acquire a slab from the process-wide [`SlabPool`], allocating a new one
/// on a pool miss.
pub(crate) fn acquire_slab() -> BytesMut {
    SLAB_POOL.with(|pool| pool.borrow_mut().acquire())
}

/// Return a slab to the process-wide [`SlabPool`].
///
/// The slab is cleared (logical length reset to zero, capacity retained)
/// before being pushed onto the free list.
pub(crate) fn release_slab(slab: BytesMut) {
    SLAB_POOL.with(|pool| pool.borrow_mut().release(slab));
}

/// Number of free slabs currently held by the process-wide [`SlabPool`].
///
/// Used by [`Tunables::set_slab_size`] to reject size changes while the
/// pool is warm, and exposed for tests.
pub fn slab_pool_len() -> usize {
    SLAB_POOL.with(|pool| pool.borrow().len())
}

#[cfg(test)]
pub(crate) fn drain_slab_pool_for_test() {
    SLAB_POOL.with(|pool| pool.borrow_mut().free.clear());
}

/// A bounded LIFO stack of reusable queue-node cells (`C3` in the design).
///
/// Unlike [`SlabPool`], a `NodePool<A>` is owned per [`ChunkQueue`][queue]
/// (by default) rather than shared process-wide: queue nodes carry the
/// caller's attachment type `A`, and Rust has no ergonomic way to share one
/// truly-global pool across every instantiation of a generic type without
/// either type erasure or per-monomorphization thread-locals. Since the
/// steady-state zero-allocation benefit of pooling nodes comes from a single
/// buffer's own churn (recv/consume cycles on one connection), an
/// instance-owned pool captures that benefit; callers that want pooling
/// shared across multiple buffers of the same attachment type can wrap a
/// `NodePool` in their own `Rc<RefCell<_>>` and adapt acquire/release calls
/// to it, or simply accept one pool per [`ChunkQueue::with_node_pool`][queue]
/// instance, which is the default this crate provides out of the box.
///
/// [queue]: crate::queue::ChunkQueue
pub struct NodePool<A> {
    free: Vec<Box<QueueNode<A>>>,
    capacity: usize,
}

impl<A> NodePool<A> {
    /// Construct a pool with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_NODE_POOL_CAPACITY)
    }

    /// Construct a pool that retains at most `capacity` free nodes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { free: Vec::new(), capacity }
    }

    pub(crate) fn acquire(&mut self) -> Box<QueueNode<A>> {
        match self.free.pop() {
            Some(mut node) => {
                node.reset();
                node
            }
            None => Box::new(QueueNode::empty()),
        }
    }

    pub(crate) fn release(&mut self, mut node: Box<QueueNode<A>>) {
        if self.free.len() >= self.capacity {
            return;
        }
        node.reset();
        self.free.push(node);
    }

    /// Number of free node cells currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// True if the pool currently holds no free nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

impl<A> Default for NodePool<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slab_pool_recycles_up_to_capacity() {
        drain_slab_pool_for_test();
        let a = acquire_slab();
        let b = acquire_slab();
        assert_eq!(slab_pool_len(), 0);
        release_slab(a);
        release_slab(b);
        assert_eq!(slab_pool_len(), 2);
        let _reacquired = acquire_slab();
        assert_eq!(slab_pool_len(), 1);
        drain_slab_pool_for_test();
    }

    #[test]
    fn slab_pool_drops_beyond_capacity() {
        drain_slab_pool_for_test();
        SLAB_POOL.with(|pool| pool.borrow_mut().capacity = 1);
        release_slab(acquire_slab());
        release_slab(acquire_slab());
        assert_eq!(slab_pool_len(), 1);
        SLAB_POOL.with(|pool| pool.borrow_mut().capacity = DEFAULT_SLAB_POOL_CAPACITY);
        drain_slab_pool_for_test();
    }

    #[test]
    fn node_pool_recycles_nodes() {
        let mut pool: NodePool<()> = NodePool::with_capacity(4);
        let node = pool.acquire();
        assert!(pool.is_empty());
        pool.release(node);
        assert_eq!(pool.len(), 1);
        let _reacquired = pool.acquire();
        assert!(pool.is_empty());
    }

    #[test]
    fn node_pool_drops_beyond_capacity() {
        let mut pool: NodePool<()> = NodePool::with_capacity(1);
        pool.release(Box::new(QueueNode::empty()));
        pool.release(Box::new(QueueNode::empty()));
        assert_eq!(pool.len(), 1);
    }
}
