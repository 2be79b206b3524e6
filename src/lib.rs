//! A chunked byte buffer for event-driven, non-blocking socket I/O.
//!
//! This crate sits between a non-blocking socket and application code in a
//! single-threaded, cooperative event loop. Bytes arriving off the wire are
//! appended as discrete chunks to the tail of a logical stream; bytes going
//! out are drained from the head. Each chunk may carry an opaque,
//! caller-chosen attachment (typically a peer address for datagram
//! sockets), generic over the attachment type `A` throughout
//! ([`Chunk<A>`], [`ChunkQueue<A>`], [`Buffer<A>`]).
//!
//! # Threading
//!
//! Every type here is `!Sync`: the process-wide slab pool and the per-queue
//! [`pool::NodePool`] are accessed without any synchronization, matching
//! the single-threaded, cooperative model this crate assumes. Sharing a
//! [`Buffer`] or its pools across threads is undefined behavior by
//! contract, not merely unsupported — the compiler rejects it at the
//! `Sync` boundary rather than leaving it as a runtime footgun.
//!
//! # Layout
//!
//! - [`chunk`] — [`Chunk<A>`], one segment of buffered bytes plus attachment.
//! - [`pool`] — the process-wide slab pool (accessed only via free
//!   functions) and [`pool::NodePool`] (per-queue node-cell recycling).
//! - [`queue`] — [`ChunkQueue<A>`], the FIFO linked list of chunks.
//! - [`buffer`] — [`Buffer<A>`], the façade most callers use directly.
//! - [`socket_io`] — non-blocking `recv`/`send`/`recvfrom`/`sendto` loops.
//! - [`tunables`] — [`tunables::Tunables`], the process-wide configuration
//!   surface (slab size, socket loop iteration caps).
//! - [`error`] — [`error::BufferError`], the crate's error type.

pub mod buffer;
pub mod chunk;
pub mod error;
pub mod pool;
pub mod queue;
pub mod socket_io;
pub mod tunables;

pub use buffer::Buffer;
pub use chunk::Chunk;
pub use error::{BufferError, Result};
pub use pool::NodePool;
pub use queue::{ChunkQueue, QueueNode};
pub use socket_io::{AddressAttachment, AddressFamily};
pub use tunables::Tunables;
