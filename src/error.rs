//! Error types returned by buffer, pool and socket operations.

/// Errors produced by this crate's queue, pool and socket operations.
///
/// Mirrors the error surface of the reference implementation this crate is
/// modeled on, which raised a handful of distinct Python exception types
/// rather than a single catch-all. Each variant below corresponds to one of
/// those exception sites.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// An operation received a value of the wrong shape for the current
    /// attachment type (only reachable from `socket_sendto`, where the
    /// caller-supplied address must match the socket's address family).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// An index or length argument fell outside the buffer's current
    /// content range.
    #[error("index out of range: {index} (length {length})")]
    IndexOutOfRange { index: i64, length: usize },

    /// A pool or allocator could not satisfy an allocation request.
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// A tunable could not be changed because doing so would leave
    /// outstanding pooled objects in an inconsistent state (for example,
    /// changing the slab size while `SlabPool` still holds slabs sized to
    /// the old value).
    #[error("runtime conflict: {0}")]
    RuntimeConflict(String),

    /// The underlying OS call failed for a reason other than
    /// `EAGAIN`/`EWOULDBLOCK`, which is not an error in this crate's model.
    #[error("os error: {0}")]
    Os(#[from] nix::Error),

    /// A length or offset computation would overflow the platform's native
    /// integer width.
    #[error("overflow error: {0}")]
    OverflowError(String),

    /// A socket address could not be parsed or formatted.
    #[error("address format error: {0}")]
    AddressFormatError(String),
}

impl BufferError {
    pub(crate) fn index_out_of_range(index: i64, length: usize) -> Self {
        Self::IndexOutOfRange { index, length }
    }
}

/// Result alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, BufferError>;
