//! Non-blocking socket I/O glue between raw file descriptors and
//! [`Buffer`]/[`ChunkQueue`] (`C6`).
//!
//! Every loop here treats `EAGAIN`/`EWOULDBLOCK` as ordinary loop
//! termination, not an error: a non-blocking socket reporting "nothing more
//! right now" is the expected steady state of an event-driven reactor, not
//! a failure. Every other OS error is surfaced as [`BufferError::Os`].

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;
use std::str::FromStr;

use nix::sys::socket::{self, MsgFlags, SockaddrIn, SockaddrIn6, SockaddrStorage};

use crate::buffer::Buffer;
use crate::chunk::Chunk;
use crate::error::{BufferError, Result};
use crate::queue::TAIL_REUSE_THRESHOLD;
use crate::tunables::Tunables;

/// Address family `socket_recvfrom`/`socket_sendto` format and parse peer
/// addresses as. Mirrors the reference implementation's `sa_family`
/// parameter (`AF_INET`/`AF_INET6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl Default for AddressFamily {
    fn default() -> Self {
        Self::Inet
    }
}

/// A socket peer address carried as a loosely-typed attachment, mirroring
/// the reference implementation's `(host, port)` / `(host, port, flowinfo,
/// scope_id)` tuple attachment.
///
/// Kept string/integer typed rather than `std::net::SocketAddr` so that
/// `socket_sendto` can perform (and fail) the same host/port/flowinfo
/// validation the reference implementation performs on its tuple: with
/// `SocketAddr` as the attachment type, every address is valid by
/// construction and the validation the spec requires can never run, let
/// alone fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressAttachment {
    pub host: String,
    pub port: i64,
    pub flowinfo: Option<i64>,
    pub scope_id: Option<i64>,
}

impl AddressAttachment {
    #[must_use]
    pub fn new(host: impl Into<String>, port: i64) -> Self {
        Self { host: host.into(), port, flowinfo: None, scope_id: None }
    }

    #[must_use]
    pub fn with_ipv6_fields(mut self, flowinfo: i64, scope_id: i64) -> Self {
        self.flowinfo = Some(flowinfo);
        self.scope_id = Some(scope_id);
        self
    }
}

impl From<SocketAddr> for AddressAttachment {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => AddressAttachment::new(v4.ip().to_string(), i64::from(v4.port())),
            SocketAddr::V6(v6) => AddressAttachment::new(v6.ip().to_string(), i64::from(v6.port()))
                .with_ipv6_fields(i64::from(v6.flowinfo()), i64::from(v6.scope_id())),
        }
    }
}

fn is_would_block(err: nix::Error) -> bool {
    matches!(err, nix::Error::EAGAIN | nix::Error::EWOULDBLOCK)
}

/// Validate an [`AddressAttachment`] against `family` and resolve it to a
/// concrete `SocketAddr`, matching the reference implementation's tuple
/// validation: host must parse via `inet_pton` for `family`, port must fit
/// `[0, 65535]`, and (for `Inet6`) flowinfo must fit `[0, 2^20 - 1]`.
fn validate_address(attachment: &AddressAttachment, family: AddressFamily) -> Result<SocketAddr> {
    if !(0..=0xffff).contains(&attachment.port) {
        return Err(BufferError::OverflowError(format!("sock port must be 0-65535, got {}", attachment.port)));
    }
    let port = attachment.port as u16;

    match family {
        AddressFamily::Inet => {
            let ip = Ipv4Addr::from_str(&attachment.host)
                .map_err(|e| BufferError::AddressFormatError(format!("host inet_pton error: {e}")))?;
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        AddressFamily::Inet6 => {
            let ip = Ipv6Addr::from_str(&attachment.host)
                .map_err(|e| BufferError::AddressFormatError(format!("host inet_pton error: {e}")))?;
            let flowinfo = match attachment.flowinfo {
                Some(f) => {
                    if !(0..=0xfffff).contains(&f) {
                        return Err(BufferError::OverflowError(format!("flowinfo must be 0-1048575, got {f}")));
                    }
                    f as u32
                }
                None => 0,
            };
            let scope_id = match attachment.scope_id {
                Some(s) => {
                    u32::try_from(s).map_err(|_| BufferError::OverflowError(format!("scope_id out of range: {s}")))?
                }
                None => 0,
            };
            Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, flowinfo, scope_id)))
        }
    }
}

fn socket_addr_to_storage(addr: SocketAddr) -> SockaddrStorage {
    match addr {
        SocketAddr::V4(v4) => SockaddrStorage::from(sockaddr_in_from_v4(v4)),
        SocketAddr::V6(v6) => SockaddrStorage::from(sockaddr_in6_from_v6(v6)),
    }
}

fn sockaddr_in_from_v4(addr: SocketAddrV4) -> SockaddrIn {
    let octets = addr.ip().octets();
    SockaddrIn::new(octets[0], octets[1], octets[2], octets[3], addr.port())
}

fn sockaddr_in6_from_v6(addr: SocketAddrV6) -> SockaddrIn6 {
    SockaddrIn6::new(*addr.ip(), addr.port(), addr.flowinfo(), addr.scope_id())
}

fn storage_to_socket_addr(storage: &SockaddrStorage, family: AddressFamily) -> Result<SocketAddr> {
    match family {
        AddressFamily::Inet => {
            let v4 =
                storage.as_sockaddr_in().ok_or_else(|| BufferError::AddressFormatError("not an AF_INET address".into()))?;
            let text = v4.to_string();
            text.parse::<SocketAddrV4>().map(SocketAddr::V4).map_err(|e| BufferError::AddressFormatError(e.to_string()))
        }
        AddressFamily::Inet6 => {
            let v6 = storage
                .as_sockaddr_in6()
                .ok_or_else(|| BufferError::AddressFormatError("not an AF_INET6 address".into()))?;
            let text = v6.to_string();
            text.parse::<SocketAddrV6>().map(SocketAddr::V6).map_err(|e| BufferError::AddressFormatError(e.to_string()))
        }
    }
}

/// Receive as much data as is immediately available on `fd` into `buffer`,
/// tagging every freshly allocated chunk with `attachment.clone()` (a
/// chunk extended in place through the tail-reuse fast path keeps whatever
/// attachment it already carried).
///
/// `max_len`, if given, is first reduced by `buffer`'s current length (so
/// it behaves as a target high-water mark on the buffer's total size, not
/// a per-call byte budget), then checked against the running total after
/// every successful `recv`, returning immediately once it is exceeded.
/// Performs up to [`Tunables::recv_iteration_cap`] `recv` calls otherwise.
/// Returns the total number of bytes moved into `buffer`.
pub fn socket_recv<A: Clone>(
    fd: RawFd,
    buffer: &mut Buffer<A>,
    attachment: Option<&A>,
    max_len: Option<i64>,
) -> Result<usize> {
    let budget = max_len.map(|m| m - buffer.len() as i64);
    let mut total = 0usize;
    for _ in 0..Tunables::recv_iteration_cap() {
        if buffer.tail_reuse_capacity() >= TAIL_REUSE_THRESHOLD {
            let dst = buffer.tail_spare_capacity_mut();
            // SAFETY: `recv` only ever writes initialized bytes into the
            // portion of `dst` it reports as read; we only commit that many.
            let dst = unsafe { std::slice::from_raw_parts_mut(dst.as_mut_ptr().cast::<u8>(), dst.len()) };
            match socket::recv(fd, dst, MsgFlags::empty()) {
                Ok(0) => break,
                Ok(n) => {
                    // SAFETY: `recv` just initialized the first `n` bytes of
                    // `dst`, which aliases the tail chunk's spare capacity.
                    unsafe { buffer.commit_tail_write(n, attachment.cloned()) };
                    total += n;
                    if let Some(b) = budget {
                        if total as i64 > b {
                            return Ok(total);
                        }
                    }
                    continue;
                }
                Err(e) if is_would_block(e) => {
                    log::trace!("socket_recv: fd {fd} would block after {total} bytes");
                    break;
                }
                Err(e) => return Err(BufferError::Os(e)),
            }
        }

        let mut chunk: Chunk<A> = Chunk::from_pool(attachment.cloned());
        let spare = chunk.spare_capacity();
        if spare == 0 {
            break;
        }
        let dst = chunk.spare_capacity_mut();
        // SAFETY: see the tail-reuse branch above.
        let dst = unsafe { std::slice::from_raw_parts_mut(dst.as_mut_ptr().cast::<u8>(), dst.len()) };
        match socket::recv(fd, dst, MsgFlags::empty()) {
            Ok(0) => {
                chunk.release();
                break;
            }
            Ok(n) => {
                // SAFETY: `recv` just initialized the first `n` bytes of
                // `dst`, which aliases this chunk's spare capacity.
                unsafe { chunk.commit_written(n) };
                total += n;
                push_received(buffer, chunk);
                if let Some(b) = budget {
                    if total as i64 > b {
                        return Ok(total);
                    }
                }
            }
            Err(e) if is_would_block(e) => {
                chunk.release();
                log::trace!("socket_recv: fd {fd} would block after {total} bytes");
                break;
            }
            Err(e) => {
                chunk.release();
                return Err(BufferError::Os(e));
            }
        }
    }
    Ok(total)
}

/// Receive as many datagrams as are immediately available on `fd` into
/// `buffer`, tagging each chunk with the sending peer's address (formatted
/// for `family`). Unlike [`socket_recv`], every iteration allocates a fresh
/// slab: a datagram's source address varies call to call, so a chunk can
/// never be grown in place without conflating two peers' bytes.
///
/// Loops up to [`Tunables::recv_iteration_cap`] times, honoring `max_len`
/// exactly as `socket_recv` does. Returns the total bytes received this
/// call and the most recent peer address seen, if any.
pub fn socket_recvfrom(
    fd: RawFd,
    buffer: &mut Buffer<AddressAttachment>,
    family: AddressFamily,
    max_len: Option<i64>,
) -> Result<(usize, Option<AddressAttachment>)> {
    let budget = max_len.map(|m| m - buffer.len() as i64);
    let mut total = 0usize;
    let mut last_from = None;
    for _ in 0..Tunables::recv_iteration_cap() {
        let mut chunk: Chunk<AddressAttachment> = Chunk::from_pool(None);
        let spare = chunk.spare_capacity();
        let dst = chunk.spare_capacity_mut();
        // SAFETY: see socket_recv.
        let dst = unsafe { std::slice::from_raw_parts_mut(dst.as_mut_ptr().cast::<u8>(), dst.len()) };
        match socket::recvfrom::<SockaddrStorage>(fd, dst) {
            Ok((0, _)) => {
                chunk.release();
                break;
            }
            Ok((n, from)) => {
                // SAFETY: see socket_recv.
                unsafe { chunk.commit_written(n.min(spare)) };
                let attachment = match &from {
                    Some(storage) => match storage_to_socket_addr(storage, family) {
                        Ok(addr) => Some(AddressAttachment::from(addr)),
                        Err(e) => {
                            chunk.release();
                            return Err(e);
                        }
                    },
                    None => None,
                };
                chunk.set_attachment(attachment.clone());
                push_received(buffer, chunk);
                total += n;
                if attachment.is_some() {
                    last_from = attachment;
                }
                if let Some(b) = budget {
                    if total as i64 > b {
                        return Ok((total, last_from));
                    }
                }
            }
            Err(e) if is_would_block(e) => {
                chunk.release();
                log::trace!("socket_recvfrom: fd {fd} would block after {total} bytes");
                break;
            }
            Err(e) => {
                chunk.release();
                return Err(BufferError::Os(e));
            }
        }
    }
    Ok((total, last_from))
}

fn push_received<A>(buffer: &mut Buffer<A>, chunk: Chunk<A>) {
    // `Buffer` doesn't expose raw chunk injection publicly outside the
    // crate; socket_io hands the already-filled pool chunk straight to the
    // queue rather than forcing a second byte copy through `Buffer::write`.
    buffer.push_chunk_from_socket(chunk);
}

/// Drain up to [`Tunables::send_iteration_cap`] chunks from `buffer` onto
/// `fd`. Stops early on a short write (the OS accepted fewer bytes than
/// offered), which under non-blocking semantics means the socket's send
/// buffer is full. Returns the total number of bytes sent.
pub fn socket_send<A>(fd: RawFd, buffer: &mut Buffer<A>) -> Result<usize> {
    let mut total = 0usize;
    for _ in 0..Tunables::send_iteration_cap() {
        if buffer.is_empty() {
            break;
        }
        let peek_len = buffer.len().min(chunk_peek_cap());
        let chunk = buffer.peek(peek_len as i64);
        if chunk.is_empty() {
            break;
        }
        match socket::send(fd, &chunk, MsgFlags::empty()) {
            Ok(0) => break,
            Ok(n) => {
                let consumed = buffer.read(n as i64);
                debug_assert_eq!(consumed.len(), n);
                total += n;
                if n < chunk.len() {
                    log::trace!("socket_send: fd {fd} short write ({n}/{} bytes)", chunk.len());
                    break;
                }
            }
            Err(e) if is_would_block(e) => {
                log::trace!("socket_send: fd {fd} would block after {total} bytes");
                break;
            }
            Err(e) => return Err(BufferError::Os(e)),
        }
    }
    Ok(total)
}

/// Drain up to [`Tunables::send_iteration_cap`] datagrams from `buffer`,
/// each sent to the address carried by its own head chunk's attachment
/// (per the tail-tie-break rule, each received/queued unit keeps the
/// destination it was written with). The head chunk's attachment is
/// validated fresh on every iteration — arity, host format, and port/
/// flowinfo range — per spec; a failure there surfaces before any syscall.
/// Returns the total bytes sent across every datagram this call drained.
pub fn socket_sendto(fd: RawFd, buffer: &mut Buffer<AddressAttachment>, family: AddressFamily) -> Result<usize> {
    let mut total = 0usize;
    for _ in 0..Tunables::send_iteration_cap() {
        if buffer.is_empty() {
            break;
        }
        let (chunk, attachment) = buffer.head();
        let attachment = attachment
            .ok_or_else(|| BufferError::TypeMismatch("buffer data must have a sock address attachment".into()))?;
        let addr = validate_address(&attachment, family)?;
        let storage = socket_addr_to_storage(addr);
        match socket::sendto(fd, &chunk, &storage, MsgFlags::empty()) {
            Ok(0) => break,
            Ok(n) => {
                buffer.read(n as i64);
                total += n;
                if n < chunk.len() {
                    log::trace!("socket_sendto: fd {fd} short write ({n}/{} bytes)", chunk.len());
                    break;
                }
            }
            Err(e) if is_would_block(e) => {
                log::trace!("socket_sendto: fd {fd} would block after {total} bytes");
                break;
            }
            Err(e) => return Err(BufferError::Os(e)),
        }
    }
    Ok(total)
}

fn chunk_peek_cap() -> usize {
    Tunables::slab_size()
}

/// One-shot, stateless receive directly into a caller-provided buffer, with
/// no queue or pool involvement. The module-level counterpart to the
/// reference implementation's standalone `cbuffer_socket_recv` function.
pub fn recv_once(fd: RawFd, dst: &mut [u8]) -> Result<usize> {
    match socket::recv(fd, dst, MsgFlags::empty()) {
        Ok(n) => Ok(n),
        Err(e) if is_would_block(e) => Ok(0),
        Err(e) => Err(BufferError::Os(e)),
    }
}

/// One-shot, stateless send directly from a caller-provided buffer, with no
/// queue or pool involvement.
pub fn send_once(fd: RawFd, src: &[u8]) -> Result<usize> {
    match socket::send(fd, src, MsgFlags::empty()) {
        Ok(n) => Ok(n),
        Err(e) if is_would_block(e) => Ok(0),
        Err(e) => Err(BufferError::Os(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::net::UdpSocket;

    #[test]
    fn recv_on_empty_nonblocking_socket_is_not_an_error() {
        let sock = UdpSocket::bind("127.0.0.1:0").expect("bind");
        sock.set_nonblocking(true).expect("nonblocking");
        let mut buf: Buffer<AddressAttachment> = Buffer::new();
        let result =
            socket_recvfrom(sock.as_raw_fd(), &mut buf, AddressFamily::Inet, None).expect("no error on EAGAIN");
        assert_eq!(result.0, 0);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn sendto_then_recvfrom_roundtrips_between_two_sockets() {
        let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
        receiver.set_nonblocking(true).expect("nonblocking");
        let receiver_addr = receiver.local_addr().expect("addr");

        let sender = UdpSocket::bind("127.0.0.1:0").expect("bind sender");
        sender.set_nonblocking(true).expect("nonblocking");

        let mut out: Buffer<AddressAttachment> = Buffer::new();
        out.write(b"ping", Some(AddressAttachment::from(receiver_addr)));
        let sent = socket_sendto(sender.as_raw_fd(), &mut out, AddressFamily::Inet).expect("sendto");
        assert_eq!(sent, 4);
        assert!(out.is_empty());

        // Give the loopback stack a moment; on most systems this is
        // already visible without a delay, but don't assume zero latency.
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut inbox: Buffer<AddressAttachment> = Buffer::new();
        let (n, from) = socket_recvfrom(receiver.as_raw_fd(), &mut inbox, AddressFamily::Inet, None).expect("recvfrom");
        assert_eq!(n, 4);
        assert!(from.is_some());
        assert_eq!(inbox.read_all().as_ref(), b"ping");
    }

    #[test]
    fn sendto_rejects_port_out_of_range() {
        let sender = UdpSocket::bind("127.0.0.1:0").expect("bind sender");
        sender.set_nonblocking(true).expect("nonblocking");

        let mut out: Buffer<AddressAttachment> = Buffer::new();
        out.write(b"x", Some(AddressAttachment::new("127.0.0.1", 70_000)));
        let err = socket_sendto(sender.as_raw_fd(), &mut out, AddressFamily::Inet).unwrap_err();
        assert!(matches!(err, BufferError::OverflowError(_)));
    }

    #[test]
    fn sendto_rejects_unparseable_host() {
        let sender = UdpSocket::bind("127.0.0.1:0").expect("bind sender");
        sender.set_nonblocking(true).expect("nonblocking");

        let mut out: Buffer<AddressAttachment> = Buffer::new();
        out.write(b"x", Some(AddressAttachment::new("not-an-ip", 9)));
        let err = socket_sendto(sender.as_raw_fd(), &mut out, AddressFamily::Inet).unwrap_err();
        assert!(matches!(err, BufferError::AddressFormatError(_)));
    }

    #[test]
    fn sendto_rejects_flowinfo_out_of_range() {
        let sender = UdpSocket::bind("127.0.0.1:0").expect("bind sender");
        sender.set_nonblocking(true).expect("nonblocking");

        let mut out: Buffer<AddressAttachment> = Buffer::new();
        out.write(b"x", Some(AddressAttachment::new("::1", 9).with_ipv6_fields(2_000_000, 0)));
        let err = socket_sendto(sender.as_raw_fd(), &mut out, AddressFamily::Inet6).unwrap_err();
        assert!(matches!(err, BufferError::OverflowError(_)));
    }
}
