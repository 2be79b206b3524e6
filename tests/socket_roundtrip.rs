//! End-to-end exercises of `chunkio` against real loopback sockets, as
//! opposed to the unit tests colocated in each module.

use std::os::unix::io::AsRawFd;

use chunkio::socket_io::{socket_recv, socket_recvfrom, socket_send, socket_sendto, AddressAttachment, AddressFamily};
use chunkio::{Buffer, Tunables};

fn nonblocking_udp() -> std::net::UdpSocket {
    let sock = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind udp");
    sock.set_nonblocking(true).expect("set nonblocking");
    sock
}

fn nonblocking_tcp_pair() -> (std::net::TcpStream, std::net::TcpStream) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind tcp listener");
    let addr = listener.local_addr().expect("listener addr");
    let client = std::net::TcpStream::connect(addr).expect("connect");
    let (server, _) = listener.accept().expect("accept");
    client.set_nonblocking(true).expect("client nonblocking");
    server.set_nonblocking(true).expect("server nonblocking");
    (client, server)
}

#[test]
fn udp_datagrams_carry_the_sender_address_as_an_attachment() {
    let receiver = nonblocking_udp();
    let receiver_addr = receiver.local_addr().expect("receiver addr");
    let sender = nonblocking_udp();
    let sender_addr = sender.local_addr().expect("sender addr");

    let mut outbound: Buffer<AddressAttachment> = Buffer::new();
    outbound.write(b"hello from sender", Some(AddressAttachment::from(receiver_addr)));
    let sent = socket_sendto(sender.as_raw_fd(), &mut outbound, AddressFamily::Inet).expect("sendto");
    assert_eq!(sent, 17);
    assert!(outbound.is_empty());

    std::thread::sleep(std::time::Duration::from_millis(20));

    let mut inbound: Buffer<AddressAttachment> = Buffer::new();
    let (n, from) = socket_recvfrom(receiver.as_raw_fd(), &mut inbound, AddressFamily::Inet, None).expect("recvfrom");
    assert_eq!(n, 17);
    let expected = AddressAttachment::from(sender_addr);
    assert_eq!(from, Some(expected.clone()));
    assert_eq!(inbound.last_attachment(), Some(expected));
    assert_eq!(inbound.read_all().as_ref(), b"hello from sender");
}

#[test]
fn udp_sendto_validates_the_head_chunks_address() {
    let sender = nonblocking_udp();
    let mut outbound: Buffer<AddressAttachment> = Buffer::new();
    outbound.write(b"x", Some(AddressAttachment::new("127.0.0.1", 99_999)));
    let err = socket_sendto(sender.as_raw_fd(), &mut outbound, AddressFamily::Inet).unwrap_err();
    assert!(matches!(err, chunkio::BufferError::OverflowError(_)));
}

#[test]
fn tcp_stream_send_recv_loop_drains_across_multiple_writes() {
    let (client, server) = nonblocking_tcp_pair();

    let mut outbound: Buffer<()> = Buffer::new();
    outbound.write(b"first chunk, ", None);
    outbound.write(b"second chunk", None);
    let total_len = outbound.len();

    let mut sent = 0;
    while sent < total_len {
        sent += socket_send(client.as_raw_fd(), &mut outbound).expect("socket_send");
        if sent < total_len {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
    assert!(outbound.is_empty());

    std::thread::sleep(std::time::Duration::from_millis(20));

    let mut inbound: Buffer<()> = Buffer::new();
    socket_recv(server.as_raw_fd(), &mut inbound, None, None).expect("socket_recv");
    assert_eq!(inbound.read_all().as_ref(), b"first chunk, second chunk");
}

#[test]
fn recv_on_a_socket_with_nothing_queued_is_a_clean_zero_not_an_error() {
    let (_client, server) = nonblocking_tcp_pair();
    let mut inbound: Buffer<()> = Buffer::new();
    let n = socket_recv(server.as_raw_fd(), &mut inbound, None, None).expect("socket_recv");
    assert_eq!(n, 0);
    assert!(inbound.is_empty());
}

#[test]
fn max_len_stops_recv_once_the_high_water_mark_is_exceeded() {
    let (client, server) = nonblocking_tcp_pair();

    let mut outbound: Buffer<()> = Buffer::new();
    outbound.write(&vec![7u8; 4096], None);
    let mut sent = 0;
    while sent < 4096 {
        sent += socket_send(client.as_raw_fd(), &mut outbound).expect("socket_send");
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    std::thread::sleep(std::time::Duration::from_millis(20));

    let mut inbound: Buffer<()> = Buffer::new();
    let n = socket_recv(server.as_raw_fd(), &mut inbound, None, Some(256)).expect("socket_recv");
    assert!(n >= 256, "expected at least the requested high-water mark, got {n}");
    assert_eq!(inbound.len(), n);
}

#[test]
fn shrinking_the_iteration_cap_still_drains_fully_over_several_calls() {
    let (client, server) = nonblocking_tcp_pair();

    let previous_cap = Tunables::recv_iteration_cap();
    Tunables::set_recv_iteration_cap(1);

    let mut outbound: Buffer<()> = Buffer::new();
    let payload = vec![7u8; 64 * 1024];
    outbound.write(&payload, None);

    let mut sent = 0;
    while sent < payload.len() {
        sent += socket_send(client.as_raw_fd(), &mut outbound).expect("socket_send");
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    let mut inbound: Buffer<()> = Buffer::new();
    let mut received = 0;
    let mut attempts = 0;
    while received < payload.len() && attempts < 1000 {
        received += socket_recv(server.as_raw_fd(), &mut inbound, None, None).expect("socket_recv");
        if received < payload.len() {
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        attempts += 1;
    }

    Tunables::set_recv_iteration_cap(previous_cap);

    assert_eq!(received, payload.len());
    assert_eq!(inbound.read_all().as_ref(), payload.as_slice());
}
