// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply channel over TCP.
//!
//! A `ReqChannel` is the controller-side end of a CSCP connection: one
//! outstanding request at a time, strictly alternating send and receive.
//! The satellite side accepts connections from a listener created by
//! [`tcp_listener`] and answers one request per read.

use super::frame::{read_frames, write_frames};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// Create a reusable TCP listener bound to `bind_addr`.
///
/// The listener is non-blocking so accept loops can poll a stop flag.
pub fn tcp_listener(bind_addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&bind_addr.into())?;
    socket.listen(128)?;

    let listener: TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// REQ-style channel: serialized request/reply roundtrips to one peer.
#[derive(Debug)]
pub struct ReqChannel {
    stream: TcpStream,
    uri: String,
}

impl ReqChannel {
    /// Connect to a remote reply endpoint.
    ///
    /// The timeout applies to connection establishment and to every
    /// subsequent reply read.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(Self {
            stream,
            uri: format!("tcp://{}", addr),
        })
    }

    /// Endpoint URI this channel is connected to.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Send a multipart request and read exactly one multipart reply.
    pub fn request(&mut self, frames: &[Vec<u8>]) -> io::Result<Vec<Vec<u8>>> {
        write_frames(&mut self.stream, frames)?;
        read_frames(&mut self.stream)
    }

    /// Shut down both directions; any blocked roundtrip observes a transport
    /// failure.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use std::thread;

    fn echo_server() -> (SocketAddr, thread::JoinHandle<()>) {
        let listener = tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || loop {
            match listener.accept() {
                Ok((mut stream, _)) => {
                    let _ = stream.set_nonblocking(false);
                    while let Ok(frames) = read_frames(&mut stream) {
                        if write_frames(&mut stream, &frames).is_err() {
                            break;
                        }
                    }
                    break;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(_) => break,
            }
        });
        (addr, handle)
    }

    #[test]
    fn test_request_reply_roundtrip() {
        let (addr, handle) = echo_server();
        let mut channel = ReqChannel::connect(addr, Duration::from_secs(1)).unwrap();

        let frames = vec![b"hello".to_vec(), b"world".to_vec()];
        let reply = channel.request(&frames).unwrap();
        assert_eq!(reply, frames);

        channel.close();
        handle.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        // Port 1 on loopback is essentially never bound.
        let result = ReqChannel::connect(
            "127.0.0.1:1".parse().unwrap(),
            Duration::from_millis(200),
        );
        assert!(result.is_err());
    }
}
