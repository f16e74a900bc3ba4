// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

const STREAM_TOKEN: Token = Token(0);

/// Result of one readiness wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// A nonblocking duplex byte stream.
///
/// Reads and writes may be short or fail with `WouldBlock`; the packet
/// buffers resume from where they stopped. [`Stream::wait`] blocks until
/// the socket is ready or the timeout passes.
pub enum Stream {
    Tcp(TcpSocket),

    #[cfg(test)]
    Mem(MemStream),
}

pub struct TcpSocket {
    socket: TcpStream,
    poll: Poll,
    events: Events,
    interest: Interest,
}

impl Stream {
    /// Open a TCP connection to `address` and switch it to nonblocking mode.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established within
    /// `connect_timeout`.
    pub fn connect(address: &SocketAddr, connect_timeout: Duration) -> io::Result<Self> {
        let stream = std::net::TcpStream::connect_timeout(address, connect_timeout)?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let mut socket = TcpStream::from_std(stream);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, STREAM_TOKEN, Interest::READABLE)?;
        Ok(Self::Tcp(TcpSocket {
            socket,
            poll,
            events: Events::with_capacity(4),
            interest: Interest::READABLE,
        }))
    }

    /// Read into `buf`, returning the number of bytes read.
    ///
    /// # Errors
    ///
    /// `Ok(0)` means the peer closed the connection; `WouldBlock` means no
    /// bytes are available right now.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(inner) => inner.socket.read(buf),
            #[cfg(test)]
            Self::Mem(inner) => inner.read(buf),
        }
    }

    /// Write from `buf`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// `WouldBlock` means the socket buffer is full right now.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(inner) => inner.socket.write(buf),
            #[cfg(test)]
            Self::Mem(inner) => inner.write(buf),
        }
    }

    /// Block until the stream is readable, writable (only requested when
    /// `want_write` is set), or `timeout` passes.
    ///
    /// # Errors
    ///
    /// Returns error if the readiness wait itself fails.
    pub fn wait(&mut self, want_write: bool, timeout: Option<Duration>) -> io::Result<Readiness> {
        match self {
            Self::Tcp(inner) => {
                let interest = if want_write {
                    Interest::READABLE | Interest::WRITABLE
                } else {
                    Interest::READABLE
                };
                if interest != inner.interest {
                    inner
                        .poll
                        .registry()
                        .reregister(&mut inner.socket, STREAM_TOKEN, interest)?;
                    inner.interest = interest;
                }

                if let Err(err) = inner.poll.poll(&mut inner.events, timeout) {
                    if err.kind() == io::ErrorKind::Interrupted {
                        return Ok(Readiness::default());
                    }
                    return Err(err);
                }

                let mut readiness = Readiness::default();
                for event in inner.events.iter() {
                    if event.token() == STREAM_TOKEN {
                        readiness.readable |= event.is_readable() || event.is_read_closed();
                        readiness.writable |= event.is_writable();
                    }
                }
                Ok(readiness)
            }
            #[cfg(test)]
            Self::Mem(inner) => Ok(Readiness {
                readable: inner.has_input(),
                writable: true,
            }),
        }
    }

    /// Shut down both directions of the stream. Errors are ignored, the
    /// connection is gone either way.
    pub fn shutdown(&mut self) {
        match self {
            Self::Tcp(inner) => {
                let _ret = inner.socket.shutdown(std::net::Shutdown::Both);
            }
            #[cfg(test)]
            Self::Mem(_inner) => (),
        }
    }

    #[cfg(test)]
    pub fn mem(&mut self) -> &mut MemStream {
        match self {
            Self::Mem(inner) => inner,
            Self::Tcp(_) => panic!("Not a memory stream"),
        }
    }
}

/// In-memory stream with nonblocking-read semantics, for tests.
///
/// Bytes queued with `push_input` are served to `read` in chunks of at most
/// `chunk_size` bytes, so short reads and writes can be simulated.
#[cfg(test)]
#[derive(Debug)]
pub struct MemStream {
    input: Vec<u8>,
    input_pos: usize,
    output: Vec<u8>,
    chunk_size: usize,
    eof: bool,
}

#[cfg(test)]
impl Default for MemStream {
    fn default() -> Self {
        Self {
            input: Vec::new(),
            input_pos: 0,
            output: Vec::new(),
            chunk_size: usize::MAX,
            eof: false,
        }
    }
}

#[cfg(test)]
impl MemStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size;
    }

    /// After the queued input is drained, `read` reports end of file
    /// instead of `WouldBlock`.
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    pub fn has_input(&self) -> bool {
        self.input_pos < self.input.len() || self.eof
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.input.len() - self.input_pos;
        if remaining == 0 {
            if self.eof {
                return Ok(0);
            }
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let n = remaining.min(buf.len()).min(self.chunk_size);
        buf[..n].copy_from_slice(&self.input[self.input_pos..self.input_pos + n]);
        self.input_pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.chunk_size);
        self.output.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}
