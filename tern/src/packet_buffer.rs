// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Resumable packet buffers.
//!
//! Every syscall on a nonblocking socket may be short, so both directions
//! keep explicit cursors. The inbound buffer is a three phase state
//! machine: command byte, remaining-length varint, payload. The outbound
//! side holds fully encoded packets and resumes writing at a byte offset.

use std::collections::VecDeque;
use std::io;

use codec::{EncodePacket, PacketId, VarInt, MAX_PACKET_LEN};

use crate::error::{Error, ErrorKind};
use crate::stream::Stream;

/// Progress of the inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPhase {
    /// Waiting for the first byte of the next packet.
    Command,

    /// Collecting remaining-length bytes, one at a time.
    RemainingLength,

    /// Collecting the variable header and payload.
    Payload,
}

/// Incrementally assembles one inbound packet.
///
/// `read_from` can be called any number of times; it picks up exactly where
/// the previous short read stopped. A completed frame is returned as the
/// full packet bytes, fixed header included, ready for the packet decoders.
#[derive(Debug)]
pub struct InboundBuffer {
    phase: ReadPhase,
    command: u8,
    remaining_length: usize,
    multiplier: usize,
    length_bytes: usize,
    payload: Vec<u8>,
    pos: usize,
    to_process: usize,
}

impl Default for InboundBuffer {
    fn default() -> Self {
        Self {
            phase: ReadPhase::Command,
            command: 0,
            remaining_length: 0,
            multiplier: 1,
            length_bytes: 0,
            payload: Vec::new(),
            pos: 0,
            to_process: 0,
        }
    }
}

impl InboundBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partial frame and start over.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Pump bytes from `stream` into the current frame.
    ///
    /// Returns `Ok(Some(bytes))` when a frame completed, `Ok(None)` when the
    /// stream has no more bytes for now.
    ///
    /// # Errors
    ///
    /// Returns error if the peer closed the connection or the
    /// remaining-length field is malformed.
    pub fn read_from(&mut self, stream: &mut Stream) -> Result<Option<Vec<u8>>, Error> {
        if self.phase == ReadPhase::Command {
            match read_one_byte(stream)? {
                None => return Ok(None),
                Some(byte) => {
                    self.command = byte;
                    self.phase = ReadPhase::RemainingLength;
                }
            }
        }

        if self.phase == ReadPhase::RemainingLength {
            loop {
                let byte = match read_one_byte(stream)? {
                    None => return Ok(None),
                    Some(byte) => usize::from(byte),
                };
                self.length_bytes += 1;
                // At most four length bytes as defined by the protocol.
                if self.length_bytes > 4 {
                    return Err(Error::new(
                        ErrorKind::MalformedPacket,
                        "Remaining length field is longer than 4 bytes",
                    ));
                }
                self.remaining_length += (byte & 127) * self.multiplier;
                self.multiplier *= 128;

                if (byte & 128) == 0 {
                    break;
                }
            }
            if self.remaining_length > MAX_PACKET_LEN {
                return Err(Error::new(
                    ErrorKind::MalformedPacket,
                    "Remaining length exceeds maximum packet size",
                ));
            }
            self.payload = vec![0; self.remaining_length];
            self.pos = 0;
            self.to_process = self.remaining_length;
            self.phase = ReadPhase::Payload;
        }

        while self.to_process > 0 {
            match stream.read(&mut self.payload[self.pos..]) {
                Ok(0) => {
                    return Err(Error::new(
                        ErrorKind::TransportError,
                        "Connection closed while a packet was in progress",
                    ));
                }
                Ok(n) => {
                    self.to_process -= n;
                    self.pos += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err.into()),
            }
        }

        // Frame complete, rebuild the contiguous packet bytes.
        let remaining_length = VarInt::from(self.remaining_length)
            .map_err(|_err| Error::new(ErrorKind::MalformedPacket, "Invalid remaining length"))?;
        let mut frame = Vec::with_capacity(1 + remaining_length.bytes() + self.payload.len());
        frame.push(self.command);
        remaining_length
            .encode(&mut frame)
            .map_err(|err| Error::from_string(ErrorKind::EncodeError, format!("{err:?}")))?;
        frame.append(&mut self.payload);

        self.reset();
        Ok(Some(frame))
    }
}

fn read_one_byte(stream: &mut Stream) -> Result<Option<u8>, Error> {
    let mut byte = [0_u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(1) => return Ok(Some(byte[0])),
            Ok(_) => {
                return Err(Error::new(
                    ErrorKind::TransportError,
                    "Connection closed by peer",
                ))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
            Err(err) => return Err(err.into()),
        }
    }
}

/// One fully encoded packet waiting in the outbound queue.
#[derive(Debug)]
pub struct OutboundPacket {
    bytes: Vec<u8>,
    pos: usize,

    /// Set only for QoS 0 Publish packets: fire `on_publish` with this id
    /// once the packet is fully written. QoS 1/2 publishes report completion
    /// from the acknowledgement instead.
    publish_id: Option<PacketId>,
}

impl OutboundPacket {
    /// Encode `packet` into a queued buffer.
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails.
    pub fn encode<P: EncodePacket>(
        packet: &P,
        publish_id: Option<PacketId>,
    ) -> Result<Self, Error> {
        let mut bytes = Vec::new();
        packet.encode(&mut bytes)?;
        Ok(Self {
            bytes,
            pos: 0,
            publish_id,
        })
    }

    #[must_use]
    pub const fn publish_id(&self) -> Option<PacketId> {
        self.publish_id
    }

    /// Returns true if the queued bytes are a Publish packet of any QoS.
    #[must_use]
    pub fn is_publish(&self) -> bool {
        self.bytes.first().map_or(false, |byte| byte >> 4 == 3)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Write pending bytes to `stream`. Returns true when the whole packet
    /// has been written.
    ///
    /// # Errors
    ///
    /// Returns error if the peer closed the connection or the write failed.
    pub fn write_to(&mut self, stream: &mut Stream) -> Result<bool, Error> {
        while self.pos < self.bytes.len() {
            match stream.write(&self.bytes[self.pos..]) {
                Ok(0) => {
                    return Err(Error::new(
                        ErrorKind::TransportError,
                        "Connection closed while writing a packet",
                    ));
                }
                Ok(n) => self.pos += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(true)
    }
}

/// FIFO queue of outbound packets. The head is the packet currently being
/// written; new packets are appended at the tail.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    packets: VecDeque<OutboundPacket>,
}

impl OutboundQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: OutboundPacket) {
        self.packets.push_back(packet);
    }

    pub fn front_mut(&mut self) -> Option<&mut OutboundPacket> {
        self.packets.front_mut()
    }

    pub fn pop_front(&mut self) -> Option<OutboundPacket> {
        self.packets.pop_front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemStream;

    #[test]
    fn test_inbound_complete_frame() {
        let mut stream = Stream::Mem(MemStream::new());
        stream
            .mem()
            .push_input(&[0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']);

        let mut buffer = InboundBuffer::new();
        let frame = buffer.read_from(&mut stream).unwrap().unwrap();
        assert_eq!(
            frame,
            [0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']
        );
    }

    #[test]
    fn test_inbound_resumes_across_short_reads() {
        let mut stream = Stream::Mem(MemStream::new());
        stream.mem().set_chunk_size(1);
        stream
            .mem()
            .push_input(&[0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']);

        let mut buffer = InboundBuffer::new();
        // One byte arrives per read; progress is retained in between.
        let frame = loop {
            if let Some(frame) = buffer.read_from(&mut stream).unwrap() {
                break frame;
            }
        };
        assert_eq!(
            frame,
            [0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']
        );
    }

    #[test]
    fn test_inbound_zero_length_frame() {
        let mut stream = Stream::Mem(MemStream::new());
        stream.mem().push_input(&[0xd0, 0x00]);

        let mut buffer = InboundBuffer::new();
        let frame = buffer.read_from(&mut stream).unwrap().unwrap();
        assert_eq!(frame, [0xd0, 0x00]);
    }

    #[test]
    fn test_inbound_rejects_overlong_length() {
        let mut stream = Stream::Mem(MemStream::new());
        stream
            .mem()
            .push_input(&[0x30, 0xff, 0xff, 0xff, 0xff, 0x01]);

        let mut buffer = InboundBuffer::new();
        let err = buffer.read_from(&mut stream).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPacket);
    }

    #[test]
    fn test_inbound_eof_mid_frame_is_fatal() {
        let mut stream = Stream::Mem(MemStream::new());
        stream.mem().push_input(&[0x30, 0x07, 0x00]);
        stream.mem().set_eof();

        let mut buffer = InboundBuffer::new();
        let err = buffer.read_from(&mut stream).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError);
    }

    #[test]
    fn test_outbound_resumes_across_short_writes() {
        let packet =
            codec::PublishPacket::new("a/b", codec::QoS::AtMostOnce, b"hi").unwrap();
        let mut outbound = OutboundPacket::encode(&packet, None).unwrap();

        let mut stream = Stream::Mem(MemStream::new());
        stream.mem().set_chunk_size(2);

        let mut rounds = 0;
        while !outbound.write_to(&mut stream).unwrap() {
            rounds += 1;
            assert!(rounds < 16);
        }
        assert_eq!(
            stream.mem().output(),
            [0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']
        );
    }
}
