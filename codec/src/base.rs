// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::ops;

use crate::error::{DecodeError, EncodeError};
use crate::var_int::VarIntError;
use crate::{ByteArray, PacketType};

/// Protocol name of MQTT 3.1.
pub const PROTOCOL_NAME: &str = "MQIsdp";

/// Serialize a packet, or part of a packet, into a byte vector.
pub trait EncodePacket {
    /// Append encoded bytes to `buf` and return the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns error if fields in packet are invalid.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Parse a packet, or part of a packet, from a byte array.
pub trait DecodePacket: Sized {
    /// Read bytes from `ba` and construct a packet object.
    ///
    /// # Errors
    ///
    /// Returns error if bytes in `ba` are malformed.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Common packet operations.
pub trait Packet: fmt::Debug {
    /// Get packet type in fixed header.
    fn packet_type(&self) -> PacketType;

    /// Get byte length of the whole packet on the wire.
    ///
    /// # Errors
    ///
    /// Returns error if packet size is invalid.
    fn bytes(&self) -> Result<usize, VarIntError>;
}

/// Quality of service level of a publish message.
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize,
)]
pub enum QoS {
    /// At most once delivery.
    #[default]
    AtMostOnce = 0,

    /// At least once delivery.
    AtLeastOnce = 1,

    /// Exactly once delivery.
    ExactOnce = 2,
}

impl QoS {
    /// Get byte length used in packet.
    #[must_use]
    #[inline]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}

/// Packet identifier of an outstanding QoS 1 or QoS 2 exchange.
///
/// SUBSCRIBE, UNSUBSCRIBE, and PUBLISH (in cases where QoS > 0) control
/// packets MUST contain a non-zero 16-bit packet identifier [MQTT-2.3.1-1].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
)]
pub struct PacketId(u16);

impl PacketId {
    /// Create a new packet id.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get inner u16 value.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Get byte length used in packet.
    #[must_use]
    #[inline]
    pub const fn bytes() -> usize {
        2
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ops::AddAssign<u16> for PacketId {
    fn add_assign(&mut self, value: u16) {
        self.0 += value;
    }
}

impl PartialEq<u16> for PacketId {
    fn eq(&self, value: &u16) -> bool {
        self.0 == *value
    }
}

impl DecodePacket for PacketId {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let value = ba.read_u16()?;
        Ok(Self(value))
    }
}

impl EncodePacket for PacketId {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.0)?;
        Ok(Self::bytes())
    }
}
