// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Instant;

use codec::{PacketId, QoS};

/// Direction of an in-flight message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Position of an in-flight message in its QoS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Outbound QoS 1 message, waiting for PublishAck.
    WaitPublishAck,

    /// Outbound QoS 2 message, waiting for PublishReceived.
    WaitPublishReceived,

    /// Inbound QoS 2 message, waiting for PublishRelease.
    WaitPublishRelease,

    /// Outbound QoS 2 message, PublishReceived seen, waiting for
    /// PublishComplete.
    WaitPublishComplete,
}

/// A QoS 1 or QoS 2 message whose handshake has not finished yet.
///
/// Outbound messages keep a full copy of topic and payload so that a
/// retry can rebuild the original Publish packet.
#[derive(Debug, Clone)]
pub struct InFlightMessage {
    pub packet_id: PacketId,
    pub direction: Direction,
    pub state: DeliveryState,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,

    /// When the last protocol event for this message happened; drives the
    /// retry timer.
    pub timestamp: Instant,
}

/// In-flight messages of one session, keyed by `(direction, packet_id)`.
///
/// At most one entry exists per key. Insertion order is preserved so that
/// the retry scan resends messages deterministically. QoS 0 messages are
/// never stored.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<InFlightMessage>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Append a message. The caller checks the key is not present yet.
    pub fn insert(&mut self, message: InFlightMessage) {
        debug_assert!(!self.contains(message.direction, message.packet_id));
        self.messages.push(message);
    }

    #[must_use]
    pub fn contains(&self, direction: Direction, packet_id: PacketId) -> bool {
        self.get(direction, packet_id).is_some()
    }

    #[must_use]
    pub fn get(&self, direction: Direction, packet_id: PacketId) -> Option<&InFlightMessage> {
        self.messages
            .iter()
            .find(|msg| msg.direction == direction && msg.packet_id == packet_id)
    }

    pub fn get_mut(
        &mut self,
        direction: Direction,
        packet_id: PacketId,
    ) -> Option<&mut InFlightMessage> {
        self.messages
            .iter_mut()
            .find(|msg| msg.direction == direction && msg.packet_id == packet_id)
    }

    /// Remove the message with this key and hand it back.
    pub fn remove(
        &mut self,
        direction: Direction,
        packet_id: PacketId,
    ) -> Option<InFlightMessage> {
        let index = self
            .messages
            .iter()
            .position(|msg| msg.direction == direction && msg.packet_id == packet_id)?;
        Some(self.messages.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &InFlightMessage> {
        self.messages.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut InFlightMessage> {
        self.messages.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(packet_id: u16, direction: Direction, state: DeliveryState) -> InFlightMessage {
        InFlightMessage {
            packet_id: PacketId::new(packet_id),
            direction,
            state,
            topic: "a/b".to_string(),
            payload: b"hi".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: false,
            dup: false,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_keyed_by_direction_and_id() {
        let mut store = MessageStore::new();
        store.insert(new_message(1, Direction::Outbound, DeliveryState::WaitPublishAck));
        store.insert(new_message(1, Direction::Inbound, DeliveryState::WaitPublishRelease));
        assert_eq!(store.len(), 2);

        assert!(store.contains(Direction::Outbound, PacketId::new(1)));
        let removed = store.remove(Direction::Outbound, PacketId::new(1)).unwrap();
        assert_eq!(removed.state, DeliveryState::WaitPublishAck);
        assert!(store.contains(Direction::Inbound, PacketId::new(1)));
        assert!(!store.contains(Direction::Outbound, PacketId::new(1)));
    }

    #[test]
    fn test_preserves_insertion_order() {
        let mut store = MessageStore::new();
        for packet_id in [3, 1, 2] {
            store.insert(new_message(
                packet_id,
                Direction::Outbound,
                DeliveryState::WaitPublishAck,
            ));
        }
        let order: Vec<u16> = store.iter().map(|msg| msg.packet_id.value()).collect();
        assert_eq!(order, [3, 1, 2]);
    }
}
