// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Handles packets from the server.
//!
//! Each complete inbound frame is dispatched by packet type. Decode errors
//! are fatal to the connection; acknowledgements for unknown packet ids are
//! tolerated as the delivery tables allow.

use std::time::Instant;

use codec::{
    ByteArray, ConnectAckPacket, ConnectReturnCode, DecodePacket, FixedHeader, PacketId,
    PacketType, PingRequestPacket, PingResponsePacket, PublishAckPacket, PublishCompletePacket,
    PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS, SubscribeAckPacket,
    UnsubscribeAckPacket,
};

use crate::client::Client;
use crate::error::{Error, ErrorKind};
use crate::message_store::{DeliveryState, Direction, InFlightMessage};
use crate::publish::PublishMessage;
use crate::status::ClientStatus;

impl Client {
    pub(crate) fn handle_packet(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let fixed_header = FixedHeader::decode(&mut ba)?;
        match fixed_header.packet_type() {
            PacketType::ConnectAck => self.on_connect_ack(buf),
            PacketType::Publish { .. } => self.on_publish_message(buf),
            PacketType::PublishAck => self.on_publish_ack(buf),
            PacketType::PublishReceived => self.on_publish_received(buf),
            PacketType::PublishRelease => self.on_publish_release(buf),
            PacketType::PublishComplete => self.on_publish_complete(buf),
            PacketType::SubscribeAck => self.on_subscribe_ack(buf),
            PacketType::UnsubscribeAck => self.on_unsubscribe_ack(buf),
            PacketType::PingRequest => self.on_ping_request(buf),
            PacketType::PingResponse => self.on_ping_response(buf),
            t => Err(Error::from_string(
                ErrorKind::ProtocolViolation,
                format!("Unexpected packet from server: {t:?}"),
            )),
        }
    }

    fn on_connect_ack(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = ConnectAckPacket::decode(&mut ba)?;

        match self.status() {
            ClientStatus::Connecting => {
                let return_code = packet.return_code();
                if return_code == ConnectReturnCode::Accepted {
                    self.mark_connected();
                    self.notify_connect(return_code);
                } else {
                    log::warn!("client: Connection refused by server: {return_code:?}");
                    self.notify_connect(return_code);
                    self.mark_disconnected();
                }
                Ok(())
            }
            ClientStatus::Connected => Err(Error::new(
                ErrorKind::ProtocolViolation,
                "Unexpected ConnectAck on a connected session",
            )),
            status => {
                log::warn!("client: Ignoring ConnectAck in status {status:?}");
                Ok(())
            }
        }
    }

    fn on_publish_message(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = PublishPacket::decode(&mut ba)?;
        self.record_publish_received();

        match packet.qos() {
            QoS::AtMostOnce => {
                self.notify_message(PublishMessage::from(&packet));
                Ok(())
            }
            QoS::AtLeastOnce => {
                let ack_packet = PublishAckPacket::new(packet.packet_id());
                self.enqueue_reply(&ack_packet)?;
                self.notify_message(PublishMessage::from(&packet));
                Ok(())
            }
            QoS::ExactOnce => self.on_publish_message_qos2(&packet),
        }
    }

    /// First half of the exactly-once receive: acknowledge with
    /// PublishReceived and park the message until PublishRelease arrives.
    /// A redelivered packet with a known id is acknowledged again but the
    /// application is not notified twice.
    fn on_publish_message_qos2(&mut self, packet: &PublishPacket) -> Result<(), Error> {
        let packet_id = packet.packet_id();
        if !self.store.contains(Direction::Inbound, packet_id) {
            self.store.insert(InFlightMessage {
                packet_id,
                direction: Direction::Inbound,
                state: DeliveryState::WaitPublishRelease,
                topic: packet.topic().to_string(),
                payload: packet.message().to_vec(),
                qos: QoS::ExactOnce,
                retain: packet.retain(),
                dup: packet.dup(),
                timestamp: Instant::now(),
            });
        } else if !packet.dup() {
            log::warn!("client: Publish reuses an in-flight id without dup flag: {packet_id}");
        }

        let ack_packet = PublishReceivedPacket::new(packet_id);
        self.enqueue_reply(&ack_packet)
    }

    fn on_publish_ack(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = PublishAckPacket::decode(&mut ba)?;
        self.ack_outbound(packet.packet_id(), DeliveryState::WaitPublishAck);
        Ok(())
    }

    fn on_publish_complete(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = PublishCompletePacket::decode(&mut ba)?;
        self.ack_outbound(packet.packet_id(), DeliveryState::WaitPublishComplete);
        Ok(())
    }

    /// Finish an outbound exchange. The message leaves the store and the
    /// client is told exactly once; a stray acknowledgement is ignored.
    fn ack_outbound(&mut self, packet_id: PacketId, expected_state: DeliveryState) {
        let known = self
            .store
            .get(Direction::Outbound, packet_id)
            .map(|msg| msg.state);
        if known == Some(expected_state) {
            let _msg = self.store.remove(Direction::Outbound, packet_id);
            self.notify_publish(packet_id);
        } else {
            log::warn!("client: No outbound message waiting for ack, id: {packet_id}");
        }
    }

    fn on_publish_received(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = PublishReceivedPacket::decode(&mut ba)?;
        let packet_id = packet.packet_id();

        match self.store.get_mut(Direction::Outbound, packet_id) {
            Some(msg) if msg.state == DeliveryState::WaitPublishReceived => {
                msg.state = DeliveryState::WaitPublishComplete;
                msg.timestamp = Instant::now();
                let release_packet = PublishReleasePacket::new(packet_id);
                self.enqueue_reply(&release_packet)
            }
            _ => {
                log::warn!("client: No outbound message waiting for PublishReceived, id: {packet_id}");
                Ok(())
            }
        }
    }

    /// Second half of the exactly-once receive: the message is released to
    /// the application, removed from the store, and PublishComplete is sent.
    /// PublishComplete is sent even for unknown ids so a lost reply does not
    /// wedge the peer.
    fn on_publish_release(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = PublishReleasePacket::decode(&mut ba)?;
        let packet_id = packet.packet_id();

        if let Some(msg) = self.store.remove(Direction::Inbound, packet_id) {
            self.notify_message(PublishMessage {
                topic: msg.topic,
                qos: msg.qos,
                retain: msg.retain,
                payload: msg.payload,
            });
        } else {
            log::warn!("client: No inbound message waiting for release, id: {packet_id}");
        }

        let complete_packet = PublishCompletePacket::new(packet_id);
        self.enqueue_reply(&complete_packet)
    }

    fn on_subscribe_ack(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = SubscribeAckPacket::decode(&mut ba)?;
        let acknowledgements = packet.acknowledgements().to_vec();
        self.notify_subscribe(packet.packet_id(), &acknowledgements);
        Ok(())
    }

    fn on_unsubscribe_ack(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let packet = UnsubscribeAckPacket::decode(&mut ba)?;
        self.notify_unsubscribe(packet.packet_id());
        Ok(())
    }

    fn on_ping_request(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let _packet = PingRequestPacket::decode(&mut ba)?;
        let pong = PingResponsePacket::new();
        self.enqueue_reply(&pong)
    }

    #[allow(clippy::unnecessary_wraps)]
    fn on_ping_response(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(buf);
        let _packet = PingResponsePacket::decode(&mut ba)?;
        // Receipt is already accounted for in the incoming timestamp.
        Ok(())
    }
}
