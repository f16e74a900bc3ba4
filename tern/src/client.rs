// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::{Duration, Instant};

use codec::{
    ConnectPacket, DisconnectPacket, EncodePacket, PacketId, PingRequestPacket, PublishPacket,
    PublishReleasePacket, QoS, SubscribePacket, UnsubscribePacket,
};

use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};
use crate::events::EventHandler;
use crate::message_store::{DeliveryState, Direction, InFlightMessage, MessageStore};
use crate::packet_buffer::{InboundBuffer, OutboundPacket, OutboundQueue};
use crate::session::Session;
use crate::stats::ClientStats;
use crate::status::ClientStatus;
use crate::stream::Stream;

/// How long the readiness wait blocks when `loop_once` is called without
/// a timeout.
const DEFAULT_LOOP_TIMEOUT: Duration = Duration::from_secs(1);

/// How many times `disconnect` retries the drain of pending packets before
/// closing the socket anyway.
const DISCONNECT_DRAIN_ROUNDS: usize = 8;

/// MQTT 3.1 client with a single-threaded, readiness-driven connection loop.
///
/// One `Client` owns one session and one socket. All I/O happens inside
/// [`Client::loop_once`]; the only blocking point is its readiness wait.
/// Event callbacks run synchronously on the calling thread.
pub struct Client {
    session: Session,
    status: ClientStatus,
    stream: Option<Stream>,
    connect_options: ConnectOptions,

    inbound: InboundBuffer,
    outbound: OutboundQueue,
    pub(crate) store: MessageStore,

    handler: Option<Box<dyn EventHandler>>,
    stats: ClientStats,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("status", &self.status)
            .field("connect_options", &self.connect_options)
            .finish_non_exhaustive()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.status == ClientStatus::Connected {
            let _ret = self.disconnect();
        }
    }
}

impl Client {
    /// Create a new client object. No socket is connected to the server yet.
    ///
    /// # Errors
    ///
    /// Returns error if the client id in `connect_options` is empty.
    pub fn new(connect_options: ConnectOptions) -> Result<Self, Error> {
        if connect_options.client_id().is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                "client_id must not be empty",
            ));
        }
        let mut session = Session::new(
            connect_options.client_id(),
            connect_options.keep_alive(),
            connect_options.clean_session(),
        );
        session.set_message_retry(connect_options.message_retry());
        Ok(Self {
            session,
            status: ClientStatus::Disconnected,
            stream: None,
            connect_options,

            inbound: InboundBuffer::new(),
            outbound: OutboundQueue::new(),
            store: MessageStore::new(),

            handler: None,
            stats: ClientStats::default(),
        })
    }

    /// Get current connection status.
    #[must_use]
    pub const fn status(&self) -> ClientStatus {
        self.status
    }

    /// Get connection options.
    #[must_use]
    pub const fn connect_options(&self) -> &ConnectOptions {
        &self.connect_options
    }

    /// Get session traffic counters.
    #[must_use]
    pub const fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Install the event handler. It replaces any previous one.
    pub fn set_handler(&mut self, handler: Box<dyn EventHandler>) {
        self.handler = Some(handler);
    }

    /// Update the resend interval of unacknowledged QoS 1/2 messages.
    pub fn set_message_retry(&mut self, message_retry: Duration) {
        self.session.set_message_retry(message_retry);
    }

    /// Set the will message, replacing any previous one. Takes effect on the
    /// next connect.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn set_will(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Error> {
        self.session.set_will(topic, payload, qos, retain)
    }

    /// Remove the will message.
    pub fn clear_will(&mut self) {
        self.session.clear_will();
    }

    /// Open the network connection and send a Connect packet.
    ///
    /// The session switches to `Connecting`; it becomes `Connected` when the
    /// server's ConnectAck arrives in `loop_once`.
    ///
    /// # Errors
    ///
    /// Returns error if a connection attempt is already running or the
    /// transport cannot be established.
    pub fn connect(&mut self) -> Result<(), Error> {
        if self.status != ClientStatus::Disconnected {
            return Err(Error::new(
                ErrorKind::InvalidClientStatus,
                "Already connected or connecting",
            ));
        }

        let stream = Stream::connect(
            self.connect_options.address(),
            self.connect_options.connect_timeout(),
        )?;
        self.stream = Some(stream);
        self.session.reset_timestamps(Instant::now());
        self.status = ClientStatus::Connecting;

        let mut packet = ConnectPacket::new(self.session.client_id())?;
        #[allow(clippy::cast_possible_truncation)]
        let keep_alive = self.session.keep_alive().as_secs().min(u64::from(u16::MAX)) as u16;
        packet.set_keep_alive(keep_alive);
        packet.set_clean_session(self.session.clean_session());
        if let Some(will) = self.session.will() {
            packet.set_will(will.topic.as_ref(), &will.payload, will.qos, will.retain)?;
        }
        self.enqueue(&packet, None)?;
        Ok(())
    }

    /// Send a Disconnect packet, drain pending output and close the socket.
    ///
    /// The in-flight store survives unless clean-session is set.
    ///
    /// # Errors
    ///
    /// Returns error if the session is not connected.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        if self.status != ClientStatus::Connected {
            return Err(Error::new(ErrorKind::NotConnected, "Not connected"));
        }
        self.status = ClientStatus::Disconnecting;

        let packet = DisconnectPacket::new();
        if let Err(err) = self.enqueue(&packet, None) {
            log::error!("client: Failed to queue disconnect packet: {err}");
        }

        // After sending a Disconnect packet the client MUST close the
        // network connection and MUST NOT send any more control packets
        // on it [MQTT-3.14.4-1].
        let mut rounds = 0;
        while !self.outbound.is_empty() {
            if let Err(err) = self.write_packets() {
                log::warn!("client: Drain failed during disconnect: {err}");
                break;
            }
            if self.outbound.is_empty() {
                break;
            }
            rounds += 1;
            if rounds > DISCONNECT_DRAIN_ROUNDS {
                log::warn!("client: Giving up on draining output queue");
                break;
            }
            if let Some(stream) = self.stream.as_mut() {
                if let Err(err) = stream.wait(true, Some(Duration::from_millis(250))) {
                    log::warn!("client: Readiness wait failed during disconnect: {err}");
                    break;
                }
            }
        }

        self.drop_connection();
        Ok(())
    }

    /// Publish `payload` on `topic`.
    ///
    /// Returns the packet id of the new message. For QoS 1 and QoS 2 the
    /// message is stored with a full payload copy until the handshake
    /// finishes; `on_publish` fires with this id when it does. For QoS 0
    /// `on_publish` fires as soon as the packet is written out.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or the session is not connected.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<PacketId, Error> {
        if self.status != ClientStatus::Connected {
            return Err(Error::new(ErrorKind::NotConnected, "Not connected"));
        }

        let mut packet = PublishPacket::new(topic, qos, payload)?;
        packet.set_retain(retain);
        let packet_id = self.next_unused_packet_id();

        match qos {
            QoS::AtMostOnce => {
                // The id never goes on the wire; it only names the message
                // in the completion callback.
                self.enqueue(&packet, Some(packet_id))?;
            }
            QoS::AtLeastOnce | QoS::ExactOnce => {
                packet.set_packet_id(packet_id);
                let state = if qos == QoS::AtLeastOnce {
                    DeliveryState::WaitPublishAck
                } else {
                    DeliveryState::WaitPublishReceived
                };
                self.store.insert(InFlightMessage {
                    packet_id,
                    direction: Direction::Outbound,
                    state,
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                    qos,
                    retain,
                    dup: false,
                    timestamp: Instant::now(),
                });
                self.enqueue(&packet, None)?;
            }
        }
        Ok(packet_id)
    }

    /// Subscribe to `topic` filter with a maximum `qos`.
    ///
    /// Returns the packet id carried by the Subscribe packet; `on_subscribe`
    /// reports the granted QoS with the same id.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or the session is not connected.
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<PacketId, Error> {
        if self.status != ClientStatus::Connected {
            return Err(Error::new(ErrorKind::NotConnected, "Not connected"));
        }
        let packet_id = self.next_unused_packet_id();
        let packet = SubscribePacket::new(topic, qos, packet_id)?;
        self.enqueue(&packet, None)?;
        Ok(packet_id)
    }

    /// Cancel the subscription to `topic` filter.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or the session is not connected.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<PacketId, Error> {
        if self.status != ClientStatus::Connected {
            return Err(Error::new(ErrorKind::NotConnected, "Not connected"));
        }
        let packet_id = self.next_unused_packet_id();
        let packet = UnsubscribePacket::new(topic, packet_id)?;
        self.enqueue(&packet, None)?;
        Ok(packet_id)
    }

    /// Run one iteration of the connection loop: wait for socket readiness,
    /// pump inbound and outbound packets, then run the keep-alive and retry
    /// timers.
    ///
    /// `timeout` bounds the readiness wait; on timeout only the timers run.
    ///
    /// # Errors
    ///
    /// Returns error on fatal transport or protocol problems. The connection
    /// is already closed when this happens and the status is `Disconnected`.
    pub fn loop_once(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        if self.stream.is_none() || self.status == ClientStatus::Disconnected {
            return Err(Error::new(ErrorKind::NotConnected, "Not connected"));
        }

        let want_write = !self.outbound.is_empty();
        let timeout = timeout.or(Some(DEFAULT_LOOP_TIMEOUT));
        let readiness = match self.stream.as_mut() {
            Some(stream) => stream.wait(want_write, timeout)?,
            None => return Err(Error::new(ErrorKind::NotConnected, "Not connected")),
        };

        if readiness.readable {
            if let Err(err) = self.read_packets() {
                log::error!("client: Network read failed: {err}");
                self.drop_connection();
                return Err(err);
            }
        }
        if readiness.writable {
            if let Err(err) = self.write_packets() {
                log::error!("client: Network write failed: {err}");
                self.drop_connection();
                return Err(err);
            }
        }

        self.tick(Instant::now())
    }

    /// Run the keep-alive and retry timers against `now`.
    fn tick(&mut self, now: Instant) -> Result<(), Error> {
        if self.status == ClientStatus::Connected && self.session.ping_due(now) {
            log::debug!("client: Sending ping request");
            let packet = PingRequestPacket::new();
            self.enqueue(&packet, None)?;
            self.session.record_outgoing(now);
        }

        // If no bytes of any kind arrive within one and a half times the
        // keep alive period, the connection is considered lost.
        if self.status == ClientStatus::Connected && self.session.peer_lost(now) {
            log::warn!("client: Keep alive deadline missed, connection lost");
            self.drop_connection();
            return Err(Error::new(
                ErrorKind::TransportError,
                "Keep alive deadline missed",
            ));
        }

        if self.status == ClientStatus::Connected {
            self.check_retry(now)?;
        }
        Ok(())
    }

    /// Resend outbound messages whose acknowledgement is overdue.
    fn check_retry(&mut self, now: Instant) -> Result<(), Error> {
        let message_retry = self.session.message_retry();
        if message_retry.is_zero() {
            return Ok(());
        }

        let mut resends = Vec::new();
        for msg in self.store.iter_mut() {
            if msg.direction != Direction::Outbound {
                continue;
            }
            if now.duration_since(msg.timestamp) < message_retry {
                continue;
            }
            match msg.state {
                DeliveryState::WaitPublishAck | DeliveryState::WaitPublishReceived => {
                    let mut packet = PublishPacket::new(&msg.topic, msg.qos, &msg.payload)?;
                    packet.set_packet_id(msg.packet_id);
                    packet.set_retain(msg.retain);
                    packet.set_dup(true)?;
                    msg.dup = true;
                    msg.timestamp = now;
                    log::info!(
                        "client: Resending publish, id: {}, topic: {}",
                        msg.packet_id,
                        msg.topic
                    );
                    resends.push(OutboundPacket::encode(&packet, None)?);
                }
                DeliveryState::WaitPublishComplete => {
                    let packet = PublishReleasePacket::new(msg.packet_id);
                    msg.timestamp = now;
                    log::info!("client: Resending publish release, id: {}", msg.packet_id);
                    resends.push(OutboundPacket::encode(&packet, None)?);
                }
                DeliveryState::WaitPublishRelease => (),
            }
        }

        if !resends.is_empty() {
            for packet in resends {
                self.outbound.push(packet);
            }
            self.session.record_outgoing(now);
        }
        Ok(())
    }

    /// Read frames until the socket has nothing more, dispatching each one.
    fn read_packets(&mut self) -> Result<(), Error> {
        loop {
            // The connection may be dropped by a dispatch handler, a refused
            // ConnectAck for example; stop pumping quietly then.
            let frame = match self.stream.as_mut() {
                Some(stream) => self.inbound.read_from(stream)?,
                None => return Ok(()),
            };
            let Some(frame) = frame else {
                return Ok(());
            };

            self.stats.messages_received += 1;
            self.stats.bytes_received += frame.len() as u64;
            self.session.record_incoming(Instant::now());
            self.handle_packet(&frame)?;
        }
    }

    /// Write queued packets until the queue is empty or the socket blocks.
    fn write_packets(&mut self) -> Result<(), Error> {
        loop {
            let complete = match self.outbound.front_mut() {
                None => return Ok(()),
                Some(packet) => match self.stream.as_mut() {
                    Some(stream) => packet.write_to(stream)?,
                    None => return Ok(()),
                },
            };
            if !complete {
                return Ok(());
            }

            if let Some(done) = self.outbound.pop_front() {
                self.stats.messages_sent += 1;
                self.stats.bytes_sent += done.len() as u64;
                if done.is_publish() {
                    self.stats.publish_messages_sent += 1;
                }
                if let Some(packet_id) = done.publish_id() {
                    self.notify_publish(packet_id);
                }
            }
            self.session.record_outgoing(Instant::now());
        }
    }

    /// Close the socket and reset per-connection state. The in-flight store
    /// is cleared only for clean sessions.
    fn drop_connection(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown();
        }
        self.status = ClientStatus::Disconnected;
        self.inbound.reset();
        self.outbound.clear();
        if self.session.clean_session() {
            self.store.clear();
        }
    }

    /// Encode `packet` and append it to the outbound queue.
    fn enqueue<P: EncodePacket>(
        &mut self,
        packet: &P,
        publish_id: Option<PacketId>,
    ) -> Result<(), Error> {
        let packet = OutboundPacket::encode(packet, publish_id)?;
        self.outbound.push(packet);
        Ok(())
    }

    /// Allocate a packet id which is not tied to any in-flight message.
    /// Ids stay reserved until their exchange completes.
    fn next_unused_packet_id(&mut self) -> PacketId {
        loop {
            let packet_id = self.session.next_packet_id();
            if !self.store.contains(Direction::Outbound, packet_id) {
                return packet_id;
            }
        }
    }

    pub(crate) fn mark_connected(&mut self) {
        self.status = ClientStatus::Connected;
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.drop_connection();
    }

    pub(crate) fn enqueue_reply<P: EncodePacket>(&mut self, packet: &P) -> Result<(), Error> {
        self.enqueue(packet, None)?;
        self.session.record_outgoing(Instant::now());
        Ok(())
    }

    pub(crate) fn record_publish_received(&mut self) {
        self.stats.publish_messages_received += 1;
    }

    pub(crate) fn notify_connect(&mut self, return_code: codec::ConnectReturnCode) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_connect(return_code);
        }
    }

    pub(crate) fn notify_publish(&mut self, packet_id: PacketId) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_publish(packet_id);
        }
    }

    pub(crate) fn notify_message(&mut self, message: crate::publish::PublishMessage) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_message(message);
        }
    }

    pub(crate) fn notify_subscribe(
        &mut self,
        packet_id: PacketId,
        acknowledgements: &[codec::SubscribeAck],
    ) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_subscribe(packet_id, acknowledgements);
        }
    }

    pub(crate) fn notify_unsubscribe(&mut self, packet_id: PacketId) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_unsubscribe(packet_id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use codec::{ConnectReturnCode, SubscribeAck};

    use super::*;
    use crate::publish::PublishMessage;
    use crate::stream::MemStream;

    /// Events observed by the recording handler, in callback order.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Event {
        Connect(ConnectReturnCode),
        Publish(u16),
        Message(PublishMessage),
        Subscribe(u16, Vec<SubscribeAck>),
        Unsubscribe(u16),
    }

    #[derive(Debug, Default, Clone)]
    pub(crate) struct Recorder {
        pub(crate) events: Rc<RefCell<Vec<Event>>>,
    }

    impl EventHandler for Recorder {
        fn on_connect(&mut self, return_code: ConnectReturnCode) {
            self.events.borrow_mut().push(Event::Connect(return_code));
        }

        fn on_publish(&mut self, packet_id: PacketId) {
            self.events
                .borrow_mut()
                .push(Event::Publish(packet_id.value()));
        }

        fn on_message(&mut self, message: PublishMessage) {
            self.events.borrow_mut().push(Event::Message(message));
        }

        fn on_subscribe(&mut self, packet_id: PacketId, acknowledgements: &[SubscribeAck]) {
            self.events.borrow_mut().push(Event::Subscribe(
                packet_id.value(),
                acknowledgements.to_vec(),
            ));
        }

        fn on_unsubscribe(&mut self, packet_id: PacketId) {
            self.events
                .borrow_mut()
                .push(Event::Unsubscribe(packet_id.value()));
        }
    }

    /// A connected client over an in-memory stream, with a recording
    /// handler attached.
    pub(crate) fn connected_client(keep_alive: Duration) -> (Client, Rc<RefCell<Vec<Event>>>) {
        let mut options = ConnectOptions::default();
        options
            .set_client_id("test-client")
            .set_keep_alive(keep_alive);
        let mut client = Client::new(options).unwrap();
        client.stream = Some(Stream::Mem(MemStream::new()));
        client.status = ClientStatus::Connected;

        let recorder = Recorder::default();
        let events = Rc::clone(&recorder.events);
        client.set_handler(Box::new(recorder));
        (client, events)
    }

    impl Client {
        pub(crate) fn mem(&mut self) -> &mut MemStream {
            self.stream.as_mut().unwrap().mem()
        }

        pub(crate) fn set_status(&mut self, status: ClientStatus) {
            self.status = status;
        }

        /// Feed queued input through the reader and flush queued output,
        /// like one loop iteration without the readiness wait.
        pub(crate) fn pump(&mut self) -> Result<(), Error> {
            self.read_packets()?;
            self.write_packets()
        }
    }

    #[test]
    fn test_new_rejects_empty_client_id() {
        let mut options = ConnectOptions::default();
        options.set_client_id("");
        let err = Client::new(options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_publish_requires_connected() {
        let options = ConnectOptions::default();
        let mut client = Client::new(options).unwrap();
        let err = client.publish("a/b", b"hi", QoS::AtMostOnce, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[test]
    fn test_publish_rejects_empty_topic() {
        let (mut client, _events) = connected_client(Duration::from_secs(60));
        let err = client.publish("", b"hi", QoS::AtMostOnce, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_publish_qos0_bytes_and_completion() {
        let (mut client, events) = connected_client(Duration::from_secs(60));
        client.publish("a/b", b"hi", QoS::AtMostOnce, false).unwrap();
        // Nothing is stored for QoS 0 and the callback waits for the write.
        assert!(client.store.is_empty());
        assert!(events.borrow().is_empty());

        client.pump().unwrap();
        assert_eq!(
            client.mem().output(),
            [0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']
        );
        assert_eq!(events.borrow().as_slice(), [Event::Publish(1)]);
        assert_eq!(client.stats().publish_messages_sent, 1);
    }

    #[test]
    fn test_publish_qos1_stores_message() {
        let (mut client, _events) = connected_client(Duration::from_secs(60));
        let packet_id = client
            .publish("a/b", b"hi", QoS::AtLeastOnce, false)
            .unwrap();
        let msg = client.store.get(Direction::Outbound, packet_id).unwrap();
        assert_eq!(msg.state, DeliveryState::WaitPublishAck);
        assert_eq!(msg.topic, "a/b");
        assert_eq!(msg.payload, b"hi");
        assert!(!msg.dup);
    }

    #[test]
    fn test_keep_alive_sends_single_ping() {
        let (mut client, _events) = connected_client(Duration::from_secs(10));
        let start = Instant::now();
        client.session.reset_timestamps(start);

        // Just before the interval nothing happens.
        client.tick(start + Duration::from_secs(9)).unwrap();
        client.pump().unwrap();
        assert!(client.mem().output().is_empty());

        // At the interval exactly one ping request goes out; feed a ping
        // response back so the liveness check stays quiet.
        client.tick(start + Duration::from_secs(10)).unwrap();
        client.pump().unwrap();
        assert_eq!(client.mem().output(), [0xc0, 0x00]);
        client.mem().clear_output();
        client.mem().push_input(&[0xd0, 0x00]);
        client.pump().unwrap();

        // The ping refreshed the outgoing timestamp, so no second ping yet.
        client.tick(start + Duration::from_secs(11)).unwrap();
        client.pump().unwrap();
        assert!(client.mem().output().is_empty());
    }

    #[test]
    fn test_keep_alive_loss_disconnects() {
        let (mut client, _events) = connected_client(Duration::from_secs(10));
        let start = Instant::now();
        client.session.reset_timestamps(start);

        // Ping goes out at 10s but nothing ever comes back; at 15s the
        // 1.5 x keep-alive deadline fires.
        client.tick(start + Duration::from_secs(10)).unwrap();
        let err = client.tick(start + Duration::from_secs(15)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert_eq!(client.status(), ClientStatus::Disconnected);
    }

    #[test]
    fn test_retry_resends_with_dup() {
        let (mut client, _events) = connected_client(Duration::from_secs(60));
        let start = Instant::now();
        client.session.reset_timestamps(start);
        let packet_id = client
            .publish("a/b", b"hi", QoS::AtLeastOnce, false)
            .unwrap();
        client.pump().unwrap();
        client.mem().clear_output();

        // Before the retry interval nothing is resent.
        client.tick(start + Duration::from_secs(19)).unwrap();
        client.pump().unwrap();
        assert!(client.mem().output().is_empty());

        // After 20 s the same message goes out again with dup set.
        let retry_at = start + Duration::from_secs(21);
        client.tick(retry_at).unwrap();
        client.pump().unwrap();
        assert_eq!(
            client.mem().output(),
            [0x3a, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x01, b'h', b'i']
        );
        let msg = client.store.get(Direction::Outbound, packet_id).unwrap();
        assert!(msg.dup);
        // Timestamp was refreshed, so the next tick does not resend.
        client.mem().clear_output();
        client.tick(retry_at + Duration::from_secs(1)).unwrap();
        client.pump().unwrap();
        assert!(client.mem().output().is_empty());
    }

    #[test]
    fn test_retry_resends_publish_release() {
        let (mut client, _events) = connected_client(Duration::from_secs(60));
        let start = Instant::now();
        let packet_id = client
            .publish("a/b", b"hi", QoS::ExactOnce, false)
            .unwrap();
        client.pump().unwrap();
        // Server acknowledges with PublishReceived; client answers with
        // PublishRelease and waits for PublishComplete.
        client.mem().clear_output();
        client.mem().push_input(&[0x50, 0x02, 0x00, 0x01]);
        client.pump().unwrap();
        assert_eq!(client.mem().output(), [0x62, 0x02, 0x00, 0x01]);
        client.mem().clear_output();

        client.tick(start + Duration::from_secs(25)).unwrap();
        client.pump().unwrap();
        assert_eq!(client.mem().output(), [0x62, 0x02, 0x00, 0x01]);
        let msg = client.store.get(Direction::Outbound, packet_id).unwrap();
        assert_eq!(msg.state, DeliveryState::WaitPublishComplete);
    }

    #[test]
    fn test_packet_id_not_reused_while_in_flight() {
        let (mut client, _events) = connected_client(Duration::from_secs(60));
        let first = client
            .publish("a/b", b"hi", QoS::AtLeastOnce, false)
            .unwrap();
        // Exhaust the counter so it wraps around to the still in-flight id.
        for _ in 0..u16::MAX - 1 {
            let _packet_id = client.session.next_packet_id();
        }
        let second = client
            .publish("a/b", b"hi", QoS::AtLeastOnce, false)
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_disconnect_clears_store_with_clean_session() {
        let (mut client, _events) = connected_client(Duration::from_secs(60));
        client
            .publish("a/b", b"hi", QoS::AtLeastOnce, false)
            .unwrap();
        assert_eq!(client.store.len(), 1);
        client.disconnect().unwrap();
        assert_eq!(client.status(), ClientStatus::Disconnected);
        assert!(client.store.is_empty());
    }

    #[test]
    fn test_disconnect_preserves_store_without_clean_session() {
        let mut options = ConnectOptions::default();
        options
            .set_client_id("test-client")
            .set_clean_session(false);
        let mut client = Client::new(options).unwrap();
        client.stream = Some(Stream::Mem(MemStream::new()));
        client.status = ClientStatus::Connected;

        client
            .publish("a/b", b"hi", QoS::AtLeastOnce, false)
            .unwrap();
        client.disconnect().unwrap();
        assert_eq!(client.store.len(), 1);
    }

    #[test]
    fn test_disconnect_emits_packet() {
        let (mut client, _events) = connected_client(Duration::from_secs(60));
        client.disconnect().unwrap();
        assert_eq!(client.status(), ClientStatus::Disconnected);
    }
}
