// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::{Duration, Instant};

use codec::{PacketId, PubTopic, QoS};

use crate::error::Error;

/// Message published by the broker on behalf of the client when the
/// connection closes without a Disconnect packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Will {
    pub topic: PubTopic,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Per-connection identity and timer state.
#[derive(Debug)]
pub struct Session {
    client_id: String,
    keep_alive: Duration,
    clean_session: bool,
    message_retry: Duration,
    will: Option<Will>,

    /// When the last complete packet was read from the peer.
    last_incoming: Instant,

    /// When the last packet was handed to or finished by the writer.
    last_outgoing: Instant,

    next_packet_id: PacketId,
}

impl Session {
    pub fn new(client_id: &str, keep_alive: Duration, clean_session: bool) -> Self {
        let now = Instant::now();
        Self {
            client_id: client_id.to_string(),
            keep_alive,
            clean_session,
            message_retry: Duration::from_secs(20),
            will: None,
            last_incoming: now,
            last_outgoing: now,
            next_packet_id: PacketId::new(1),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn message_retry(&self) -> Duration {
        self.message_retry
    }

    pub fn set_message_retry(&mut self, message_retry: Duration) {
        self.message_retry = message_retry;
    }

    /// Replace the current will, if any.
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
        let topic = PubTopic::new(topic)?;
        self.will = Some(Will {
            topic,
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    pub fn clear_will(&mut self) {
        self.will = None;
    }

    pub fn will(&self) -> Option<&Will> {
        self.will.as_ref()
    }

    /// Allocate the next packet id, wrapping at `u16::MAX` and never
    /// producing zero.
    pub fn next_packet_id(&mut self) -> PacketId {
        let packet_id = self.next_packet_id;
        if packet_id.value() == u16::MAX {
            self.next_packet_id = PacketId::new(1);
        } else {
            self.next_packet_id = PacketId::new(packet_id.value() + 1);
        }
        packet_id
    }

    /// Reset both activity timestamps, normally right after the transport
    /// is (re)established.
    pub fn reset_timestamps(&mut self, now: Instant) {
        self.last_incoming = now;
        self.last_outgoing = now;
    }

    pub fn record_incoming(&mut self, now: Instant) {
        if now > self.last_incoming {
            self.last_incoming = now;
        }
    }

    pub fn record_outgoing(&mut self, now: Instant) {
        if now > self.last_outgoing {
            self.last_outgoing = now;
        }
    }

    /// Returns true if a PingRequest packet is due: nothing has been sent
    /// for a whole keep alive interval.
    pub fn ping_due(&self, now: Instant) -> bool {
        !self.keep_alive.is_zero() && now.duration_since(self.last_outgoing) >= self.keep_alive
    }

    /// Returns true if the peer missed the liveness deadline: no bytes of
    /// any kind within one and a half times the keep alive interval
    /// [MQTT-3.1.2-24].
    pub fn peer_lost(&self, now: Instant) -> bool {
        if self.keep_alive.is_zero() {
            return false;
        }
        let deadline = self.keep_alive + self.keep_alive / 2;
        now.duration_since(self.last_incoming) >= deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_packet_id_skips_zero() {
        let mut session = Session::new("id", Duration::from_secs(60), true);
        assert_eq!(session.next_packet_id(), PacketId::new(1));
        assert_eq!(session.next_packet_id(), PacketId::new(2));

        let mut session = Session::new("id", Duration::from_secs(60), true);
        for _ in 0..u16::MAX {
            let packet_id = session.next_packet_id();
            assert_ne!(packet_id.value(), 0);
        }
        // Counter has walked every value in [1, 65535]; the next one wraps
        // back to 1.
        assert_eq!(session.next_packet_id(), PacketId::new(1));
    }

    #[test]
    fn test_ping_due() {
        let mut session = Session::new("id", Duration::from_secs(10), true);
        let start = Instant::now();
        session.reset_timestamps(start);
        assert!(!session.ping_due(start + Duration::from_secs(9)));
        assert!(session.ping_due(start + Duration::from_secs(10)));
    }

    #[test]
    fn test_peer_lost() {
        let mut session = Session::new("id", Duration::from_secs(10), true);
        let start = Instant::now();
        session.reset_timestamps(start);
        assert!(!session.peer_lost(start + Duration::from_secs(14)));
        assert!(session.peer_lost(start + Duration::from_secs(15)));
    }

    #[test]
    fn test_keep_alive_zero_disables_timers() {
        let mut session = Session::new("id", Duration::ZERO, true);
        let start = Instant::now();
        session.reset_timestamps(start);
        let much_later = start + Duration::from_secs(3600);
        assert!(!session.ping_due(much_later));
        assert!(!session.peer_lost(much_later));
    }
}
