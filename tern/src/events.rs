// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{ConnectReturnCode, PacketId, SubscribeAck};

use crate::publish::PublishMessage;

/// Application-visible events of a client session.
///
/// The embedder implements the methods it cares about; every method has an
/// empty default. Callbacks run synchronously on the thread driving
/// [`Client::loop_once`](crate::Client::loop_once), so they must not block.
/// Handlers receive event data only, never a reference to the session, and
/// the handler must live at least as long as the session.
pub trait EventHandler {
    /// Connect request finished; `return_code` is the server's verdict.
    fn on_connect(&mut self, return_code: ConnectReturnCode) {
        let _ = return_code;
    }

    /// An outbound publish completed: the packet was written for QoS 0,
    /// acknowledged for QoS 1, or fully released for QoS 2.
    fn on_publish(&mut self, packet_id: PacketId) {
        let _ = packet_id;
    }

    /// An application message arrived. Ownership of `message` transfers to
    /// the handler.
    fn on_message(&mut self, message: PublishMessage) {
        let _ = message;
    }

    /// Subscribe request was acknowledged with the granted QoS per topic.
    fn on_subscribe(&mut self, packet_id: PacketId, acknowledgements: &[SubscribeAck]) {
        let _ = packet_id;
        let _ = acknowledgements;
    }

    /// Unsubscribe request was acknowledged.
    fn on_unsubscribe(&mut self, packet_id: PacketId) {
        let _ = packet_id;
    }
}
