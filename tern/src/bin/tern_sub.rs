// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Subscribe to a topic filter and print arriving messages.

use clap::Parser;
use std::time::Duration;

use codec::{PacketId, QoS, SubscribeAck};
use tern::{Client, ClientStatus, ConnectOptions, Error, ErrorKind, EventHandler, PublishMessage};

#[derive(Debug, Parser)]
#[command(name = "tern-sub", about = "Subscribe to an MQTT 3.1 topic filter")]
struct Args {
    /// Broker host.
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Broker port.
    #[arg(short = 'p', long, default_value_t = 1883)]
    port: u16,

    /// Client id; a random one is generated when omitted.
    #[arg(short = 'i', long)]
    id: Option<String>,

    /// Topic filter to subscribe to.
    #[arg(short = 't', long)]
    topic: String,

    /// Maximum quality of service, 0, 1 or 2.
    #[arg(short = 'q', long, default_value_t = 0)]
    qos: u8,

    /// Keep alive interval in seconds.
    #[arg(short = 'k', long, default_value_t = 60)]
    keep_alive: u64,
}

#[derive(Debug, Default)]
struct SubHandler {}

impl EventHandler for SubHandler {
    fn on_subscribe(&mut self, packet_id: PacketId, acknowledgements: &[SubscribeAck]) {
        log::info!("Subscription {packet_id} confirmed: {acknowledgements:?}");
    }

    fn on_message(&mut self, message: PublishMessage) {
        println!(
            "{} {}",
            message.topic,
            String::from_utf8_lossy(&message.payload)
        );
    }
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();

    let qos = QoS::try_from(args.qos)
        .map_err(|_err| Error::new(ErrorKind::InvalidParameter, "qos must be 0, 1 or 2"))?;

    let mut options = ConnectOptions::new((args.host.as_str(), args.port))?;
    if let Some(id) = &args.id {
        options.set_client_id(id);
    }
    options.set_keep_alive(Duration::from_secs(args.keep_alive));

    let mut client = Client::new(options)?;
    client.set_handler(Box::new(SubHandler::default()));

    client.connect()?;
    while client.status() == ClientStatus::Connecting {
        client.loop_once(Some(Duration::from_millis(100)))?;
    }
    if client.status() != ClientStatus::Connected {
        return Err(Error::new(
            ErrorKind::TransportError,
            "Connection refused by broker",
        ));
    }

    client.subscribe(&args.topic, qos)?;
    loop {
        client.loop_once(None)?;
    }
}
