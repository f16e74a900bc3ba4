// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Publish a single message and wait for its delivery to complete.

use clap::Parser;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use codec::{PacketId, QoS};
use tern::{Client, ClientStatus, ConnectOptions, Error, ErrorKind, EventHandler};

#[derive(Debug, Parser)]
#[command(name = "tern-pub", about = "Publish a message to an MQTT 3.1 broker")]
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

    /// Topic to publish on.
    #[arg(short = 't', long)]
    topic: String,

    /// Message payload.
    #[arg(short = 'm', long)]
    message: String,

    /// Quality of service, 0, 1 or 2.
    #[arg(short = 'q', long, default_value_t = 0)]
    qos: u8,

    /// Ask the broker to retain the message.
    #[arg(short = 'r', long)]
    retain: bool,

    /// Keep alive interval in seconds.
    #[arg(short = 'k', long, default_value_t = 60)]
    keep_alive: u64,
}

#[derive(Debug, Default)]
struct Published {
    packet_ids: Vec<PacketId>,
}

#[derive(Debug, Default)]
struct PubHandler {
    published: Rc<RefCell<Published>>,
}

impl EventHandler for PubHandler {
    fn on_publish(&mut self, packet_id: PacketId) {
        self.published.borrow_mut().packet_ids.push(packet_id);
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
    let published = Rc::new(RefCell::new(Published::default()));
    client.set_handler(Box::new(PubHandler {
        published: Rc::clone(&published),
    }));

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

    let packet_id = client.publish(&args.topic, args.message.as_bytes(), qos, args.retain)?;
    while !published.borrow().packet_ids.contains(&packet_id) {
        client.loop_once(Some(Duration::from_millis(100)))?;
    }

    client.disconnect()
}
