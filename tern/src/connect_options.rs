// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use codec::utils::random_client_id;

/// Options used when connecting to a broker.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    address: SocketAddr,
    client_id: String,
    keep_alive: Duration,
    clean_session: bool,
    message_retry: Duration,
    connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 1883)),
            client_id: random_client_id(),
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            message_retry: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectOptions {
    /// Create connect options with broker `address` and default parameters.
    ///
    /// # Errors
    ///
    /// Returns error if `address` cannot be resolved.
    pub fn new<A: ToSocketAddrs>(address: A) -> io::Result<Self> {
        let mut addrs = address.to_socket_addrs()?;
        let address = addrs.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "No socket address found")
        })?;
        Ok(Self {
            address,
            ..Self::default()
        })
    }

    pub fn address(&self) -> &SocketAddr {
        &self.address
    }

    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_string();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Interval between two control packets. The broker disconnects the
    /// session if it stays silent for one and a half times this long.
    /// Zero disables the keep alive mechanism.
    pub fn set_keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Interval after which an unacknowledged QoS 1/2 message is resent.
    pub fn set_message_retry(&mut self, message_retry: Duration) -> &mut Self {
        self.message_retry = message_retry;
        self
    }

    pub fn message_retry(&self) -> Duration {
        self.message_retry
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) -> &mut Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}
