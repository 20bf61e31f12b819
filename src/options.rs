//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Postern.
//
// Postern is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3  of the License, or (at your option)
// any later version.
//
// Postern is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Postern. If not, see <http://www.gnu.org/licenses/>.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The server configuration: a flat record, immutable once the server has
/// started.
///
/// Every field has a usable default, so construction is typically
/// `ServerOptions { port: 2525, ..ServerOptions::default() }`. The derives
/// let embedders deserialize the record from their own configuration files;
/// the library itself never reads one.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerOptions {
    /// The identity announced in the greeting, EHLO response, and Received
    /// headers. Defaults to the machine hostname, falling back to
    /// `localhost`.
    pub host_name: String,
    /// Local address to bind. `None` binds the wildcard address.
    pub bind_address: Option<IpAddr>,
    /// Port to listen on. 0 lets the system pick one; see
    /// `SmtpServer::allocated_port`.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// The software identity in the greeting banner.
    pub software_name: String,
    /// Whether STARTTLS is available. Requires a `TlsSocketWrapper`.
    pub enable_tls: bool,
    /// Do not advertise STARTTLS in the EHLO response even though it is
    /// enabled. Ignored when `enable_tls` is false.
    pub hide_tls: bool,
    /// Refuse mail commands until the session has been upgraded to TLS.
    /// Ignored when `enable_tls` is false.
    pub require_tls: bool,
    /// Refuse mail commands until AUTH has succeeded. Requires an
    /// `AuthenticationHandlerFactory`.
    pub require_auth: bool,
    /// Prepend a Received header to each delivered message.
    pub insert_received_headers: bool,
    /// Hard limit on concurrent connections; excess connections are
    /// greeted with 421 and closed.
    pub max_connections: usize,
    /// Idle limit for each read from the peer.
    pub connection_timeout: Duration,
    /// Maximum recipients accepted per transaction.
    pub max_recipients: usize,
    /// Maximum message size advertised via the SIZE extension and enforced
    /// against `SIZE=` declarations at MAIL time. 0 advertises SIZE with no
    /// fixed limit. The size of the data actually read is not checked.
    pub max_message_size: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            host_name: default_host_name(),
            bind_address: None,
            port: 25,
            backlog: 50,
            software_name: format!(
                "{} {}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
            ),
            enable_tls: false,
            hide_tls: false,
            require_tls: false,
            require_auth: false,
            insert_received_headers: true,
            max_connections: 1000,
            connection_timeout: Duration::from_secs(60),
            max_recipients: 1000,
            max_message_size: 0,
        }
    }
}

fn default_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}
