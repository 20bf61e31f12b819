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

use std::net::SocketAddr;

use super::syntax::MailParameters;
use crate::handler::MessageHandler;

/// Per-connection state, alive from accept to close.
///
/// Message handler factories receive a shared reference to the session at
/// MAIL time and may read any of the public accessors.
pub struct Session {
    id: String,
    peer_addr: SocketAddr,
    peer_host: Option<String>,
    helo_host: Option<String>,
    extended: bool,
    tls_active: bool,
    authenticated: Option<String>,
    envelope: Option<Envelope>,
    quit_sent: bool,
}

impl Session {
    pub(crate) fn new(id: String, peer_addr: SocketAddr) -> Self {
        Session {
            id,
            peer_addr,
            peer_host: None,
            helo_host: None,
            extended: false,
            tls_active: false,
            authenticated: None,
            envelope: None,
            quit_sent: false,
        }
    }

    /// The opaque session id allocated by the `SessionIdFactory`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The peer's canonical host name, when known.
    pub fn peer_host(&self) -> Option<&str> {
        self.peer_host.as_deref()
    }

    /// The argument of the last HELO/EHLO, if any.
    pub fn helo_host(&self) -> Option<&str> {
        self.helo_host.as_deref()
    }

    /// Whether the client greeted with EHLO rather than HELO.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn is_tls(&self) -> bool {
        self.tls_active
    }

    /// The identity established by a successful AUTH, if any.
    pub fn authenticated(&self) -> Option<&str> {
        self.authenticated.as_deref()
    }

    pub(crate) fn set_helo(&mut self, host: String, extended: bool) {
        self.helo_host = Some(host);
        self.extended = extended;
    }

    pub(crate) fn set_authenticated(&mut self, identity: String) {
        self.authenticated = Some(identity);
    }

    pub(crate) fn set_quit(&mut self) {
        self.quit_sent = true;
    }

    pub(crate) fn quit_sent(&self) -> bool {
        self.quit_sent
    }

    pub(crate) fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    pub(crate) fn envelope_mut(&mut self) -> Option<&mut Envelope> {
        self.envelope.as_mut()
    }

    pub(crate) fn set_envelope(&mut self, envelope: Envelope) {
        debug_assert!(self.envelope.is_none());
        self.envelope = Some(envelope);
    }

    pub(crate) fn take_envelope(&mut self) -> Option<Envelope> {
        self.envelope.take()
    }

    /// Drops any open transaction through the handler's abort path.
    pub(crate) fn abort_envelope(&mut self) {
        if let Some(envelope) = self.envelope.take() {
            let mut handler = envelope.handler;
            handler.message_aborted();
        }
    }

    /// State reset required by RFC 3207 after a successful TLS handshake:
    /// the client must greet again, and prior authentication and any open
    /// transaction are void.
    pub(crate) fn reset_after_tls(&mut self) {
        self.abort_envelope();
        self.helo_host = None;
        self.extended = false;
        self.authenticated = None;
        self.tls_active = true;
    }
}

/// The mail transaction accumulated between MAIL and end-of-DATA.
///
/// The envelope owns the live message handler, so an envelope existing and
/// a handler existing are the same condition.
pub(crate) struct Envelope {
    pub(crate) return_path: String,
    pub(crate) parameters: MailParameters,
    pub(crate) recipients: Vec<String>,
    pub(crate) handler: Box<dyn MessageHandler>,
}

impl Envelope {
    pub(crate) fn new(
        return_path: String,
        parameters: MailParameters,
        handler: Box<dyn MessageHandler>,
    ) -> Self {
        Envelope {
            return_path,
            parameters,
            recipients: Vec::new(),
            handler,
        }
    }
}
