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

//! The collaborator interfaces the protocol core consumes.
//!
//! The server owns sockets and SMTP state; everything it does with a
//! received message, a credential, or a TLS handshake goes through the
//! traits here. All callbacks other than `TlsSocketWrapper::wrap` are
//! synchronous and are invoked from the connection's task; they may block,
//! which stalls only that one session.

use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::smtp::reply::Reply;
use crate::smtp::session::Session;
use crate::smtp::syntax::MailParameters;
use crate::support::async_io::BoxedSessionStream;

/// Creates one `MessageHandler` per mail transaction.
///
/// A fresh handler is obtained when MAIL FROM is accepted and released at
/// end-of-transaction (end of DATA, RSET, STARTTLS, QUIT, or connection
/// loss), so per-transaction state never crosses sessions.
pub trait MessageHandlerFactory: Send + Sync {
    fn create(&self, session: &Session) -> Box<dyn MessageHandler>;
}

/// Consumes one mail transaction.
///
/// Any callback may reject its envelope piece by returning a `Reply`; the
/// reply is sent verbatim. `Reply::rejected()` and
/// `Reply::transaction_failed()` are the conventional defaults.
pub trait MessageHandler: Send {
    /// The reverse-path from MAIL FROM. Empty for bounce messages (`<>`).
    fn mail_from(
        &mut self,
        reverse_path: &str,
        parameters: &MailParameters,
    ) -> Result<(), Reply>;

    /// One forward-path from RCPT TO. Called once per unique recipient.
    fn recipient(&mut self, forward_path: &str) -> Result<(), Reply>;

    /// Called when the DATA phase begins. The returned sink receives the
    /// message bytes (dot-unstuffing already applied, Received header
    /// already prepended when configured) as they arrive off the wire; the
    /// server buffers nothing beyond its read chunks.
    fn data_sink(&mut self) -> io::Result<Box<dyn Write + Send>>;

    /// The message terminator arrived and every byte reached the sink.
    /// `Ok` yields `250 2.6.0`; `Err` sends the given reply instead.
    fn message_complete(&mut self) -> Result<(), Reply>;

    /// The transaction died without completing: RSET, QUIT, STARTTLS, a
    /// failed sink, or a lost connection. No reply reaches the client on
    /// the connection-loss path.
    fn message_aborted(&mut self);
}

/// Outcome of one step of a SASL exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthResult {
    /// Send the (not yet base64-encoded) challenge and wait for the next
    /// client response.
    Challenge(String),
    /// Authentication succeeded as the carried identity.
    Success(String),
    /// Authentication failed; the client may try again.
    Failure,
}

/// Creates one `AuthenticationHandler` per AUTH command.
pub trait AuthenticationHandlerFactory: Send + Sync {
    /// The mechanisms to advertise after EHLO, in order.
    fn mechanisms(&self) -> Vec<String>;

    /// Starts a dialogue for `mechanism` (upper-cased), or `None` when the
    /// mechanism is not supported.
    fn create(&self, mechanism: &str) -> Option<Box<dyn AuthenticationHandler>>;
}

/// One SASL dialogue.
///
/// The server handles the base64 layer: `client_input` is already decoded,
/// and a `Challenge` result is encoded before it is sent. The first call
/// passes `None` when the client supplied no initial response.
pub trait AuthenticationHandler: Send {
    fn auth(&mut self, client_input: Option<&[u8]>) -> AuthResult;
}

/// Wraps an established cleartext stream into a TLS stream after STARTTLS.
///
/// An error (or a wrapper that never resolves within the connection
/// timeout) closes the connection without further replies.
pub trait TlsSocketWrapper: Send + Sync {
    fn wrap(
        &self,
        plain: BoxedSessionStream,
    ) -> Pin<
        Box<dyn Future<Output = io::Result<BoxedSessionStream>> + Send + '_>,
    >;
}

/// Allocates the opaque per-connection session ids.
pub trait SessionIdFactory: Send + Sync {
    fn next(&self) -> String;
}

/// Default id factory: the millisecond clock in base 36 plus a process-wide
/// counter, so ids sort roughly by connection time.
pub struct TimeBasedSessionIdFactory {
    counter: AtomicU64,
}

impl TimeBasedSessionIdFactory {
    pub fn new() -> Self {
        TimeBasedSessionIdFactory {
            counter: AtomicU64::new(0),
        }
    }
}

impl Default for TimeBasedSessionIdFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdFactory for TimeBasedSessionIdFactory {
    fn next(&self) -> String {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let serial = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", base36(millis), serial)
    }
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if 0 == n {
        return "0".to_owned();
    }

    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// The full collaborator set one server hands to its sessions.
#[derive(Clone)]
pub(crate) struct Hooks {
    pub(crate) message: Arc<dyn MessageHandlerFactory>,
    pub(crate) auth: Option<Arc<dyn AuthenticationHandlerFactory>>,
    pub(crate) tls: Option<Arc<dyn TlsSocketWrapper>>,
    pub(crate) ids: Arc<dyn SessionIdFactory>,
}
