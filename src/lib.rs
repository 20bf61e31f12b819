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

//! Postern is an embeddable SMTP server: a listener that speaks RFC 5321
//! with the usual extensions (EHLO, SIZE, 8BITMIME, PIPELINING, STARTTLS,
//! AUTH) and hands every received message to a [`MessageHandlerFactory`]
//! you supply. What happens to a message after the terminating dot is
//! entirely your code's business; Postern does no queueing, relaying, or
//! delivery of its own.
//!
//! ```no_run
//! use std::io::{self, Write};
//! use std::sync::Arc;
//!
//! use postern::{
//!     MailParameters, MessageHandler, MessageHandlerFactory, Reply,
//!     ServerOptions, Session, SmtpServer,
//! };
//!
//! struct Discard;
//!
//! impl MessageHandlerFactory for Discard {
//!     fn create(&self, _session: &Session) -> Box<dyn MessageHandler> {
//!         Box::new(DiscardHandler)
//!     }
//! }
//!
//! struct DiscardHandler;
//!
//! impl MessageHandler for DiscardHandler {
//!     fn mail_from(
//!         &mut self,
//!         _reverse_path: &str,
//!         _parameters: &MailParameters,
//!     ) -> Result<(), Reply> {
//!         Ok(())
//!     }
//!
//!     fn recipient(&mut self, _forward_path: &str) -> Result<(), Reply> {
//!         Ok(())
//!     }
//!
//!     fn data_sink(&mut self) -> io::Result<Box<dyn Write + Send>> {
//!         Ok(Box::new(io::sink()))
//!     }
//!
//!     fn message_complete(&mut self) -> Result<(), Reply> {
//!         Ok(())
//!     }
//!
//!     fn message_aborted(&mut self) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), postern::Error> {
//!     let options = ServerOptions {
//!         port: 2525,
//!         ..ServerOptions::default()
//!     };
//!     let mut server = SmtpServer::new(options, Arc::new(Discard));
//!     server.start().await?;
//!     // ... run until it is time to shut down ...
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

mod handler;
mod options;
mod server;
pub mod smtp;
pub mod support;

pub use handler::{
    AuthResult, AuthenticationHandler, AuthenticationHandlerFactory,
    MessageHandler, MessageHandlerFactory, SessionIdFactory,
    TimeBasedSessionIdFactory, TlsSocketWrapper,
};
pub use options::ServerOptions;
pub use server::SmtpServer;
pub use smtp::auth::{
    BasicAuthenticationFactory, CredentialsValidator, Mechanism,
};
pub use smtp::reply::Reply;
pub use smtp::session::Session;
pub use smtp::syntax::MailParameters;
pub use support::async_io::{BoxedSessionStream, SessionStream};
pub use support::error::Error;
pub use support::tls::RustlsTlsWrapper;
