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

use std::str;
use std::sync::Arc;

use log::{info, warn};

use super::auth::AuthProgress;
use super::codes::*;
use super::commands::{self, Exchange, Outcome};
use super::data;
use super::reply::Reply;
use super::session::Session;
use super::syntax;
use crate::handler::Hooks;
use crate::options::ServerOptions;
use crate::support::async_io::SessionIo;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;

/// How many consecutive commands may make no transaction progress before
/// the connection is dropped as a time-waster.
const MAX_INEFFECTIVE_COMMANDS: u32 = 30;

/// Drives one session from greeting to close.
pub(crate) struct Connection {
    io: SessionIo,
    options: Arc<ServerOptions>,
    hooks: Arc<Hooks>,
    session: Session,
    log_prefix: LogPrefix,
    ineffective_commands: u32,
}

impl Connection {
    pub(crate) fn new(
        io: SessionIo,
        options: Arc<ServerOptions>,
        hooks: Arc<Hooks>,
        session: Session,
        log_prefix: LogPrefix,
    ) -> Self {
        Connection {
            io,
            options,
            hooks,
            session,
            log_prefix,
            ineffective_commands: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let result = self.serve().await;

        // Whatever ended the session, a half-done transaction is aborted
        // exactly once, and dropping `io` closes the socket.
        self.session.abort_envelope();

        match result {
            Ok(()) => info!("{} Normal client disconnect", self.log_prefix),
            Err(Error::ConnectionClosed) => {
                info!("{} Client dropped the connection", self.log_prefix)
            },
            Err(e) => warn!(
                "{} Abnormal client disconnect: {}",
                self.log_prefix, e,
            ),
        }
    }

    async fn serve(&mut self) -> Result<(), Error> {
        self.send_reply(&Reply::greeting(
            &self.options.host_name,
            &self.options.software_name,
        ))
        .await?;

        let mut line = Vec::new();
        while !self.session.quit_sent() {
            match self.io.read_line(&mut line).await {
                Ok(()) => (),
                Err(Error::IdleTimeout) => {
                    info!("{} Connection idle timer expired", self.log_prefix);
                    let _ = self.send_reply(&Reply::timeout_closing()).await;
                    return Ok(());
                },
                Err(Error::LineTooLong) => {
                    self.send_reply(&Reply::line_too_long()).await?;
                    self.io.discard_line().await?;
                    continue;
                },
                Err(e) => return Err(e),
            }

            self.handle_line(&line).await?;
        }

        Ok(())
    }

    async fn handle_line(&mut self, line: &[u8]) -> Result<(), Error> {
        if line.contains(&0) {
            warn!(
                "{} Remote is speaking binary, closing connection",
                self.log_prefix,
            );
            self.session.set_quit();
            return Ok(());
        }

        let Ok(line) = str::from_utf8(line) else {
            warn!("{} Non-UTF-8 command received", self.log_prefix);
            return self
                .send_reply(&Reply::new(
                    rc::CommandSyntaxError,
                    Some((sc::PermFail, sd::OtherProtocolStatus)),
                    "Malformed UTF-8",
                ))
                .await;
        };

        self.ineffective_commands += 1;
        if self.ineffective_commands > MAX_INEFFECTIVE_COMMANDS {
            warn!(
                "{} Terminating connection after too many non-mail commands",
                self.log_prefix,
            );
            self.session.set_quit();
            return self
                .send_reply(&Reply::new(
                    rc::ServiceClosing,
                    None,
                    "Too many commands issued without sending mail",
                ))
                .await;
        }

        let (verb, args) = syntax::split_verb(line);
        let Some(spec) = commands::lookup(verb) else {
            let mut debug_line = line;
            if let Some((truncate_at, _)) = debug_line.char_indices().nth(64)
            {
                debug_line = &debug_line[..truncate_at];
            }
            warn!(
                "{} Received unknown command {:?}",
                self.log_prefix, debug_line,
            );
            return self.send_reply(&Reply::command_not_recognized()).await;
        };

        if let Err(refusal) = spec.allowed_in(&self.session, &self.options) {
            return self.send_reply(&refusal).await;
        }

        let outcome = {
            let mut exchange = Exchange {
                options: &self.options,
                hooks: &self.hooks,
                session: &mut self.session,
                log_prefix: &self.log_prefix,
            };
            spec.run(&mut exchange, args)
        };

        if let Outcome::Reply(ref reply) = outcome {
            if reply.is_positive()
                && (spec.verb.eq_ignore_ascii_case("MAIL")
                    || spec.verb.eq_ignore_ascii_case("RCPT"))
            {
                self.ineffective_commands = 0;
            }
        }

        match outcome {
            Outcome::Reply(reply) => self.send_reply(&reply).await,

            Outcome::Close(reply) => {
                self.session.set_quit();
                self.send_reply(&reply).await
            },

            Outcome::BeginData(reply) => {
                self.ineffective_commands = 0;
                self.send_reply(&reply).await?;
                if let Some(envelope) = self.session.envelope() {
                    info!(
                        "{} Begin data transfer, from=<{}>, {} recipient(s){}",
                        self.log_prefix,
                        envelope.return_path,
                        envelope.recipients.len(),
                        if envelope.parameters.body_8bit {
                            ", 8-bit body"
                        } else {
                            ""
                        },
                    );
                }

                match data::run_data_phase(
                    &mut self.io,
                    &self.options,
                    &mut self.session,
                    &self.log_prefix,
                )
                .await
                {
                    Ok(reply) => self.send_reply(&reply).await,
                    Err(Error::IdleTimeout) => {
                        info!(
                            "{} Idle timer expired during data transfer",
                            self.log_prefix,
                        );
                        let _ =
                            self.send_reply(&Reply::timeout_closing()).await;
                        self.session.set_quit();
                        Ok(())
                    },
                    Err(e) => Err(e),
                }
            },

            Outcome::StartTls(reply) => {
                let Some(wrapper) = self.hooks.tls.clone() else {
                    // cmd_starttls verified the wrapper exists.
                    return self
                        .send_reply(&Reply::new(
                            rc::TlsNotAvailable,
                            Some((sc::TempFail, sd::OtherSecurity)),
                            "TLS not available",
                        ))
                        .await;
                };

                self.send_reply(&reply).await?;
                info!("{} Start TLS handshake", self.log_prefix);

                self.io.upgrade_tls(wrapper.as_ref()).await?;
                self.session.reset_after_tls();

                info!("{} TLS handshake completed", self.log_prefix);
                Ok(())
            },

            Outcome::BeginAuth {
                mut dialogue,
                mut progress,
            } => {
                loop {
                    match progress {
                        AuthProgress::Challenge(reply) => {
                            self.send_reply(&reply).await?;

                            let mut line = Vec::new();
                            match self.io.read_line(&mut line).await {
                                Ok(()) => {
                                    progress = dialogue.advance(&line);
                                },
                                Err(Error::IdleTimeout) => {
                                    let _ = self
                                        .send_reply(
                                            &Reply::timeout_closing(),
                                        )
                                        .await;
                                    self.session.set_quit();
                                    return Ok(());
                                },
                                Err(Error::LineTooLong) => {
                                    self.io.discard_line().await?;
                                    return self
                                        .send_reply(&Reply::syntax_error(
                                            "Authentication exchange line \
                                             too long",
                                        ))
                                        .await;
                                },
                                Err(e) => return Err(e),
                            }
                        },

                        AuthProgress::Done { reply, identity } => {
                            if let Some(identity) = identity {
                                info!(
                                    "{} Authenticated as {}",
                                    self.log_prefix, identity,
                                );
                                self.log_prefix.set_user(identity.clone());
                                self.session.set_authenticated(identity);
                            }
                            return self.send_reply(&reply).await;
                        },
                    }
                }
            },
        }
    }

    async fn send_reply(&mut self, reply: &Reply) -> Result<(), Error> {
        self.io.buffer_raw(reply.wire_format().as_bytes());
        self.io.flush().await
    }
}
