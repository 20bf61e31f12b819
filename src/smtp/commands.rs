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

//! The command registry and one handler per verb.
//!
//! Handlers are synchronous: they inspect and mutate the session and ask
//! the connection loop for any I/O effect (data phase, TLS upgrade, AUTH
//! dialogue) through their `Outcome`. That keeps the protocol state machine
//! testable without a socket in sight.

use log::info;

use super::auth::{AuthDialogue, AuthProgress};
use super::codes::*;
use super::reply::Reply;
use super::session::{Envelope, Session};
use super::syntax::{self, PathError};
use crate::handler::Hooks;
use crate::options::ServerOptions;
use crate::support::log_prefix::LogPrefix;

/// Everything a command handler may touch.
pub(crate) struct Exchange<'a> {
    pub(crate) options: &'a ServerOptions,
    pub(crate) hooks: &'a Hooks,
    pub(crate) session: &'a mut Session,
    pub(crate) log_prefix: &'a LogPrefix,
}

/// What a handler asks the connection loop to do.
pub(crate) enum Outcome {
    Reply(Reply),
    /// Send the 354 and run the DATA phase.
    BeginData(Reply),
    /// Run (or finish) an AUTH dialogue.
    BeginAuth {
        dialogue: AuthDialogue,
        progress: AuthProgress,
    },
    /// Send the 220 and hand the transport to the TLS wrapper.
    StartTls(Reply),
    /// Send the reply and close the connection.
    Close(Reply),
}

type HandlerFn = fn(&mut Exchange<'_>, &str) -> Outcome;

/// One registered verb.
///
/// The `pre_*` flags gate availability: before HELO/EHLO, without TLS under
/// `require_tls`, and without authentication under `require_auth`.
pub(crate) struct CommandSpec {
    pub(crate) verb: &'static str,
    pub(crate) pre_helo: bool,
    pub(crate) pre_tls: bool,
    pub(crate) pre_auth: bool,
    handler: HandlerFn,
}

static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        verb: "HELO",
        pre_helo: true,
        pre_tls: true,
        pre_auth: true,
        handler: cmd_helo,
    },
    CommandSpec {
        verb: "EHLO",
        pre_helo: true,
        pre_tls: true,
        pre_auth: true,
        handler: cmd_ehlo,
    },
    CommandSpec {
        verb: "MAIL",
        pre_helo: false,
        pre_tls: false,
        pre_auth: false,
        handler: cmd_mail,
    },
    CommandSpec {
        verb: "RCPT",
        pre_helo: false,
        pre_tls: false,
        pre_auth: false,
        handler: cmd_rcpt,
    },
    CommandSpec {
        verb: "DATA",
        pre_helo: false,
        pre_tls: false,
        pre_auth: false,
        handler: cmd_data,
    },
    CommandSpec {
        verb: "RSET",
        pre_helo: true,
        pre_tls: true,
        pre_auth: true,
        handler: cmd_rset,
    },
    CommandSpec {
        verb: "NOOP",
        pre_helo: true,
        pre_tls: true,
        pre_auth: true,
        handler: cmd_noop,
    },
    CommandSpec {
        verb: "QUIT",
        pre_helo: true,
        pre_tls: true,
        pre_auth: true,
        handler: cmd_quit,
    },
    CommandSpec {
        verb: "STARTTLS",
        pre_helo: false,
        pre_tls: true,
        pre_auth: true,
        handler: cmd_starttls,
    },
    CommandSpec {
        verb: "AUTH",
        pre_helo: false,
        pre_tls: false,
        pre_auth: true,
        handler: cmd_auth,
    },
    CommandSpec {
        verb: "VRFY",
        pre_helo: false,
        pre_tls: false,
        pre_auth: false,
        handler: cmd_vrfy,
    },
    CommandSpec {
        verb: "EXPN",
        pre_helo: false,
        pre_tls: false,
        pre_auth: false,
        handler: cmd_expn,
    },
    CommandSpec {
        verb: "HELP",
        pre_helo: true,
        pre_tls: false,
        pre_auth: false,
        handler: cmd_help,
    },
];

pub(crate) fn lookup(verb: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.verb.eq_ignore_ascii_case(verb))
}

impl CommandSpec {
    /// The availability gate applied before dispatch. `Err` is the refusal
    /// to send back.
    pub(crate) fn allowed_in(
        &self,
        session: &Session,
        options: &ServerOptions,
    ) -> Result<(), Reply> {
        if !self.pre_helo && session.helo_host().is_none() {
            return Err(Reply::bad_sequence("Error: send HELO/EHLO first"));
        }

        if !self.pre_tls
            && options.enable_tls
            && options.require_tls
            && !session.is_tls()
        {
            return Err(Reply::tls_required());
        }

        if !self.pre_auth
            && options.require_auth
            && session.authenticated().is_none()
        {
            return Err(Reply::auth_required());
        }

        Ok(())
    }

    pub(crate) fn run(
        &self,
        exchange: &mut Exchange<'_>,
        args: &str,
    ) -> Outcome {
        (self.handler)(exchange, args)
    }
}

fn cmd_helo(exchange: &mut Exchange<'_>, args: &str) -> Outcome {
    let host = args.trim();
    if host.is_empty() {
        return Outcome::Reply(Reply::syntax_error(
            "HELO requires a domain argument",
        ));
    }

    exchange.session.set_helo(host.to_owned(), false);
    exchange.log_prefix.set_helo(host.to_owned());
    info!("{} HELO", exchange.log_prefix);

    Outcome::Reply(Reply::new(
        rc::Ok,
        None,
        exchange.options.host_name.clone(),
    ))
}

fn cmd_ehlo(exchange: &mut Exchange<'_>, args: &str) -> Outcome {
    let host = args.trim();
    if host.is_empty() {
        return Outcome::Reply(Reply::syntax_error(
            "EHLO requires a domain argument",
        ));
    }

    exchange.session.set_helo(host.to_owned(), true);
    exchange.log_prefix.set_helo(host.to_owned());
    info!("{} EHLO", exchange.log_prefix);

    let options = exchange.options;
    let mut reply = Reply::new(rc::Ok, None, options.host_name.clone());

    reply = reply.and_line("8BITMIME");
    reply = reply.and_line(if options.max_message_size > 0 {
        format!("SIZE {}", options.max_message_size)
    } else {
        "SIZE".to_owned()
    });

    // RFC 3207 forbids advertising STARTTLS once TLS is up.
    if options.enable_tls
        && !options.hide_tls
        && !exchange.session.is_tls()
    {
        reply = reply.and_line("STARTTLS");
    }

    if let Some(ref auth) = exchange.hooks.auth {
        let mechanisms = auth.mechanisms();
        if !mechanisms.is_empty() {
            reply = reply.and_line(format!("AUTH {}", mechanisms.join(" ")));
        }
    }

    reply = reply
        .and_line("PIPELINING")
        .and_line("ENHANCEDSTATUSCODES")
        .and_line("OK");

    Outcome::Reply(reply)
}

fn cmd_mail(exchange: &mut Exchange<'_>, args: &str) -> Outcome {
    if exchange.session.envelope().is_some() {
        return Outcome::Reply(Reply::bad_sequence(
            "Sender already specified",
        ));
    }

    let (path, parameters) = match syntax::parse_reverse_path(args) {
        Ok(parsed) => parsed,
        Err(PathError::Syntax) => {
            return Outcome::Reply(Reply::syntax_error(
                "Syntax error in parameters",
            ));
        },
        Err(PathError::UnknownParameter(parameter)) => {
            return Outcome::Reply(Reply::parameter_not_implemented(
                format!("Parameter {} not implemented", parameter),
            ));
        },
    };

    if exchange.options.max_message_size > 0
        && parameters.declared_size.unwrap_or(0)
            > exchange.options.max_message_size
    {
        return Outcome::Reply(Reply::size_exceeded());
    }

    let mut handler = exchange.hooks.message.create(exchange.session);
    if let Err(reply) = handler.mail_from(&path, &parameters) {
        info!(
            "{} MAIL FROM:<{}> refused by handler with {}",
            exchange.log_prefix,
            path,
            reply.code(),
        );
        return Outcome::Reply(reply);
    }

    info!(
        "{} Start mail transaction, from=<{}>",
        exchange.log_prefix, path,
    );
    exchange
        .session
        .set_envelope(Envelope::new(path, parameters, handler));
    Outcome::Reply(Reply::ok_mail())
}

fn cmd_rcpt(exchange: &mut Exchange<'_>, args: &str) -> Outcome {
    let max_recipients = exchange.options.max_recipients;
    let Some(envelope) = exchange.session.envelope_mut() else {
        return Outcome::Reply(Reply::bad_sequence(
            "Error: need MAIL command",
        ));
    };

    if envelope.recipients.len() >= max_recipients {
        return Outcome::Reply(Reply::too_many_recipients());
    }

    let path = match syntax::parse_forward_path(args) {
        Ok(path) => path,
        Err(PathError::Syntax) => {
            return Outcome::Reply(Reply::syntax_error(
                "Syntax error in parameters",
            ));
        },
        Err(PathError::UnknownParameter(parameter)) => {
            return Outcome::Reply(Reply::parameter_not_implemented(
                format!("Parameter {} not implemented", parameter),
            ));
        },
    };

    // The recipient list is deduplicated by exact string; a repeat is
    // acknowledged without consulting the handler again.
    if envelope.recipients.iter().any(|r| *r == path) {
        return Outcome::Reply(Reply::ok_recipient());
    }

    match envelope.handler.recipient(&path) {
        Ok(()) => {
            envelope.recipients.push(path);
            Outcome::Reply(Reply::ok_recipient())
        },
        Err(reply) => {
            info!(
                "{} RCPT TO:<{}> refused by handler with {}",
                exchange.log_prefix,
                path,
                reply.code(),
            );
            Outcome::Reply(reply)
        },
    }
}

fn cmd_data(exchange: &mut Exchange<'_>, args: &str) -> Outcome {
    if !args.trim().is_empty() {
        return Outcome::Reply(Reply::syntax_error(
            "DATA does not take parameters",
        ));
    }

    match exchange.session.envelope() {
        None => Outcome::Reply(Reply::bad_sequence(
            "Error: need MAIL command",
        )),
        Some(envelope) if envelope.recipients.is_empty() => Outcome::Reply(
            Reply::bad_sequence("Error: need RCPT (recipient)"),
        ),
        Some(_) => Outcome::BeginData(Reply::start_mail_input()),
    }
}

fn cmd_rset(exchange: &mut Exchange<'_>, args: &str) -> Outcome {
    if !args.trim().is_empty() {
        return Outcome::Reply(Reply::syntax_error(
            "RSET does not take parameters",
        ));
    }

    exchange.session.abort_envelope();
    Outcome::Reply(Reply::ok())
}

fn cmd_noop(_exchange: &mut Exchange<'_>, _args: &str) -> Outcome {
    Outcome::Reply(Reply::ok())
}

fn cmd_quit(exchange: &mut Exchange<'_>, _args: &str) -> Outcome {
    Outcome::Close(Reply::closing(&exchange.options.host_name))
}

fn cmd_starttls(exchange: &mut Exchange<'_>, args: &str) -> Outcome {
    if !exchange.options.enable_tls || exchange.hooks.tls.is_none() {
        return Outcome::Reply(Reply::new(
            rc::TlsNotAvailable,
            Some((sc::TempFail, sd::OtherSecurity)),
            "TLS not available",
        ));
    }

    if exchange.session.is_tls() {
        return Outcome::Reply(Reply::bad_sequence("TLS already active"));
    }

    if !args.trim().is_empty() {
        return Outcome::Reply(Reply::bad_sequence(
            "No parameters allowed for STARTTLS",
        ));
    }

    Outcome::StartTls(Reply::new(
        rc::ServiceReady,
        None,
        "Ready to start TLS",
    ))
}

fn cmd_auth(exchange: &mut Exchange<'_>, args: &str) -> Outcome {
    let Some(ref factory) = exchange.hooks.auth else {
        return Outcome::Reply(Reply::new(
            rc::AuthenticationRequired,
            Some((sc::PermFail, sd::OtherSecurity)),
            "Authentication not available",
        ));
    };

    if exchange.session.authenticated().is_some() {
        return Outcome::Reply(Reply::bad_sequence("Already authenticated"));
    }

    if exchange.session.envelope().is_some() {
        return Outcome::Reply(Reply::bad_sequence(
            "AUTH not permitted during a mail transaction",
        ));
    }

    let (mechanism, initial) = syntax::split_verb(args.trim());
    if mechanism.is_empty() {
        return Outcome::Reply(Reply::syntax_error(
            "Missing authentication mechanism",
        ));
    }

    let Some(handler) = factory.create(&mechanism.to_ascii_uppercase())
    else {
        info!(
            "{} Refused AUTH with unsupported mechanism {:?}",
            exchange.log_prefix, mechanism,
        );
        return Outcome::Reply(Reply::parameter_not_implemented(
            "Unrecognized authentication type",
        ));
    };

    let initial = match initial {
        "" => None,
        initial => Some(initial),
    };
    let (dialogue, progress) = AuthDialogue::begin(handler, initial);
    Outcome::BeginAuth { dialogue, progress }
}

fn cmd_vrfy(_exchange: &mut Exchange<'_>, _args: &str) -> Outcome {
    Outcome::Reply(Reply::new(
        rc::CannotVerify,
        None,
        "Cannot VRFY user, but will accept message and attempt delivery",
    ))
}

fn cmd_expn(_exchange: &mut Exchange<'_>, _args: &str) -> Outcome {
    Outcome::Reply(Reply::not_implemented("EXPN is not supported"))
}

fn cmd_help(_exchange: &mut Exchange<'_>, _args: &str) -> Outcome {
    Outcome::Reply(
        Reply::new(
            rc::HelpMessage,
            Some((sc::Success, sd::Undefined)),
            "Supported commands:",
        )
        .and_line("HELO EHLO MAIL RCPT DATA RSET")
        .and_line("NOOP QUIT STARTTLS AUTH VRFY EXPN HELP")
        .and_line("End of HELP"),
    )
}
