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

//! The DATA phase: dot-unstuffing, terminator detection, Received header
//! injection, and the hand-off to the message handler's sink.

use std::io::{self, Write};

use chrono::Utc;
use log::{info, warn};

use super::reply::Reply;
use super::session::Session;
use crate::options::ServerOptions;
use crate::support::async_io::SessionIo;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;

/// Runs the DATA phase after the 354 has been sent, through to the reply
/// that answers the terminator.
///
/// The envelope is consumed either way. Errors mean the connection itself
/// failed; the caller's cleanup aborts the (still pending) envelope and no
/// reply is sent, per RFC 5321's rules for a transfer cut short.
pub(crate) async fn run_data_phase(
    io: &mut SessionIo,
    options: &ServerOptions,
    session: &mut Session,
    log_prefix: &LogPrefix,
) -> Result<Reply, Error> {
    let header = if options.insert_received_headers {
        Some(received_header(options, session))
    } else {
        None
    };

    let mut sink_error = None::<io::Error>;
    let mut sink: Box<dyn Write + Send> = match session.envelope_mut() {
        Some(envelope) => match envelope.handler.data_sink() {
            Ok(sink) => sink,
            Err(e) => {
                // The client is already committed to sending the payload;
                // consume it and fail the transaction at the end.
                sink_error = Some(e);
                Box::new(io::sink())
            },
        },
        None => {
            return Ok(Reply::bad_sequence("Error: need MAIL command"));
        },
    };

    if let Some(header) = header {
        write_sink(&mut *sink, &mut sink_error, header.as_bytes());
    }

    let copied = receive_data(io, &mut *sink, &mut sink_error).await;
    drop(sink);
    copied?;

    let Some(envelope) = session.take_envelope() else {
        return Ok(Reply::bad_sequence("Error: need MAIL command"));
    };
    let mut handler = envelope.handler;

    match sink_error {
        Some(e) => {
            warn!("{} Message sink failed: {}", log_prefix, e);
            handler.message_aborted();
            Ok(Reply::transaction_failed())
        },
        None => match handler.message_complete() {
            Ok(()) => {
                info!("{} Message accepted", log_prefix);
                Ok(Reply::message_accepted())
            },
            Err(reply) => {
                info!(
                    "{} Message refused by handler with {}",
                    log_prefix,
                    reply.code(),
                );
                Ok(reply)
            },
        },
    }
}

/// Copies the payload into `sink` until the terminating
/// `<CRLF>.<CRLF>` line, stripping dot stuffing.
///
/// Bare-LF line endings are tolerated throughout: any LF starts a new line
/// for stuffing purposes and `.\n` also terminates the message. Apart from
/// the stuffing, bytes reach the sink exactly as sent.
///
/// A sink failure flips the copy into discard mode via `sink_error`; the
/// wire is still consumed through the terminator so the connection stays
/// usable.
async fn receive_data(
    io: &mut SessionIo,
    sink: &mut (dyn Write + Send),
    sink_error: &mut Option<io::Error>,
) -> Result<(), Error> {
    // Whether the next chunk begins at the start of a line, i.e. at the
    // beginning of the payload and after each LF.
    let mut start_of_line = true;

    loop {
        let mut pending = Pending::None;
        let consumed = {
            let chunk = io.data_chunk().await?;

            if start_of_line && (b".\r\n" == chunk || b".\n" == chunk) {
                pending = Pending::End;
                chunk.len()
            } else if start_of_line && b"." == chunk {
                // The buffer ran dry right after the dot; the next bytes
                // decide between a stuffed dot and the terminator.
                pending = Pending::Dot;
                chunk.len()
            } else if start_of_line && b".\r" == chunk {
                pending = Pending::DotCr;
                chunk.len()
            } else {
                let body = if start_of_line && chunk.starts_with(b".") {
                    &chunk[1..]
                } else {
                    chunk
                };
                write_sink(sink, sink_error, body);
                start_of_line = chunk.ends_with(b"\n");
                chunk.len()
            }
        };
        io.consume(consumed);

        match pending {
            Pending::None => (),
            Pending::End => return Ok(()),
            Pending::Dot => {
                let next = io.read_data_byte().await?;
                if b'\n' == next {
                    return Ok(());
                }
                if b'\r' == next {
                    let after = io.read_data_byte().await?;
                    if b'\n' == after {
                        return Ok(());
                    }
                    // A stuffed (or stray) dot followed by a lone CR; the
                    // dot is dropped either way.
                    write_sink(sink, sink_error, &[b'\r', after]);
                    start_of_line = b'\n' == after;
                } else {
                    write_sink(sink, sink_error, &[next]);
                    start_of_line = false;
                }
            },
            Pending::DotCr => {
                let next = io.read_data_byte().await?;
                if b'\n' == next {
                    return Ok(());
                }
                write_sink(sink, sink_error, &[b'\r', next]);
                start_of_line = b'\n' == next;
            },
        }
    }
}

enum Pending {
    None,
    End,
    Dot,
    DotCr,
}

fn write_sink(
    sink: &mut (dyn Write + Send),
    sink_error: &mut Option<io::Error>,
    bytes: &[u8],
) {
    if sink_error.is_none() {
        if let Err(e) = sink.write_all(bytes) {
            *sink_error = Some(e);
        }
    }
}

/// Formats the trace header prepended to the message when
/// `insert_received_headers` is set. The protocol token follows RFC 3848.
fn received_header(options: &ServerOptions, session: &Session) -> String {
    let with = if !session.is_extended() {
        "SMTP"
    } else {
        match (session.is_tls(), session.authenticated().is_some()) {
            (false, false) => "ESMTP",
            (true, false) => "ESMTPS",
            (false, true) => "ESMTPA",
            (true, true) => "ESMTPSA",
        }
    };

    let first_recipient = session
        .envelope()
        .and_then(|e| e.recipients.first())
        .map(String::as_str)
        .unwrap_or("unknown");

    format!(
        "Received: from {helo} ({peer_host} [{peer_ip}])\r\n\
         \tby {host} ({software}) with {with} id {id}\r\n\
         \tfor <{first_recipient}>; {date}\r\n",
        helo = session.helo_host().unwrap_or("unknown"),
        peer_host = session.peer_host().unwrap_or("unknown"),
        peer_ip = session.peer_addr().ip(),
        host = options.host_name,
        software = options.software_name,
        id = session.id(),
        date = Utc::now().to_rfc2822(),
    )
}
