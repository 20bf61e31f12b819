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

use std::borrow::Cow;

use super::codes::*;

/// One SMTP reply: a numeric code, an optional RFC 3463 enhanced status
/// code, and one or more text lines.
///
/// Serialization follows the RFC 5321 multi-line convention: all lines but
/// the last carry a `-` after the code, the last a space. When an enhanced
/// status is present it is repeated on every line (RFC 2034).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    code: ReplyCode,
    status: Option<(StatusClass, StatusDetail)>,
    lines: Vec<Cow<'static, str>>,
}

impl Reply {
    pub fn new(
        code: ReplyCode,
        status: Option<(StatusClass, StatusDetail)>,
        text: impl Into<Cow<'static, str>>,
    ) -> Self {
        Reply {
            code,
            status,
            lines: vec![text.into()],
        }
    }

    /// Appends another text line.
    pub fn and_line(mut self, text: impl Into<Cow<'static, str>>) -> Self {
        self.lines.push(text.into());
        self
    }

    pub fn code(&self) -> u16 {
        self.code as u16
    }

    /// Whether this is a 2xx or 3xx reply.
    pub fn is_positive(&self) -> bool {
        self.code() < 400
    }

    #[cfg(test)]
    pub(crate) fn lines(&self) -> &[Cow<'static, str>] {
        &self.lines
    }

    pub(crate) fn wire_format(&self) -> String {
        use std::fmt::Write as _;

        let mut s = String::new();
        let last = self.lines.len() - 1;
        for (ix, line) in self.lines.iter().enumerate() {
            let _ = write!(
                s,
                "{}{}",
                self.code as u16,
                if ix == last { ' ' } else { '-' },
            );
            if let Some((class, detail)) = self.status {
                let detail = detail as u8;
                let _ = write!(
                    s,
                    "{}.{}.{} ",
                    class as u8,
                    detail / 10,
                    detail % 10,
                );
            }
            let _ = write!(s, "{}\r\n", line);
        }

        s
    }

    /// Parses a serialized reply. The enhanced status, if any, stays part of
    /// the line text, so `parse` then `wire_format` reproduces the input
    /// exactly.
    #[cfg(test)]
    pub(crate) fn parse(wire: &str) -> Option<Reply> {
        let mut code = None::<u16>;
        let mut lines = Vec::<Cow<'static, str>>::new();
        let mut terminated = false;

        for line in wire.split_inclusive('\n') {
            if terminated {
                return None;
            }

            let line = line.strip_suffix("\r\n")?;
            if line.len() < 4 || !line.is_char_boundary(4) {
                return None;
            }

            let (head, text) = line.split_at(4);
            let this_code = head[..3].parse::<u16>().ok()?;
            if *code.get_or_insert(this_code) != this_code {
                return None;
            }

            match head.as_bytes()[3] {
                b' ' => terminated = true,
                b'-' => (),
                _ => return None,
            }

            lines.push(Cow::Owned(text.to_owned()));
        }

        if !terminated {
            return None;
        }

        Some(Reply {
            code: ReplyCode::from_u16(code?)?,
            status: None,
            lines,
        })
    }

    pub(crate) fn greeting(host_name: &str, software_name: &str) -> Self {
        Reply::new(
            rc::ServiceReady,
            None,
            format!("{} ESMTP {}", host_name, software_name),
        )
    }

    pub(crate) fn closing(host_name: &str) -> Self {
        Reply::new(
            rc::ServiceClosing,
            None,
            format!("{} closing connection", host_name),
        )
    }

    pub fn ok() -> Self {
        Reply::new(rc::Ok, Some((sc::Success, sd::Undefined)), "Ok")
    }

    pub(crate) fn ok_mail() -> Self {
        Reply::new(rc::Ok, Some((sc::Success, sd::OtherAddressStatus)), "Ok")
    }

    pub(crate) fn ok_recipient() -> Self {
        Reply::new(
            rc::Ok,
            Some((sc::Success, sd::DestinationAddressValid)),
            "Ok",
        )
    }

    pub(crate) fn message_accepted() -> Self {
        Reply::new(
            rc::Ok,
            Some((sc::Success, sd::OtherMediaError)),
            "Message accepted",
        )
    }

    pub(crate) fn start_mail_input() -> Self {
        Reply::new(
            rc::StartMailInput,
            None,
            "End data with <CR><LF>.<CR><LF>",
        )
    }

    pub(crate) fn command_not_recognized() -> Self {
        Reply::new(
            rc::CommandSyntaxError,
            Some((sc::PermFail, sd::InvalidCommand)),
            "Error: command not recognized",
        )
    }

    pub(crate) fn line_too_long() -> Self {
        Reply::new(
            rc::CommandSyntaxError,
            Some((sc::PermFail, sd::SyntaxError)),
            "Line too long",
        )
    }

    pub fn syntax_error(text: impl Into<Cow<'static, str>>) -> Self {
        Reply::new(
            rc::ParameterSyntaxError,
            Some((sc::PermFail, sd::InvalidCommandArguments)),
            text,
        )
    }

    pub(crate) fn not_implemented(text: impl Into<Cow<'static, str>>) -> Self {
        Reply::new(
            rc::CommandNotImplemented,
            Some((sc::PermFail, sd::InvalidCommand)),
            text,
        )
    }

    pub fn bad_sequence(text: impl Into<Cow<'static, str>>) -> Self {
        Reply::new(
            rc::BadSequenceOfCommands,
            Some((sc::PermFail, sd::InvalidCommand)),
            text,
        )
    }

    pub(crate) fn parameter_not_implemented(
        text: impl Into<Cow<'static, str>>,
    ) -> Self {
        Reply::new(
            rc::CommandParameterNotImplemented,
            Some((sc::PermFail, sd::InvalidCommandArguments)),
            text,
        )
    }

    pub(crate) fn tls_required() -> Self {
        Reply::new(
            rc::AuthenticationRequired,
            Some((sc::PermFail, sd::OtherSecurity)),
            "Must issue a STARTTLS command first",
        )
    }

    pub(crate) fn auth_required() -> Self {
        Reply::new(
            rc::AuthenticationRequired,
            Some((sc::PermFail, sd::OtherSecurity)),
            "Authentication required",
        )
    }

    pub(crate) fn auth_succeeded() -> Self {
        Reply::new(
            rc::AuthenticationSucceeded,
            Some((sc::Success, sd::OtherSecurity)),
            "Authentication successful",
        )
    }

    pub(crate) fn auth_failed() -> Self {
        Reply::new(
            rc::AuthenticationCredentialsInvalid,
            Some((sc::PermFail, sd::AuthenticationCredentialsInvalid)),
            "Authentication failed",
        )
    }

    pub(crate) fn size_exceeded() -> Self {
        Reply::new(
            rc::ExceededStorageAllocation,
            Some((sc::PermFail, sd::MessageTooBigForSystem)),
            "Message size exceeds fixed limit",
        )
    }

    pub(crate) fn too_many_recipients() -> Self {
        Reply::new(
            rc::InsufficientStorage,
            Some((sc::TempFail, sd::TooManyRecipients)),
            "Too many recipients",
        )
    }

    /// Default reply for an envelope piece the message handler turned down.
    pub fn rejected() -> Self {
        Reply::new(
            rc::ActionNotTakenPermanent,
            Some((sc::PermFail, sd::DeliveryNotAuthorised)),
            "Rejected",
        )
    }

    /// Default reply for a message the handler could not take.
    pub fn transaction_failed() -> Self {
        Reply::new(
            rc::TransactionFailed,
            Some((sc::PermFail, sd::Undefined)),
            "Transaction failed",
        )
    }

    pub(crate) fn timeout_closing() -> Self {
        Reply::new(
            rc::ServiceNotAvailable,
            Some((sc::TempFail, sd::BadConnection)),
            "Timeout, closing connection",
        )
    }

    pub(crate) fn too_many_connections(host_name: &str) -> Self {
        Reply::new(
            rc::ServiceNotAvailable,
            Some((sc::TempFail, sd::OtherSecurity)),
            format!("{} Too many connections, try again later", host_name),
        )
    }
}
