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

use lazy_static::lazy_static;
use regex::Regex;

/// Splits a command line into its verb and the argument text after the
/// single separating space.
pub(crate) fn split_verb(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((verb, args)) => (verb, args),
        None => (line, ""),
    }
}

/// The ESMTP parameters accepted on MAIL FROM.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MailParameters {
    /// `SIZE=` (RFC 1870). Advisory; the core does not enforce it against
    /// the bytes actually read.
    pub declared_size: Option<u64>,
    /// True when `BODY=8BITMIME` was given (RFC 6152).
    pub body_8bit: bool,
    /// `AUTH=` (RFC 4954). Stored verbatim, not acted on.
    pub auth: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PathError {
    /// Malformed path or parameter value.
    Syntax,
    /// A syntactically valid parameter this server does not implement.
    UnknownParameter(String),
}

lazy_static! {
    static ref RX_MAIL: Regex =
        Regex::new("^(?i)FROM:[ ]?<([^>]*)>(.*)$").unwrap();
    static ref RX_RCPT: Regex =
        Regex::new("^(?i)TO:[ ]?<(?:@[^:]+:)?([^>]+)>(.*)$").unwrap();
    static ref RX_SIZE_PARM: Regex =
        Regex::new("^(?i)SIZE=([0-9]+)$").unwrap();
    static ref RX_BODY_PARM: Regex =
        Regex::new("^(?i)BODY=(7BIT|8BITMIME)$").unwrap();
    static ref RX_AUTH_PARM: Regex = Regex::new("^(?i)AUTH=(.+)$").unwrap();
}

/// Parses the argument text of MAIL: the reverse-path (`<>` is legal) and
/// any ESMTP parameters.
pub(crate) fn parse_reverse_path(
    args: &str,
) -> Result<(String, MailParameters), PathError> {
    let cap = RX_MAIL.captures(args.trim_end()).ok_or(PathError::Syntax)?;
    let path = cap.get(1).map(|c| c.as_str()).unwrap_or("").to_owned();

    let mut parameters = MailParameters::default();
    for parm in cap
        .get(2)
        .map(|c| c.as_str())
        .unwrap_or("")
        .split(' ')
        .filter(|p| !p.is_empty())
    {
        if let Some(size) = RX_SIZE_PARM.captures(parm) {
            parameters.declared_size = Some(
                size.get(1)
                    .map(|c| c.as_str())
                    .unwrap_or("")
                    .parse::<u64>()
                    .map_err(|_| PathError::Syntax)?,
            );
        } else if let Some(body) = RX_BODY_PARM.captures(parm) {
            parameters.body_8bit = body
                .get(1)
                .map(|c| c.as_str())
                .unwrap_or("")
                .eq_ignore_ascii_case("8BITMIME");
        } else if let Some(auth) = RX_AUTH_PARM.captures(parm) {
            parameters.auth =
                auth.get(1).map(|c| c.as_str().to_owned());
        } else {
            return Err(PathError::UnknownParameter(truncate(parm)));
        }
    }

    Ok((path, parameters))
}

/// Parses the argument text of RCPT: the forward-path, with any RFC 5321
/// source route stripped. RCPT parameters are not implemented.
pub(crate) fn parse_forward_path(args: &str) -> Result<String, PathError> {
    let cap = RX_RCPT.captures(args.trim_end()).ok_or(PathError::Syntax)?;

    let extra = cap.get(2).map(|c| c.as_str().trim()).unwrap_or("");
    if !extra.is_empty() {
        return Err(PathError::UnknownParameter(truncate(extra)));
    }

    Ok(cap.get(1).map(|c| c.as_str()).unwrap_or("").to_owned())
}

fn truncate(s: &str) -> String {
    let end = s
        .char_indices()
        .nth(64)
        .map(|(ix, _)| ix)
        .unwrap_or(s.len());
    s[..end].to_owned()
}
