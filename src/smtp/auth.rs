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

//! The SASL side of the AUTH command (RFC 4954), plus built-in PLAIN,
//! LOGIN, and CRAM-MD5 mechanisms over a caller-supplied credentials
//! check.

use std::mem;
use std::str;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use md5::Md5;
use rand::Rng;

use super::codes::*;
use super::reply::Reply;
use crate::handler::{
    AuthResult, AuthenticationHandler, AuthenticationHandlerFactory,
};

/// What the connection loop does next with an open dialogue.
pub(crate) enum AuthProgress {
    /// Send the 334 and feed the next client line back in.
    Challenge(Reply),
    /// Send the reply; a carried identity means success.
    Done {
        reply: Reply,
        identity: Option<String>,
    },
}

/// Drives one AUTH exchange.
///
/// The dialogue owns the base64 layer and the `*` abort; mechanism
/// semantics live behind the `AuthenticationHandler`.
pub(crate) struct AuthDialogue {
    handler: Box<dyn AuthenticationHandler>,
}

impl AuthDialogue {
    /// Starts the dialogue, consuming the initial response from the AUTH
    /// line if the client sent one (`=` denotes a present-but-empty one).
    pub(crate) fn begin(
        handler: Box<dyn AuthenticationHandler>,
        initial: Option<&str>,
    ) -> (AuthDialogue, AuthProgress) {
        let mut dialogue = AuthDialogue { handler };
        let progress = match initial {
            None => {
                let result = dialogue.handler.auth(None);
                dialogue.map_result(result)
            },
            Some("=") => {
                let result = dialogue.handler.auth(Some(&[]));
                dialogue.map_result(result)
            },
            Some(initial) => dialogue.advance(initial.as_bytes()),
        };
        (dialogue, progress)
    }

    /// Feeds one client response line into the dialogue.
    pub(crate) fn advance(&mut self, line: &[u8]) -> AuthProgress {
        if b"*" == line {
            return AuthProgress::Done {
                reply: Reply::new(
                    rc::ParameterSyntaxError,
                    None,
                    "Authentication aborted",
                ),
                identity: None,
            };
        }

        let Ok(decoded) = base64::decode(line) else {
            return AuthProgress::Done {
                reply: Reply::syntax_error("Invalid base64"),
                identity: None,
            };
        };

        let result = self.handler.auth(Some(&decoded));
        self.map_result(result)
    }

    fn map_result(&self, result: AuthResult) -> AuthProgress {
        match result {
            AuthResult::Challenge(challenge) => AuthProgress::Challenge(
                Reply::new(
                    rc::ServerChallenge,
                    None,
                    base64::encode(challenge),
                ),
            ),
            AuthResult::Success(identity) => AuthProgress::Done {
                reply: Reply::auth_succeeded(),
                identity: Some(identity),
            },
            AuthResult::Failure => AuthProgress::Done {
                reply: Reply::auth_failed(),
                identity: None,
            },
        }
    }
}

/// The mechanisms `BasicAuthenticationFactory` can serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mechanism {
    Plain,
    Login,
    CramMd5,
}

impl Mechanism {
    pub fn as_str(self) -> &'static str {
        match self {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
            Mechanism::CramMd5 => "CRAM-MD5",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("PLAIN") {
            Some(Mechanism::Plain)
        } else if name.eq_ignore_ascii_case("LOGIN") {
            Some(Mechanism::Login)
        } else if name.eq_ignore_ascii_case("CRAM-MD5") {
            Some(Mechanism::CramMd5)
        } else {
            None
        }
    }
}

/// The credentials check behind the built-in mechanisms.
pub trait CredentialsValidator: Send + Sync {
    /// Verifies a cleartext username/password pair (PLAIN and LOGIN).
    fn check_plain(&self, username: &str, password: &str) -> bool;

    /// Returns the stored secret for `username`, needed to recompute the
    /// CRAM-MD5 digest. The default makes CRAM-MD5 always fail.
    fn lookup_secret(&self, username: &str) -> Option<String> {
        let _ = username;
        None
    }
}

/// An `AuthenticationHandlerFactory` implementing PLAIN, LOGIN, and
/// CRAM-MD5 against a `CredentialsValidator`.
pub struct BasicAuthenticationFactory {
    host_name: String,
    mechanisms: Vec<Mechanism>,
    validator: Arc<dyn CredentialsValidator>,
}

impl BasicAuthenticationFactory {
    /// `host_name` appears in generated CRAM-MD5 challenges; `mechanisms`
    /// is advertised in the given order.
    pub fn new(
        host_name: impl Into<String>,
        mechanisms: Vec<Mechanism>,
        validator: Arc<dyn CredentialsValidator>,
    ) -> Self {
        BasicAuthenticationFactory {
            host_name: host_name.into(),
            mechanisms,
            validator,
        }
    }
}

impl AuthenticationHandlerFactory for BasicAuthenticationFactory {
    fn mechanisms(&self) -> Vec<String> {
        self.mechanisms
            .iter()
            .map(|m| m.as_str().to_owned())
            .collect()
    }

    fn create(
        &self,
        mechanism: &str,
    ) -> Option<Box<dyn AuthenticationHandler>> {
        let mechanism = Mechanism::from_name(mechanism)?;
        if !self.mechanisms.contains(&mechanism) {
            return None;
        }

        let state = match mechanism {
            Mechanism::Plain => State::Plain,
            Mechanism::Login => State::LoginUsername,
            Mechanism::CramMd5 => State::CramMd5 {
                challenge: cram_challenge(&self.host_name),
            },
        };

        Some(Box::new(BasicAuthenticationHandler {
            validator: Arc::clone(&self.validator),
            state,
        }))
    }
}

struct BasicAuthenticationHandler {
    validator: Arc<dyn CredentialsValidator>,
    state: State,
}

enum State {
    Plain,
    LoginUsername,
    LoginPassword { username: String },
    CramMd5 { challenge: String },
    Done,
}

impl AuthenticationHandler for BasicAuthenticationHandler {
    fn auth(&mut self, client_input: Option<&[u8]>) -> AuthResult {
        match (mem::replace(&mut self.state, State::Done), client_input) {
            (State::Plain, None) => {
                self.state = State::Plain;
                AuthResult::Challenge(String::new())
            },
            (State::Plain, Some(input)) => self.check_plain_payload(input),

            (State::LoginUsername, None) => {
                self.state = State::LoginUsername;
                AuthResult::Challenge("Username:".to_owned())
            },
            (State::LoginUsername, Some(input)) => {
                match str::from_utf8(input) {
                    Ok(username) => {
                        self.state = State::LoginPassword {
                            username: username.to_owned(),
                        };
                        AuthResult::Challenge("Password:".to_owned())
                    },
                    Err(_) => AuthResult::Failure,
                }
            },
            (State::LoginPassword { username }, Some(input)) => {
                match str::from_utf8(input) {
                    Ok(password)
                        if self
                            .validator
                            .check_plain(&username, password) =>
                    {
                        AuthResult::Success(username)
                    },
                    _ => AuthResult::Failure,
                }
            },
            (State::LoginPassword { username }, None) => {
                self.state = State::LoginPassword { username };
                AuthResult::Challenge("Password:".to_owned())
            },

            (State::CramMd5 { challenge }, None) => {
                let text = challenge.clone();
                self.state = State::CramMd5 { challenge };
                AuthResult::Challenge(text)
            },
            (State::CramMd5 { challenge }, Some(input)) => {
                self.check_cram_response(&challenge, input)
            },

            (State::Done, _) => AuthResult::Failure,
        }
    }
}

impl BasicAuthenticationHandler {
    /// RFC 4616: the payload is `authzid NUL authcid NUL password`, with an
    /// empty authzid meaning "same as authcid".
    fn check_plain_payload(&self, input: &[u8]) -> AuthResult {
        let Ok(text) = str::from_utf8(input) else {
            return AuthResult::Failure;
        };

        let mut parts = text.split('\x00');
        let (Some(authzid), Some(authcid), Some(password), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return AuthResult::Failure;
        };

        if !authzid.is_empty() && authzid != authcid {
            return AuthResult::Failure;
        }

        if self.validator.check_plain(authcid, password) {
            AuthResult::Success(authcid.to_owned())
        } else {
            AuthResult::Failure
        }
    }

    /// RFC 2195: the response is `username SP hex(HMAC-MD5(secret,
    /// challenge))`.
    fn check_cram_response(
        &self,
        challenge: &str,
        input: &[u8],
    ) -> AuthResult {
        let Ok(text) = str::from_utf8(input) else {
            return AuthResult::Failure;
        };
        let Some((username, digest)) = text.rsplit_once(' ') else {
            return AuthResult::Failure;
        };
        let Some(secret) = self.validator.lookup_secret(username) else {
            return AuthResult::Failure;
        };

        let expected =
            hmac_md5_hex(secret.as_bytes(), challenge.as_bytes());
        if expected == digest.to_ascii_lowercase() {
            AuthResult::Success(username.to_owned())
        } else {
            AuthResult::Failure
        }
    }
}

pub(crate) fn hmac_md5_hex(key: &[u8], message: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut mac = Hmac::<Md5>::new_from_slice(key)
        .expect("HMAC-MD5 accepts keys of any length");
    mac.update(message);

    let digest = mac.finalize().into_bytes();
    let mut hex = String::with_capacity(2 * digest.len());
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

fn cram_challenge(host_name: &str) -> String {
    format!(
        "<{:08x}.{}@{}>",
        rand::thread_rng().gen::<u32>(),
        chrono::Utc::now().timestamp(),
        host_name,
    )
}
