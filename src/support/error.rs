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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection closed by peer")]
    ConnectionClosed,
    #[error("Line exceeds the maximum length")]
    LineTooLong,
    #[error("Connection idle timer expired")]
    IdleTimeout,
    #[error("Cleartext bytes were pipelined across the STARTTLS boundary")]
    CleartextAfterStarttls,
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(#[source] io::Error),
    #[error("Server has already been started")]
    AlreadyStarted,
    #[error("A stopped server cannot be restarted")]
    CannotRestart,
    #[error("Invalid server configuration: {0}")]
    Config(&'static str),
    #[error(transparent)]
    Io(#[from] io::Error),
}
