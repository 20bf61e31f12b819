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

//! Reply codes from RFC 5321 and RFC 4954, and enhanced status codes from
//! RFC 3463.
//!
//! The module is designed to be wildcard-imported, and defines submodules
//! with short names for accessing the enum values in a consistent way.
#![allow(dead_code)]

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum ReplyCode {
    SystemStatus = 211,
    HelpMessage = 214,
    ServiceReady = 220,
    ServiceClosing = 221,
    AuthenticationSucceeded = 235,
    Ok = 250,
    WillForward = 251,
    CannotVerify = 252,
    ServerChallenge = 334,
    StartMailInput = 354,
    ServiceNotAvailable = 421,
    ActionNotTakenTemporary = 450,
    ActionAborted = 451,
    InsufficientStorage = 452,
    TlsNotAvailable = 454,
    CommandSyntaxError = 500,
    ParameterSyntaxError = 501,
    CommandNotImplemented = 502,
    BadSequenceOfCommands = 503,
    CommandParameterNotImplemented = 504,
    DoesNotAcceptMail = 521,
    AuthenticationRequired = 530,
    AuthenticationCredentialsInvalid = 535,
    ActionNotTakenPermanent = 550,
    UserNotLocal = 551,
    ExceededStorageAllocation = 552,
    MailboxNameNotAllowed = 553,
    TransactionFailed = 554,
}

impl ReplyCode {
    pub fn from_u16(code: u16) -> Option<Self> {
        use ReplyCode::*;

        Some(match code {
            211 => SystemStatus,
            214 => HelpMessage,
            220 => ServiceReady,
            221 => ServiceClosing,
            235 => AuthenticationSucceeded,
            250 => Ok,
            251 => WillForward,
            252 => CannotVerify,
            334 => ServerChallenge,
            354 => StartMailInput,
            421 => ServiceNotAvailable,
            450 => ActionNotTakenTemporary,
            451 => ActionAborted,
            452 => InsufficientStorage,
            454 => TlsNotAvailable,
            500 => CommandSyntaxError,
            501 => ParameterSyntaxError,
            502 => CommandNotImplemented,
            503 => BadSequenceOfCommands,
            504 => CommandParameterNotImplemented,
            521 => DoesNotAcceptMail,
            530 => AuthenticationRequired,
            535 => AuthenticationCredentialsInvalid,
            550 => ActionNotTakenPermanent,
            551 => UserNotLocal,
            552 => ExceededStorageAllocation,
            553 => MailboxNameNotAllowed,
            554 => TransactionFailed,
            _ => return None,
        })
    }
}

pub mod rc {
    pub use super::ReplyCode::*;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum StatusClass {
    Success = 2,
    TempFail = 4,
    PermFail = 5,
}

pub mod sc {
    pub use super::StatusClass::*;
}

/// Subject and detail of an enhanced status code, packed as
/// `subject * 10 + detail`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum StatusDetail {
    Undefined = 0,
    OtherAddressStatus = 10,
    BadDestinationMailboxAddress = 11,
    DestinationAddressValid = 15,
    OtherMailboxStatus = 20,
    MessageLengthExceedsLimit = 23,
    OtherMailSystem = 30,
    MessageTooBigForSystem = 34,
    OtherNetwork = 40,
    BadConnection = 42,
    OtherProtocolStatus = 50,
    InvalidCommand = 51,
    SyntaxError = 52,
    TooManyRecipients = 53,
    InvalidCommandArguments = 54,
    WrongProtocolVersion = 55,
    OtherMediaError = 60,
    OtherSecurity = 70,
    DeliveryNotAuthorised = 71,
    AuthenticationCredentialsInvalid = 78,
}

pub mod sd {
    pub use super::StatusDetail::*;
}
