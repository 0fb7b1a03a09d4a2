// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Status codes and error values returned from tag operations.
//!
//! Mirrors the `PLCTAG_STATUS_*` / `PLCTAG_ERR_*` integer space: every
//! `Error` maps to a negative `i32`, and `STATUS_OK`/`STATUS_PENDING` are
//! the two non-negative values a caller can see from `status()`.

use std::fmt;
use std::io;

pub const STATUS_OK: i32 = 0;
pub const STATUS_PENDING: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// tag or session could not be created
    Create,
    /// allocation failure
    NoMem,
    /// the tag's data would not fit in a single PCCC packet
    TooLarge,
    /// the supplied buffer is smaller than the tag's size
    TooSmall,
    /// an operation is not allowed for this tag's configuration
    NotAllowed(String),
    /// malformed response data (bad DT byte, short packet, ...)
    BadData(String),
    /// the PLC or a CIP/EIP layer reported a non-OK status
    RemoteErr { code: i32 },
    /// a required pointer/reference was missing
    NullPtr,
    /// operation did not complete before the caller's timeout
    Timeout,
    /// could not encode an outbound packet
    Encode(String),
    /// tag already has a read or write in progress
    Busy,
    /// attribute string was malformed
    InvalidPath(String),
    /// underlying socket error
    Io(io::ErrorKind),
    /// lock was poisoned by a panic in another thread
    Lock,
}

impl Error {
    /// the `PLCTAG_ERR_*` style status code for this error
    pub fn code(&self) -> i32 {
        match self {
            Error::Create => -1,
            Error::NoMem => -2,
            Error::TooLarge => -3,
            Error::TooSmall => -4,
            Error::NotAllowed(_) => -5,
            Error::BadData(_) => -6,
            Error::RemoteErr { .. } => -7,
            Error::NullPtr => -8,
            Error::Timeout => -9,
            Error::Encode(_) => -10,
            Error::Busy => -11,
            Error::InvalidPath(_) => -12,
            Error::Io(_) => -13,
            Error::Lock => -14,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Create => write!(f, "ERR_CREATE: could not create tag or session"),
            Error::NoMem => write!(f, "ERR_NO_MEM: allocation failed"),
            Error::TooLarge => write!(
                f,
                "ERR_TOO_LARGE: tag data does not fit in a single PCCC packet"
            ),
            Error::TooSmall => write!(f, "ERR_TOO_SMALL: buffer smaller than tag size"),
            Error::NotAllowed(reason) => write!(f, "ERR_NOT_ALLOWED: {}", reason),
            Error::BadData(reason) => write!(f, "ERR_BAD_DATA: {}", reason),
            Error::RemoteErr { code } => {
                write!(f, "ERR_REMOTE_ERR: {}", decode_pccc_status(*code as u8))
            }
            Error::NullPtr => write!(f, "ERR_NULL_PTR"),
            Error::Timeout => write!(f, "ERR_TIMEOUT"),
            Error::Encode(reason) => write!(f, "ERR_ENCODE: {}", reason),
            Error::Busy => write!(f, "ERR_BUSY: operation already in progress"),
            Error::InvalidPath(reason) => write!(f, "invalid attribute string: {}", reason),
            Error::Io(kind) => write!(f, "IO error: {:?}", kind),
            Error::Lock => write!(f, "lock error: panicked while holding tag or session lock"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}

/// Maps a `PLCTAG_STATUS_*`/`PLCTAG_ERR_*` style code to a human string,
/// the public `decode_error` entry from the external interface table.
pub fn decode_error(rc: i32) -> &'static str {
    match rc {
        STATUS_OK => "STATUS_OK",
        STATUS_PENDING => "STATUS_PENDING",
        -1 => "ERR_CREATE",
        -2 => "ERR_NO_MEM",
        -3 => "ERR_TOO_LARGE",
        -4 => "ERR_TOO_SMALL",
        -5 => "ERR_NOT_ALLOWED",
        -6 => "ERR_BAD_DATA",
        -7 => "ERR_REMOTE_ERR",
        -8 => "ERR_NULL_PTR",
        -9 => "ERR_TIMEOUT",
        -10 => "ERR_ENCODE",
        -11 => "ERR_BUSY",
        -12 => "ERR_INVALID_PATH",
        -13 => "ERR_IO",
        -14 => "ERR_LOCK",
        _ => "ERR_UNKNOWN",
    }
}

/// PCCC extended status byte -> human text, per the table the original
/// protocol driver keeps next to its response checker.
pub fn decode_pccc_status(code: u8) -> &'static str {
    match code {
        0x00 => "success",
        0x01 => "DST node is out of buffer space",
        0x02 => "cannot guarantee delivery: link layer",
        0x03 => "duplicate token holder detected",
        0x04 => "local port is disconnected",
        0x05 => "application layer timed out waiting for a response",
        0x06 => "duplicate node detected",
        0x07 => "station is offline",
        0x08 => "hardware fault",
        0x10 => "illegal command or format",
        0x20 => "host has a problem and will not communicate",
        0x30 => "remote node host is missing, disconnected, or shut down",
        0x40 => "host could not complete function due to hardware fault",
        0x50 => "addressing problem or memory protect rungs",
        0x60 => "function not allowed due to command protection selection",
        0x70 => "processor is in program mode",
        0x80 => "compatibility mode file missing or communication zone problem",
        0x90 => "remote node cannot buffer command",
        0xA0 => "wait acknowledge; no NAK or ACK received yet",
        0xB0 => "remote node problem due to download",
        0xC0 => "wait acknowledge; remote node is still processing command",
        0xD0 => "not used",
        0xE0 => "not used",
        0xF0 => "error code in the EXT STS byte",
        _ => "unrecognized PCCC status code",
    }
}
