// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for the DSU protocol engine.

use thiserror::Error;

/// A malformed or tampered inbound datagram.
///
/// Never propagated to the caller: the socket-readable handler logs these at
/// debug level and silently drops the datagram.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("datagram shorter than the 20-byte header")]
    TooShort,
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported protocol version")]
    BadVersion,
    #[error("payload_length field does not match datagram size")]
    BadLength,
    #[error("CRC32 mismatch")]
    BadChecksum,
    #[error("unrecognized message type")]
    UnknownMessageType,
}

/// Failure to register a new device with the server.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("server already has the maximum of {0} devices")]
    ServerFull(u8),
    #[error("device is already registered with this server")]
    AlreadyServing,
}

/// Top-level server construction/runtime error.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind UDP socket: {0}")]
    Bind(#[source] std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
