// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio::sync::mpsc;

/// Represent the types of errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Error occurred while performing I/O.
    IoError,

    /// Packet encode error.
    EncodeError,

    /// Protocol violation in a received packet.
    MalformedPacket,

    /// Received packet exceeds the negotiated or configured maximum size.
    PacketTooLarge,

    /// Packet cannot be sent in the current phase, or is invalid for the
    /// negotiated protocol version. No bytes were written.
    PacketNotAllowedToSend,

    /// Peer violated the protocol at a level above packet encoding.
    ProtocolError,

    /// Topic alias is zero, exceeds the maximum, or is unknown.
    TopicAliasInvalid,

    /// Packet id is already registered.
    PacketIdInUse,

    /// All 65,535 packet ids are outstanding.
    PacketIdExhausted,

    /// Peer's Receive Maximum would be exceeded.
    ReceiveMaximumExceeded,

    /// The connection was closed by the peer or reset underneath us.
    ConnectionReset,

    /// Async operation was canceled; packet ids and store entries are
    /// preserved.
    OperationAborted,

    /// Every reason code of a SUBACK reported failure.
    AllErrorDetected,

    /// Authentication or authorization refused.
    NotAuthorized,

    /// Cert files error.
    CertError,

    /// Configuration file error.
    ConfigError,

    /// Socket stream error.
    SocketError,

    /// mpsc channel error.
    ChannelError,

    /// Session with the given id was not found.
    SessionNotFound,

    /// Operation does not fit the connection status.
    StatusError,

    /// Timed out waiting for the peer.
    Timeout,
}

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub const fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::from_string(
                ErrorKind::ConnectionReset,
                format!("Connection reset: {err}"),
            ),
            _ => Self::from_string(ErrorKind::IoError, format!("IoError: {err}")),
        }
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        let kind = match err {
            codec::DecodeError::PacketTooLarge => ErrorKind::PacketTooLarge,
            _ => ErrorKind::MalformedPacket,
        };
        Self::from_string(kind, format!("{err:?}"))
    }
}

impl From<codec::VarIntError> for Error {
    fn from(err: codec::VarIntError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::TopicError> for Error {
    fn from(err: codec::TopicError) -> Self {
        Self::from_string(ErrorKind::MalformedPacket, format!("{err:?}"))
    }
}

impl<T> From<mpsc::error::SendError<T>> for Error {
    fn from(err: mpsc::error::SendError<T>) -> Self {
        Self::from_string(ErrorKind::ChannelError, format!("channel error: {err}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::from_string(ErrorKind::SocketError, format!("Websocket error: {err}"))
    }
}
