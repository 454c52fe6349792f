// Copyright (c) Microsoft. All rights reserved.

/// Failure of a registration attempt.
///
/// Every variant is fatal for the attempt it occurs in; neither the
/// registration tasks nor the orchestrator retry. Retrying a whole attempt is
/// the caller's decision.
#[derive(Debug)]
pub enum Error {
    /// Missing or invalid local configuration. Never retryable.
    Configuration(&'static str),

    /// The security provider failed to produce or accept key material.
    Security(std::io::Error),

    /// Connection-level failure surfaced by the transport.
    Transport(std::io::Error),

    /// No response arrived inside the named operation's allowed wait.
    Timeout(&'static str),

    /// A response arrived but violated the registration protocol.
    Protocol(std::borrow::Cow<'static, str>),

    /// An error reported by the provisioning service.
    Service(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Configuration(message) => {
                write!(f, "invalid provisioning client configuration: {}", message)
            }
            Error::Security(_) => f.write_str("security provider operation failed"),
            Error::Transport(_) => f.write_str("could not reach the provisioning service"),
            Error::Timeout(operation) => {
                write!(f, "timed out waiting for the {} response", operation)
            }
            Error::Protocol(message) => write!(f, "provisioning protocol violation: {}", message),
            Error::Service(message) => {
                write!(f, "provisioning service reported an error: {}", message)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Security(err) | Error::Transport(err) => Some(err),
            Error::Configuration(_)
            | Error::Timeout(_)
            | Error::Protocol(_)
            | Error::Service(_) => None,
        }
    }
}

impl std::convert::From<crate::schema::response::ServiceError> for Error {
    fn from(err: crate::schema::response::ServiceError) -> Error {
        Error::Service(err.to_string())
    }
}
