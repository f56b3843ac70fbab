//! Transport errors

use arbiter_core::{ArbiterError, NetworkAddress};

/// Errors raised when a send cannot even be initiated
///
/// Failures after initiation are reported through the
/// [`DeliveryHandle`](crate::DeliveryHandle) instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Envelope could not be encoded
    #[error("encoding failed: {message}")]
    Encoding {
        /// Encoder message
        message: String,
    },

    /// No route to the peer and no fallback available
    #[error("peer unreachable: {peer}")]
    PeerUnreachable {
        /// Peer address
        peer: NetworkAddress,
    },

    /// Transport is shutting down
    #[error("transport closed")]
    Closed,
}

impl From<ArbiterError> for TransportError {
    fn from(err: ArbiterError) -> Self {
        TransportError::Encoding {
            message: err.to_string(),
        }
    }
}

/// Transport result alias
pub type TransportResult<T> = std::result::Result<T, TransportError>;
