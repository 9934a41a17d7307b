//! Error types for broker operations

use std::fmt;

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur while talking to the message broker
#[derive(Debug)]
pub enum BrokerError {
    /// Connection or channel could not be established
    ConnectionFailed(String),

    /// Exchange/queue/binding declaration failed
    TopologyFailed(String),

    /// Publish failed
    PublishFailed(String),

    /// The consume stream broke
    ConsumeFailed(String),

    /// Acknowledgement or rejection failed
    SettleFailed(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to broker: {}", msg)
            }
            BrokerError::TopologyFailed(msg) => {
                write!(f, "failed to declare broker topology: {}", msg)
            }
            BrokerError::PublishFailed(msg) => write!(f, "publish failed: {}", msg),
            BrokerError::ConsumeFailed(msg) => write!(f, "consume failed: {}", msg),
            BrokerError::SettleFailed(msg) => write!(f, "message settlement failed: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}
