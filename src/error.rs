//! Error handling for the perfscope agent
//!
//! Each subsystem has its own error enum; [`AgentError`] wraps them all for
//! the [`crate::pipeline::Pipeline`] API and adds lookup failures.

use crate::channel::ChannelError;
use crate::config::ConfigError;
use crate::encoder::EncodeError;
use crate::id::{ChannelId, SubscriptionId};
use crate::protocol::ProtocolError;
use crate::subscription::DeliveryError;
use thiserror::Error;

/// Main error type for perfscope operations
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Encoder error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No channel {0}")]
    UnknownChannel(ChannelId),

    #[error("No subscription {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("Unknown source type: {0}")]
    UnknownSourceType(String),

    #[error("Unknown encoder: {0}")]
    UnknownEncoder(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<AgentError>,
    },
}

impl AgentError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        AgentError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for perfscope operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<AgentError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;

    #[test]
    fn test_error_display() {
        let err = AgentError::UnknownEncoder("lz4".to_string());
        assert_eq!(err.to_string(), "Unknown encoder: lz4");
    }

    #[test]
    fn test_error_with_context() {
        let err: Result<()> = Err(ChannelError::InvalidState {
            op: "pause",
            state: ChannelState::Created,
        })
        .context("Failed to pause channel 3");
        let message = err.unwrap_err().to_string();
        assert!(message.starts_with("Failed to pause channel 3"));
        assert!(message.contains("Cannot pause a created channel"));
    }

    #[test]
    fn test_lazy_context_and_source_chain() {
        let err: Result<()> = Err(std::io::Error::other("disk full")).with_context(|| "Saving config".to_string());
        let err = err.unwrap_err();
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "IO error: disk full");
    }
}
