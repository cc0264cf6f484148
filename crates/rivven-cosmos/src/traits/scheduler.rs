//! Reconfiguration requests towards the external task scheduler

use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Why the monitor asked for a reconfiguration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconfigurationReason {
    /// Containers were added, removed or re-created
    ContainersChanged,
    /// At least one feed range split in these containers
    RangesSplit { container_rids: Vec<String> },
}

impl fmt::Display for ReconfigurationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContainersChanged => write!(f, "containers changed"),
            Self::RangesSplit { container_rids } => {
                write!(f, "feed ranges split in [{}]", container_rids.join(", "))
            }
        }
    }
}

/// A reconfiguration request as delivered to the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconfigurationRequest {
    pub connector_name: String,
    pub reason: ReconfigurationReason,
}

/// Hint to the scheduler that task units must be regenerated.
///
/// Must not block; repeated calls are allowed and idempotent on the scheduler side.
pub trait ReconfigurationHook: Send + Sync {
    fn request_reconfiguration(&self, request: ReconfigurationRequest);
}

/// Hook that forwards requests over a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelReconfigurationHook {
    tx: mpsc::UnboundedSender<ReconfigurationRequest>,
}

impl ChannelReconfigurationHook {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReconfigurationRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReconfigurationHook for ChannelReconfigurationHook {
    fn request_reconfiguration(&self, request: ReconfigurationRequest) {
        debug!(connector = %request.connector_name, reason = %request.reason, "Forwarding reconfiguration request");
        if self.tx.send(request).is_err() {
            warn!("Reconfiguration receiver dropped, request discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_hook_delivers() {
        let (hook, mut rx) = ChannelReconfigurationHook::new();
        hook.request_reconfiguration(ReconfigurationRequest {
            connector_name: "feed".into(),
            reason: ReconfigurationReason::ContainersChanged,
        });
        let request = rx.recv().await.unwrap();
        assert_eq!(request.reason, ReconfigurationReason::ContainersChanged);
    }

    #[test]
    fn test_channel_hook_survives_dropped_receiver() {
        let (hook, rx) = ChannelReconfigurationHook::new();
        drop(rx);
        hook.request_reconfiguration(ReconfigurationRequest {
            connector_name: "feed".into(),
            reason: ReconfigurationReason::RangesSplit {
                container_rids: vec!["rid-1".into()],
            },
        });
    }

    #[test]
    fn test_reason_display() {
        let reason = ReconfigurationReason::RangesSplit {
            container_rids: vec!["a".into(), "b".into()],
        };
        assert_eq!(reason.to_string(), "feed ranges split in [a, b]");
    }
}
