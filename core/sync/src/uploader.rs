//! The remote-write seam injected into sync runs.

use async_trait::async_trait;

use hemolink_common::Result;
use hemolink_store::{QueueItem, QueueRecord};

/// Acknowledgement of one accepted upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadAck {
    /// Canonical id assigned by the remote service. When present and
    /// different from the item's current id, the queue reconciles to it.
    pub server_id: Option<String>,
}

impl UploadAck {
    /// Accepted; the item keeps its current id.
    pub fn accepted() -> Self {
        Self { server_id: None }
    }

    /// Accepted under a server-assigned id.
    pub fn with_server_id(id: impl Into<String>) -> Self {
        Self {
            server_id: Some(id.into()),
        }
    }
}

/// Performs the remote write for one queue item.
///
/// The embedding layer owns the transport; the sync engine never builds
/// network requests itself. A rejection by the service and a transport
/// failure are the same thing here: any `Err` marks the item failed for
/// this run and leaves it pending for the next.
#[async_trait]
pub trait Uploader<R: QueueRecord>: Send + Sync {
    async fn upload(&self, item: &QueueItem<R>) -> Result<UploadAck>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_constructors() {
        assert_eq!(UploadAck::accepted().server_id, None);
        assert_eq!(
            UploadAck::with_server_id("srv-1").server_id.as_deref(),
            Some("srv-1")
        );
    }
}
