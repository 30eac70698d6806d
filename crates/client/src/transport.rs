use async_trait::async_trait;
use futures_util::future::join_all;

use crate::{CorrelationId, Document, RequestDescriptor, TransportError};

/// Result of one descriptor inside a batch send.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    pub correlation_id: CorrelationId,
    pub result: Result<Document, TransportError>,
}

/// Sends descriptors to the remote APIs.
///
/// Authentication and the wire shape of batches are transport concerns; the
/// engine only relies on `send_batch` returning exactly one response per
/// descriptor, in input order.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<Document, TransportError>;

    /// Send many descriptors as one round trip where the transport supports it.
    ///
    /// The default sends every descriptor concurrently.
    async fn send_batch(&self, requests: Vec<RequestDescriptor>) -> Vec<BatchResponse> {
        let futures = requests.iter().map(|request| async move {
            BatchResponse {
                correlation_id: request.correlation_id,
                result: self.send(request).await,
            }
        });
        join_all(futures).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, request: &RequestDescriptor) -> Result<Document, TransportError> {
        (**self).send(request).await
    }

    async fn send_batch(&self, requests: Vec<RequestDescriptor>) -> Vec<BatchResponse> {
        (**self).send_batch(requests).await
    }
}
