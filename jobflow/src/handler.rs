//! Command and query handler contract.
//!
//! Handlers are built once by an initializer, with their adapters injected,
//! and stored in a context slot as `Arc<dyn ...>`. They keep no mutable state
//! between calls. Streaming requests carry exactly one
//! [`StreamSender`](crate::stream::StreamSender) or
//! [`StreamReceiver`](crate::stream::StreamReceiver) plus scalar parameters.

use anyhow::Result;
use async_trait::async_trait;

/// Handler that performs a side effect.
#[async_trait]
pub trait CommandHandler<R: Send + 'static>: Send + Sync {
    async fn handle(&self, request: R) -> Result<()>;
}

/// Handler that answers a request.
#[async_trait]
pub trait QueryHandler<R: Send + 'static>: Send + Sync {
    type Output: Send;

    async fn handle(&self, request: R) -> Result<Self::Output>;
}
