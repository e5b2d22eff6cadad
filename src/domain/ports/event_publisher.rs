//! Event publisher port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::EngineEvent;

/// Publish-only event fan-out capability.
///
/// Delivery is at-least-once; publishers never block workflow progress on
/// slow subscribers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EngineEvent) -> DomainResult<()>;
}
