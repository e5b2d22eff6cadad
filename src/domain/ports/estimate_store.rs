//! Runtime-estimate map port.

use async_trait::async_trait;

/// Estimated-runtime store keyed by `(agent, action)`.
///
/// Losing this data only degrades scheduling quality, never correctness, so
/// the interface is infallible; implementations log their own trouble.
#[async_trait]
pub trait RuntimeEstimateStore: Send + Sync {
    /// Current estimate in seconds, if any observation exists.
    async fn get(&self, agent: &str, action: &str) -> Option<f64>;

    /// Fold an observed runtime into the estimate.
    ///
    /// Implementations use the exponential moving average
    /// `ert' = 0.7 * ert + 0.3 * actual`; the first observation seeds the
    /// estimate directly.
    async fn observe(&self, agent: &str, action: &str, runtime_s: f64);

    /// Number of `(agent, action)` pairs tracked.
    async fn entry_count(&self) -> usize;
}
