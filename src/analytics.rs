use serde_json::Value;

/// Fire-and-forget sink for product analytics. `capture` must return
/// immediately and never fail the caller.
pub trait AnalyticsSink: Send + Sync {
    fn capture(&self, name: &'static str, attributes: Value);
}

/// Emits captured events as `tracing` events on the `analytics` target.
pub struct TracingAnalytics;

impl AnalyticsSink for TracingAnalytics {
    fn capture(&self, name: &'static str, attributes: Value) {
        tracing::info!(target: "analytics", event = name, %attributes, "captured");
    }
}
