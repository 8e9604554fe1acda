use async_trait::async_trait;

use crate::events::Event;

/// Event consumer plugged into the engine.
///
/// Each subscriber runs in isolation:
/// - a dedicated worker task delivers events sequentially (FIFO),
/// - a bounded queue (capacity via [`Self::queue_capacity`]) buffers them,
/// - panics are caught and logged; they never reach the engine.
///
/// A slow subscriber fills only its own queue; when the queue is full new
/// events are dropped for that subscriber alone.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    ///
    /// Called from the subscriber's worker task, never from the publisher.
    async fn on_event(&self, event: &Event);

    /// Name used in drop/panic logs. Prefer short, descriptive names.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity, clamped to a minimum of 1. Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
