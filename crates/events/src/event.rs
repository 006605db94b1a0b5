use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::driver::DriverName;

/// Queue used when neither the event nor the driver options name one.
pub const DEFAULT_QUEUE: &str = "default";

/// A unit of work.
///
/// Events are:
/// - **named** (the name is how a queued record finds its way back to this type)
/// - **data** (the implementing type *is* the payload and must survive a JSON round-trip)
/// - **driver-agnostic** (whether `execute` runs now or later is the driver's call)
///
/// Anything an event needs beyond its own payload belongs in a [`crate::Listener`],
/// which is registered once and can hold shared state.
#[async_trait]
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable event name (e.g. "orders.invoice_requested"). Must not be empty.
    const NAME: &'static str;

    /// Driver that should carry this event out; `None` uses the registry default.
    fn driver(&self) -> Option<DriverName> {
        None
    }

    /// Queue this event goes to when deferred; `None` uses the driver's queue.
    fn queue_name(&self) -> Option<&str> {
        None
    }

    /// The event's own logic. Listeners registered for the event run after it.
    async fn execute(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Object-safe view of an [`Event`], used behind the envelope.
#[async_trait]
pub(crate) trait ErasedEvent: Send + Sync {
    async fn execute(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<E: Event> ErasedEvent for E {
    async fn execute(&self) -> anyhow::Result<()> {
        Event::execute(self).await
    }
}
