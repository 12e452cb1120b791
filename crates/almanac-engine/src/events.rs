//! Typed engine events and their subscriber list.
//!
//! Replaces the duck-typed emitter mixins of older designs with an
//! explicit event enum delivered over channels; a dropped receiver is
//! pruned on the next emit.

use tokio::sync::mpsc;

use almanac_core::timespan::Timespan;
use almanac_core::types::Scale;

/// Events the engine publishes to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A cached span was evicted; consumers release anything derived
    /// from occurrences inside it.
    Purge(Timespan),
    /// Every outstanding load for the current navigation step settled.
    LoadingComplete,
    /// The focused month changed.
    MonthChange { year: i32, month: u32 },
    /// The focused day changed.
    DayChange { year: i32, month: u32, day: u32 },
    /// The view scale changed.
    ScaleChange(Scale),
}

/// Subscriber list for [`EngineEvent`]s.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Delivers an event to every live subscriber, dropping closed ones.
    pub fn emit(&mut self, event: &EngineEvent) {
        tracing::trace!(?event, "emit");
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
