//! Station notifications for the UI layer.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::SessionMode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StationEvent {
    /// Pool-wide selection moved; `None` when the selected slot dropped it.
    SelectionChanged { slot: Option<usize> },
    ModeChanged { slot: usize, mode: SessionMode },
    LayoutChanged { generation: u64 },
}

/// Fan-out of [`StationEvent`]s. Sending never blocks and never fails; with
/// no subscribers events are dropped, and slow subscribers observe `Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: StationEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.tx.subscribe()
    }
}
