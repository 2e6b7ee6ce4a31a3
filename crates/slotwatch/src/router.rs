//! Callback routing from SDK worker threads into slot inboxes.
//!
//! The device SDK calls back on its own threads. Nothing here touches slot
//! state: a callback becomes a [`StreamNotice`] posted into the owning slot's
//! notice inbox, and the slot driver applies it in order with its requests.
//!
//! Every sink remembers the layout generation it was created under. Once the
//! pool is rebuilt, slot indices are reused by brand new sessions, so notices
//! from sinks older than the current build are dropped here rather than
//! delivered to whichever session now lives at that index.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::layout::LayoutClock;
use crate::types::{SdkCode, StreamId};

/// Asynchronous stream event reported by the SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The SDK closed the stream on its own (end of recording, device drop).
    Closed,
    /// Non-fatal stream error.
    Error { code: SdkCode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamNotice {
    pub stream: StreamId,
    pub event: StreamEvent,
}

pub(crate) type NoticeSender = mpsc::UnboundedSender<StreamNotice>;

/// Routes notices to the slot inboxes of the current pool build.
#[derive(Debug)]
pub struct CallbackRouter {
    clock: Arc<LayoutClock>,
    routes: RwLock<HashMap<usize, NoticeSender>>,
}

impl CallbackRouter {
    pub fn new(clock: Arc<LayoutClock>) -> Self {
        Self {
            clock,
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> &Arc<LayoutClock> {
        &self.clock
    }

    /// Start a new build: forget every route and reject sinks older than
    /// `generation` from now on.
    pub(crate) fn reset(&self, generation: u64) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        self.clock.mark_build(generation);
        routes.clear();
    }

    pub(crate) fn register(&self, slot: usize, tx: NoticeSender) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot, tx);
    }

    /// Callback sink for `slot`, stamped with the current generation.
    pub fn sink(self: &Arc<Self>, slot: usize) -> StreamEventSink {
        StreamEventSink {
            router: Arc::downgrade(self),
            slot,
            generation: self.clock.current(),
        }
    }

    fn dispatch(&self, slot: usize, generation: u64, notice: StreamNotice) -> bool {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        if !self.clock.is_current_build(generation) {
            debug!(
                slot,
                stream = %notice.stream,
                generation,
                build = self.clock.build_generation(),
                "dropping notice from superseded layout"
            );
            return false;
        }
        match routes.get(&slot) {
            Some(tx) => tx.send(notice).is_ok(),
            None => {
                trace!(slot, stream = %notice.stream, "no route for slot");
                false
            }
        }
    }
}

/// Callback handle given to the SDK with every opened stream.
///
/// Thread-safe and non-blocking; safe to call from any SDK worker thread.
#[derive(Debug, Clone)]
pub struct StreamEventSink {
    router: Weak<CallbackRouter>,
    slot: usize,
    generation: u64,
}

impl StreamEventSink {
    /// Post an event. Returns false if it was rejected as stale or the slot
    /// is gone.
    pub fn emit(&self, stream: StreamId, event: StreamEvent) -> bool {
        match self.router.upgrade() {
            Some(router) => {
                router.dispatch(self.slot, self.generation, StreamNotice { stream, event })
            }
            None => false,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Arc<CallbackRouter> {
        let clock = Arc::new(LayoutClock::new());
        let router = Arc::new(CallbackRouter::new(clock.clone()));
        router.reset(clock.bump());
        router
    }

    #[test]
    fn test_notice_reaches_registered_slot() {
        let router = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register(1, tx);

        let sink = router.sink(1);
        assert!(sink.emit(StreamId(9), StreamEvent::Closed));
        assert_eq!(
            rx.try_recv().unwrap(),
            StreamNotice {
                stream: StreamId(9),
                event: StreamEvent::Closed
            }
        );
    }

    #[test]
    fn test_superseded_build_is_rejected() {
        let router = router();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        router.register(0, old_tx);
        let stale = router.sink(0);

        router.reset(router.clock().bump());
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register(0, tx);

        assert!(!stale.emit(StreamId(1), StreamEvent::Closed));
        assert!(rx.try_recv().is_err());

        assert!(router.sink(0).emit(StreamId(2), StreamEvent::Closed));
        assert_eq!(rx.try_recv().unwrap().stream, StreamId(2));
    }

    #[test]
    fn test_layout_bump_without_rebuild_still_delivers() {
        let router = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register(0, tx);
        let sink = router.sink(0);

        router.clock().bump();
        assert!(sink.emit(StreamId(3), StreamEvent::Error { code: SdkCode(4) }));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_dropped_router() {
        let router = router();
        let sink = router.sink(0);
        drop(router);
        assert!(!sink.emit(StreamId(1), StreamEvent::Closed));
    }

    #[test]
    fn test_emit_from_foreign_thread() {
        let router = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register(2, tx);
        let sink = router.sink(2);

        std::thread::spawn(move || sink.emit(StreamId(5), StreamEvent::Closed))
            .join()
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().stream, StreamId(5));
    }
}
