//! The slot pool: grid layout, selection, full screen and bounded teardown.
//!
//! The pool keeps its bookkeeping behind a `std::sync::Mutex` that is never
//! held across an await. Layout changes (build, full screen, dispose) are
//! additionally serialized by an async layout lock so a rebuild can wait for
//! old slots to drain without blocking selection or status reads.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use slotconf::SlotwatchConfig;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::controller::{SessionController, SlotContext};
use crate::error::{Result, SessionError};
use crate::events::{EventBus, StationEvent};
use crate::layout::{GridLayout, LayoutClock, Placement, Rect, SurfaceHost};
use crate::playback::PlaybackCoordinator;
use crate::router::CallbackRouter;
use crate::sdk::{DeviceRegistry, DeviceSdk};
use crate::session::Session;
use crate::types::{DeviceId, SlotPhase, StreamParams};

/// External collaborators a pool is constructed with
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn DeviceRegistry>,
    pub sdk: Arc<dyn DeviceSdk>,
    pub surfaces: Arc<dyn SurfaceHost>,
}

impl Collaborators {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        sdk: Arc<dyn DeviceSdk>,
        surfaces: Arc<dyn SurfaceHost>,
    ) -> Self {
        Self {
            registry,
            sdk,
            surfaces,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PoolState {
    Empty,
    Built,
    FullScreen { slot: usize },
    TornDown,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolState::Empty => "empty",
            PoolState::Built => "built",
            PoolState::FullScreen { .. } => "full screen",
            PoolState::TornDown => "torn down",
        }
    }
}

/// Outcome of a bounded teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TeardownReport {
    /// Slots that confirmed a graceful stop in time.
    pub stopped: usize,
    /// Slots that were force-reset at the deadline.
    pub forced: usize,
}

/// Aggregate view for the UI layer
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub state: PoolState,
    pub generation: u64,
    pub selected: Option<usize>,
    pub grid: Option<GridLayout>,
    pub slots: Vec<Session>,
}

struct SlotEntry {
    controller: SessionController,
    driver: JoinHandle<()>,
}

struct PoolInner {
    state: PoolState,
    grid: Option<GridLayout>,
    slots: Vec<SlotEntry>,
    /// Slot whose flag may be set. Every other slot's flag is false.
    selected: Option<usize>,
    placements: Vec<Placement>,
    /// Grid placements to restore when leaving full screen.
    saved_placements: Vec<Placement>,
    /// Slots claimed by an in-flight `open_live_on_available`.
    reserved: HashSet<usize>,
    /// Bumped whenever the slot set is replaced, so stale reservations are ignored.
    lineage: u64,
}

impl PoolInner {
    /// Free for assignment: no content, no transition, no pending claim.
    fn is_free(&self, index: usize) -> bool {
        !self.reserved.contains(&index)
            && self.slots.get(index).is_some_and(|entry| {
                let session = entry.controller.session();
                !session.has_active_content && !session.phase.is_transitioning()
            })
    }

    fn replace_slots(&mut self) -> Vec<SlotEntry> {
        self.selected = None;
        self.reserved.clear();
        self.lineage += 1;
        std::mem::take(&mut self.slots)
    }
}

/// Claim on a slot, released when the assignment finishes or is dropped.
struct Reservation<'a> {
    pool: &'a SlotPool,
    index: usize,
    lineage: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut inner = self.pool.lock();
        if inner.lineage == self.lineage {
            inner.reserved.remove(&self.index);
        }
    }
}

pub struct SlotPool {
    ctx: Arc<SlotContext>,
    clock: Arc<LayoutClock>,
    area: Rect,
    max_slots: usize,
    teardown_timeout: Duration,
    inner: Mutex<PoolInner>,
    layout: tokio::sync::Mutex<()>,
}

impl SlotPool {
    pub fn new(collaborators: Collaborators, config: &SlotwatchConfig) -> Self {
        let orchestration = &config.orchestration;
        let display = &config.infra.display;
        let clock = Arc::new(LayoutClock::new());
        let router = Arc::new(CallbackRouter::new(Arc::clone(&clock)));
        let coordinator = Arc::new(PlaybackCoordinator::new(
            Arc::clone(&collaborators.registry),
            Arc::clone(&collaborators.sdk),
            orchestration.close_timeout(),
        ));

        let ctx = Arc::new(SlotContext {
            registry: collaborators.registry,
            sdk: collaborators.sdk,
            coordinator,
            surfaces: collaborators.surfaces,
            router,
            events: EventBus::new(orchestration.event_capacity),
            close_timeout: orchestration.close_timeout(),
            stop_timeout: orchestration.teardown_timeout(),
            inbox_capacity: orchestration.inbox_capacity,
        });

        Self {
            ctx,
            clock,
            area: Rect::new(0, 0, display.width, display.height),
            max_slots: orchestration.max_slots,
            teardown_timeout: orchestration.teardown_timeout(),
            inner: Mutex::new(PoolInner {
                state: PoolState::Empty,
                grid: None,
                slots: Vec::new(),
                selected: None,
                placements: Vec::new(),
                saved_placements: Vec::new(),
                reserved: HashSet::new(),
                lineage: 0,
            }),
            layout: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StationEvent> {
        self.ctx.events.subscribe()
    }

    pub fn state(&self) -> PoolState {
        self.lock().state
    }

    pub fn generation(&self) -> u64 {
        self.clock.current()
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn grid(&self) -> Option<GridLayout> {
        self.lock().grid
    }

    pub fn display_area(&self) -> Rect {
        self.area
    }

    pub fn controller(&self, index: usize) -> Result<SessionController> {
        let inner = self.lock();
        inner
            .slots
            .get(index)
            .map(|entry| entry.controller.clone())
            .ok_or(SessionError::InvalidSlotIndex {
                index,
                len: inner.slots.len(),
            })
    }

    /// Replace every slot with `n` fresh idle ones laid out in a grid.
    pub async fn build(&self, n: usize) -> Result<()> {
        let _layout = self.layout.lock().await;
        let old = {
            let mut inner = self.lock();
            match inner.state {
                PoolState::Empty | PoolState::Built => {}
                other => return Err(SessionError::InvalidPoolState(other.as_str())),
            }
            if n == 0 || n > self.max_slots {
                return Err(SessionError::InvalidSlotCount {
                    requested: n,
                    max: self.max_slots,
                });
            }
            inner.replace_slots()
        };

        let previous = old.len();
        if previous > 0 {
            let report = self.retire(old).await;
            debug!(stopped = report.stopped, forced = report.forced, "previous slots retired");
        }

        let generation = self.clock.bump();
        self.ctx.router.reset(generation);

        let grid = GridLayout::for_slots(n);
        let mut slots = Vec::with_capacity(n);
        let mut placements = Vec::with_capacity(n);
        for slot in 0..n {
            let (controller, driver) = SessionController::spawn(slot, Arc::clone(&self.ctx));
            let placement = Placement::shown(grid.cell(self.area, slot));
            self.ctx.surfaces.place(slot, placement);
            self.ctx.surfaces.clear(slot);
            placements.push(placement);
            slots.push(SlotEntry { controller, driver });
        }
        for slot in n..previous {
            self.ctx.surfaces.place(slot, Placement::shown(Rect::default()).hidden());
            self.ctx.surfaces.clear(slot);
        }
        if let Some(first) = slots.first() {
            first.controller.set_selected(true);
        }

        {
            let mut inner = self.lock();
            inner.slots = slots;
            inner.grid = Some(grid);
            inner.state = PoolState::Built;
            inner.selected = Some(0);
            inner.placements = placements;
            inner.saved_placements.clear();
        }

        info!(slots = n, rows = grid.rows, cols = grid.cols, generation, "pool built");
        self.ctx.events.emit(StationEvent::LayoutChanged { generation });
        self.ctx.events.emit(StationEvent::SelectionChanged { slot: Some(0) });
        Ok(())
    }

    /// Move the selection to `index`. Never touches a stream.
    pub fn select(&self, index: usize) -> Result<()> {
        {
            let mut inner = self.lock();
            Self::select_in(&mut inner, index)?;
        }
        self.ctx.events.emit(StationEvent::SelectionChanged { slot: Some(index) });
        Ok(())
    }

    fn select_in(inner: &mut PoolInner, index: usize) -> Result<()> {
        let len = inner.slots.len();
        if index >= len {
            return Err(SessionError::InvalidSlotIndex { index, len });
        }
        if let Some(previous) = inner.selected.and_then(|i| inner.slots.get(i)) {
            previous.controller.set_selected(false);
        }
        inner.slots[index].controller.set_selected(true);
        inner.selected = Some(index);
        Ok(())
    }

    /// Select the first slot without content. `None` when every slot is busy;
    /// the selection is then left as it was.
    pub fn select_next_idle(&self) -> Option<usize> {
        let index = {
            let mut inner = self.lock();
            let index = (0..inner.slots.len()).find(|&i| inner.is_free(i))?;
            Self::select_in(&mut inner, index).ok()?;
            index
        };
        self.ctx.events.emit(StationEvent::SelectionChanged { slot: Some(index) });
        Some(index)
    }

    pub fn selected(&self) -> Option<usize> {
        let inner = self.lock();
        inner
            .selected
            .filter(|&i| inner.slots.get(i).is_some_and(|entry| entry.controller.selected()))
    }

    /// Start live on the selected slot if it is free, else on the next idle one.
    ///
    /// The chosen slot stays reserved until the start settles, so concurrent
    /// callers are handed distinct slots.
    pub async fn open_live_on_available(
        &self,
        device_id: DeviceId,
        channel: u32,
        params: StreamParams,
    ) -> Result<usize> {
        let (index, controller, moved, _reservation) = {
            let mut inner = self.lock();
            match inner.state {
                PoolState::Built | PoolState::FullScreen { .. } => {}
                other => return Err(SessionError::InvalidPoolState(other.as_str())),
            }
            let preferred = inner
                .selected
                .filter(|&i| inner.is_free(i) && inner.slots[i].controller.selected());
            let index = match preferred {
                Some(index) => index,
                None => (0..inner.slots.len())
                    .find(|&i| inner.is_free(i))
                    .ok_or(SessionError::NoSlotAvailable)?,
            };
            let moved = preferred.is_none();
            if moved {
                Self::select_in(&mut inner, index)?;
            }
            inner.reserved.insert(index);
            let reservation = Reservation {
                pool: self,
                index,
                lineage: inner.lineage,
            };
            (index, inner.slots[index].controller.clone(), moved, reservation)
        };
        if moved {
            self.ctx.events.emit(StationEvent::SelectionChanged { slot: Some(index) });
        }

        controller.start_live(device_id, channel, params).await?;
        Ok(index)
    }

    /// Show slot `index` over the whole display. Siblings keep streaming, hidden.
    pub async fn enter_full_screen(&self, index: usize) -> Result<()> {
        let _layout = self.layout.lock().await;
        let placements = {
            let mut inner = self.lock();
            if inner.state != PoolState::Built {
                return Err(SessionError::InvalidPoolState(inner.state.as_str()));
            }
            let len = inner.slots.len();
            let entry = inner
                .slots
                .get(index)
                .ok_or(SessionError::InvalidSlotIndex { index, len })?;
            if !entry.controller.has_active_content() {
                return Err(SessionError::NoActiveContent(index));
            }

            let full: Vec<Placement> = inner
                .placements
                .iter()
                .enumerate()
                .map(|(slot, placement)| {
                    if slot == index {
                        Placement::shown(self.area)
                    } else {
                        placement.hidden()
                    }
                })
                .collect();
            let grid_placements = std::mem::replace(&mut inner.placements, full.clone());
            inner.saved_placements = grid_placements;
            inner.state = PoolState::FullScreen { slot: index };
            full
        };

        self.apply_placements(&placements);
        let generation = self.clock.bump();
        info!(slot = index, generation, "entered full screen");
        self.ctx.events.emit(StationEvent::LayoutChanged { generation });
        Ok(())
    }

    pub async fn exit_full_screen(&self) -> Result<()> {
        let _layout = self.layout.lock().await;
        let placements = {
            let mut inner = self.lock();
            if !matches!(inner.state, PoolState::FullScreen { .. }) {
                return Err(SessionError::InvalidPoolState(inner.state.as_str()));
            }
            let restored = std::mem::take(&mut inner.saved_placements);
            inner.placements = restored.clone();
            inner.state = PoolState::Built;
            restored
        };

        self.apply_placements(&placements);
        let generation = self.clock.bump();
        info!(generation, "left full screen");
        self.ctx.events.emit(StationEvent::LayoutChanged { generation });
        Ok(())
    }

    fn apply_placements(&self, placements: &[Placement]) {
        for (slot, placement) in placements.iter().enumerate() {
            self.ctx.surfaces.place(slot, *placement);
        }
    }

    /// Stop every busy slot, keeping bindings, within the teardown deadline.
    pub async fn stop_all(&self) -> TeardownReport {
        let controllers: Vec<SessionController> =
            self.lock().slots.iter().map(|e| e.controller.clone()).collect();
        self.teardown(controllers).await
    }

    async fn teardown(&self, controllers: Vec<SessionController>) -> TeardownReport {
        let busy: Vec<SessionController> = controllers
            .into_iter()
            .filter(|c| {
                let session = c.session();
                !session.is_idle() || session.phase != SlotPhase::Idle
            })
            .collect();
        if busy.is_empty() {
            return TeardownReport::default();
        }

        let deadline = Instant::now() + self.teardown_timeout;
        let mut pending: FuturesUnordered<_> = busy
            .iter()
            .cloned()
            .map(|controller| async move {
                controller.request_stop(true).await;
                controller.slot()
            })
            .collect();

        let mut confirmed = HashSet::new();
        while let Ok(Some(slot)) = tokio::time::timeout_at(deadline, pending.next()).await {
            confirmed.insert(slot);
        }
        drop(pending);

        let mut report = TeardownReport {
            stopped: confirmed.len(),
            forced: 0,
        };
        for controller in busy.iter().filter(|c| !confirmed.contains(&c.slot())) {
            controller.force_reset("teardown deadline exceeded");
            report.forced += 1;
        }
        if report.forced > 0 {
            warn!(stopped = report.stopped, forced = report.forced, "teardown forced slots idle");
        } else {
            debug!(stopped = report.stopped, "teardown complete");
        }
        report
    }

    /// Tear down `entries` and stop their drivers.
    async fn retire(&self, entries: Vec<SlotEntry>) -> TeardownReport {
        let report = self
            .teardown(entries.iter().map(|e| e.controller.clone()).collect())
            .await;

        let shutdown_timeout = self.teardown_timeout;
        let shutdowns = entries.into_iter().map(|entry| async move {
            let slot = entry.controller.slot();
            if tokio::time::timeout(shutdown_timeout, entry.controller.shutdown()).await.is_err() {
                warn!(slot, "slot driver did not exit in time, aborting it");
                entry.controller.force_reset("driver shutdown timed out");
                entry.driver.abort();
            }
        });
        futures::future::join_all(shutdowns).await;
        report
    }

    /// Tear everything down. The pool accepts no further layout changes.
    pub async fn dispose(&self) -> TeardownReport {
        let _layout = self.layout.lock().await;
        let old = {
            let mut inner = self.lock();
            if inner.state == PoolState::TornDown {
                return TeardownReport::default();
            }
            inner.state = PoolState::TornDown;
            inner.grid = None;
            inner.placements.clear();
            inner.saved_placements.clear();
            inner.replace_slots()
        };

        let report = self.retire(old).await;
        let generation = self.clock.bump();
        self.ctx.router.reset(generation);
        info!(stopped = report.stopped, forced = report.forced, generation, "pool disposed");
        self.ctx.events.emit(StationEvent::LayoutChanged { generation });
        report
    }

    pub fn status(&self) -> PoolStatus {
        let inner = self.lock();
        let slots: Vec<Session> = inner.slots.iter().map(|e| e.controller.session()).collect();
        let selected = slots.iter().position(|s| s.selected);
        PoolStatus {
            state: inner.state,
            generation: self.clock.current(),
            selected,
            grid: inner.grid,
            slots,
        }
    }
}

impl std::fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPool")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("max_slots", &self.max_slots)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{RecordingSurfaceHost, SimulatedSdk};
    use crate::types::SessionMode;

    fn pool() -> (Arc<SimulatedSdk>, Arc<RecordingSurfaceHost>, SlotPool) {
        let sdk = Arc::new(SimulatedSdk::new());
        sdk.add_device("cam1", "Lobby");
        let surfaces = Arc::new(RecordingSurfaceHost::new());
        let mut config = SlotwatchConfig::default();
        config.infra.display.width = 800;
        config.infra.display.height = 600;
        config.orchestration.max_slots = 16;
        let collaborators = Collaborators::new(sdk.clone(), sdk.clone(), surfaces.clone());
        let pool = SlotPool::new(collaborators, &config);
        (sdk, surfaces, pool)
    }

    #[tokio::test]
    async fn test_build_selects_first_slot() {
        let (_sdk, surfaces, pool) = pool();
        pool.build(4).await.unwrap();

        assert_eq!(pool.state(), PoolState::Built);
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.selected(), Some(0));
        assert_eq!(pool.generation(), 1);
        assert_eq!(
            surfaces.placement(3).map(|p| p.rect),
            Some(Rect::new(400, 300, 400, 300))
        );
        let status = pool.status();
        assert!(status.slots.iter().all(|s| s.is_idle() && s.is_consistent()));
    }

    #[tokio::test]
    async fn test_build_rejects_bad_counts() {
        let (_sdk, _surfaces, pool) = pool();
        assert_eq!(
            pool.build(0).await,
            Err(SessionError::InvalidSlotCount { requested: 0, max: 16 })
        );
        assert_eq!(
            pool.build(17).await,
            Err(SessionError::InvalidSlotCount { requested: 17, max: 16 })
        );
        assert_eq!(pool.state(), PoolState::Empty);
    }

    #[tokio::test]
    async fn test_select_moves_single_flag() {
        let (_sdk, _surfaces, pool) = pool();
        pool.build(4).await.unwrap();

        pool.select(2).unwrap();
        pool.select(3).unwrap();
        let selected: Vec<bool> = pool.status().slots.iter().map(|s| s.selected).collect();
        assert_eq!(selected, vec![false, false, false, true]);

        assert_eq!(pool.select(4), Err(SessionError::InvalidSlotIndex { index: 4, len: 4 }));
        assert_eq!(pool.selected(), Some(3));
    }

    #[tokio::test]
    async fn test_select_next_idle_skips_busy() {
        let (_sdk, _surfaces, pool) = pool();
        pool.build(2).await.unwrap();
        pool.controller(0)
            .unwrap()
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();

        assert_eq!(pool.select_next_idle(), Some(1));
        pool.controller(1)
            .unwrap()
            .start_live(DeviceId::from("cam1"), 1, StreamParams::default())
            .await
            .unwrap();

        assert_eq!(pool.select_next_idle(), None);
        assert_eq!(pool.selected(), Some(1));
    }

    #[tokio::test]
    async fn test_open_live_on_available() {
        let (_sdk, _surfaces, pool) = pool();
        pool.build(2).await.unwrap();

        let first = pool
            .open_live_on_available(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();
        let second = pool
            .open_live_on_available(DeviceId::from("cam1"), 1, StreamParams::default())
            .await
            .unwrap();
        assert_eq!((first, second), (0, 1));

        assert_eq!(
            pool.open_live_on_available(DeviceId::from("cam1"), 2, StreamParams::default())
                .await,
            Err(SessionError::NoSlotAvailable)
        );
    }

    #[tokio::test]
    async fn test_full_screen_requires_content() {
        let (_sdk, _surfaces, pool) = pool();
        assert_eq!(
            pool.enter_full_screen(0).await,
            Err(SessionError::InvalidPoolState("empty"))
        );

        pool.build(4).await.unwrap();
        assert_eq!(pool.enter_full_screen(1).await, Err(SessionError::NoActiveContent(1)));
        assert_eq!(pool.exit_full_screen().await, Err(SessionError::InvalidPoolState("built")));
    }

    #[tokio::test]
    async fn test_full_screen_round_trip_restores_grid() {
        let (_sdk, surfaces, pool) = pool();
        pool.build(4).await.unwrap();
        let before: Vec<_> = (0..4).map(|i| surfaces.placement(i)).collect();
        pool.controller(2)
            .unwrap()
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();

        pool.enter_full_screen(2).await.unwrap();
        assert_eq!(pool.state(), PoolState::FullScreen { slot: 2 });
        assert_eq!(surfaces.placement(2), Some(Placement::shown(pool.display_area())));
        assert_eq!(surfaces.placement(0).map(|p| p.visible), Some(false));
        assert_eq!(pool.build(2).await, Err(SessionError::InvalidPoolState("full screen")));

        pool.exit_full_screen().await.unwrap();
        let after: Vec<_> = (0..4).map(|i| surfaces.placement(i)).collect();
        assert_eq!(before, after);
        assert_eq!(pool.controller(2).unwrap().mode(), SessionMode::Live);
        assert_eq!(pool.generation(), 3);
    }

    #[tokio::test]
    async fn test_rebuild_closes_streams() {
        let (sdk, _surfaces, pool) = pool();
        pool.build(2).await.unwrap();
        let old = pool.controller(0).unwrap();
        old.start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();

        pool.build(3).await.unwrap();
        assert!(sdk.open_streams().is_empty());
        assert_eq!(pool.len(), 3);
        assert!(old.session().is_idle());
        assert_eq!(
            old.start_live(DeviceId::from("cam1"), 0, StreamParams::default()).await,
            Err(SessionError::ControllerClosed)
        );
    }

    #[tokio::test]
    async fn test_dispose() {
        let (sdk, _surfaces, pool) = pool();
        pool.build(2).await.unwrap();
        pool.controller(1)
            .unwrap()
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();

        let report = pool.dispose().await;
        assert_eq!(report, TeardownReport { stopped: 1, forced: 0 });
        assert_eq!(pool.state(), PoolState::TornDown);
        assert!(sdk.open_streams().is_empty());
        assert_eq!(pool.build(2).await, Err(SessionError::InvalidPoolState("torn down")));
        assert_eq!(pool.dispose().await, TeardownReport::default());
    }
}
