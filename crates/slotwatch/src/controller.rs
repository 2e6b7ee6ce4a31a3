//! Per-slot session controller.
//!
//! Each slot runs one driver task. Requests from the UI arrive on a bounded
//! inbox with a oneshot reply; SDK notices arrive on an unbounded inbox fed by
//! the [`CallbackRouter`]. The driver handles one message at a time, so no two
//! transitions on the same slot ever overlap.
//!
//! The [`Session`] lives behind a `std::sync::Mutex` that is only held for
//! in-memory updates, so status reads never wait on the SDK. A forced reset
//! can therefore always make the slot consistent immediately, even while the
//! driver is stuck in an SDK call: it bumps the slot epoch, drops the stream
//! guard, and cancels the in-flight operation. Whatever that operation
//! produces afterwards is discarded.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::events::{EventBus, StationEvent};
use crate::handle::{CloseOutcome, OwnedStream, StreamRole};
use crate::layout::SurfaceHost;
use crate::playback::{PlaybackCoordinator, PlaybackGrant};
use crate::router::{CallbackRouter, StreamEvent, StreamNotice};
use crate::sdk::{DeviceInfo, DeviceRegistry, DeviceSdk};
use crate::session::Session;
use crate::types::{
    DeviceId, LiveBinding, PlaybackCommand, SessionMode, SlotPhase, StreamId, StreamParams,
    TimeRange,
};

/// Collaborators shared by every slot of a pool
pub(crate) struct SlotContext {
    pub registry: Arc<dyn DeviceRegistry>,
    pub sdk: Arc<dyn DeviceSdk>,
    pub coordinator: Arc<PlaybackCoordinator>,
    pub surfaces: Arc<dyn SurfaceHost>,
    pub router: Arc<CallbackRouter>,
    pub events: EventBus,
    pub close_timeout: Duration,
    /// Upper bound on a single slot stop before it is forced.
    pub stop_timeout: Duration,
    pub inbox_capacity: usize,
}

/// Summary of a successful switch to playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackStarted {
    pub stream: StreamId,
    pub device_id: DeviceId,
    pub range: TimeRange,
    pub segments: usize,
}

enum Request {
    StartLive {
        device_id: DeviceId,
        channel: u32,
        params: StreamParams,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        keep_binding: bool,
        reply: oneshot::Sender<()>,
    },
    SwitchToPlayback {
        range: TimeRange,
        reply: oneshot::Sender<Result<PlaybackStarted>>,
    },
    SwitchToLive {
        reply: oneshot::Sender<Result<()>>,
    },
    Transport {
        command: PlaybackCommand,
        reply: oneshot::Sender<Result<()>>,
    },
    RefreshDisplay {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct SlotState {
    session: Session,
    stream: Option<OwnedStream>,
    /// Bumped by every forced reset.
    epoch: u64,
    /// Cancelled by a forced reset; replaced at the next operation.
    token: CancellationToken,
}

struct Shared {
    slot: usize,
    state: Mutex<SlotState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` only if no forced reset happened since `epoch`.
    fn commit<R>(&self, epoch: u64, f: impl FnOnce(&mut SlotState) -> R) -> Option<R> {
        let mut state = self.lock();
        if state.epoch != epoch {
            return None;
        }
        Some(f(&mut state))
    }
}

/// Handle to one slot's controller. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
    requests: mpsc::Sender<Request>,
    surfaces: Arc<dyn SurfaceHost>,
    events: EventBus,
    stop_timeout: Duration,
}

impl SessionController {
    /// Spawn the driver for `slot` and register its notice inbox with the router.
    pub(crate) fn spawn(slot: usize, ctx: Arc<SlotContext>) -> (Self, JoinHandle<()>) {
        let (request_tx, request_rx) = mpsc::channel(ctx.inbox_capacity.max(1));
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        ctx.router.register(slot, notice_tx);

        let shared = Arc::new(Shared {
            slot,
            state: Mutex::new(SlotState {
                session: Session::new(slot),
                stream: None,
                epoch: 0,
                token: CancellationToken::new(),
            }),
        });

        let controller = Self {
            shared: Arc::clone(&shared),
            requests: request_tx,
            surfaces: Arc::clone(&ctx.surfaces),
            events: ctx.events.clone(),
            stop_timeout: ctx.stop_timeout,
        };
        let driver = SlotDriver {
            shared,
            ctx,
            requests: request_rx,
            notices: notice_rx,
        };
        (controller, tokio::spawn(driver.run()))
    }

    pub fn slot(&self) -> usize {
        self.shared.slot
    }

    pub async fn start_live(
        &self,
        device_id: DeviceId,
        channel: u32,
        params: StreamParams,
    ) -> Result<()> {
        self.request(|reply| Request::StartLive {
            device_id,
            channel,
            params,
            reply,
        })
        .await?
    }

    /// Close the current stream and go idle. Close failures are logged, never
    /// returned. With `keep_binding == false` the saved live binding and the
    /// selection flag are cleared as well.
    ///
    /// If the driver does not get through the stop in time (stuck behind a
    /// hanging open, say) the slot is force-reset instead.
    pub async fn stop(&self, keep_binding: bool) {
        if tokio::time::timeout(self.stop_timeout, self.request_stop(keep_binding))
            .await
            .is_ok()
        {
            return;
        }
        self.force_reset("stop deadline exceeded");
        if !keep_binding {
            let was_selected = {
                let mut state = self.shared.lock();
                let was_selected = state.session.selected;
                state.session.forget_binding();
                was_selected
            };
            if was_selected {
                self.events.emit(StationEvent::SelectionChanged { slot: None });
            }
        }
    }

    /// Queue a stop and wait for the driver to confirm it, without a deadline.
    pub(crate) async fn request_stop(&self, keep_binding: bool) {
        let (reply, rx) = oneshot::channel();
        if self.requests.send(Request::Stop { keep_binding, reply }).await.is_err() {
            debug!(slot = self.slot(), "stop on closed controller");
            return;
        }
        let _ = rx.await;
    }

    pub async fn switch_to_playback(&self, range: TimeRange) -> Result<PlaybackStarted> {
        self.request(|reply| Request::SwitchToPlayback { range, reply }).await?
    }

    pub async fn switch_to_live(&self) -> Result<()> {
        self.request(|reply| Request::SwitchToLive { reply }).await?
    }

    pub async fn playback_control(&self, command: PlaybackCommand) -> Result<()> {
        self.request(|reply| Request::Transport { command, reply }).await?
    }

    /// Blank the slot's surface, in order with other requests.
    pub async fn refresh_display(&self) -> Result<()> {
        self.request(|reply| Request::RefreshDisplay { reply }).await
    }

    /// Make the slot idle now, without waiting for the driver or the SDK.
    ///
    /// The stream guard is dropped (its close continues in the background,
    /// bounded) and any in-flight operation is aborted.
    pub fn force_reset(&self, reason: &str) {
        let (stream, was_active) = {
            let mut state = self.shared.lock();
            state.epoch += 1;
            state.token.cancel();
            let was_active = state.session.has_active_content;
            state.session.enter_idle();
            (state.stream.take(), was_active)
        };
        warn!(
            slot = self.slot(),
            stream = ?stream.as_ref().map(OwnedStream::id),
            reason,
            "forced slot reset"
        );
        drop(stream);
        self.surfaces.clear(self.slot());
        if was_active {
            self.events.emit(StationEvent::ModeChanged {
                slot: self.slot(),
                mode: SessionMode::Idle,
            });
        }
    }

    /// Ask the driver to close its stream and exit.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.requests.send(Request::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub(crate) fn set_selected(&self, selected: bool) {
        self.shared.lock().session.selected = selected;
    }

    pub fn session(&self) -> Session {
        self.shared.lock().session.clone()
    }

    pub fn mode(&self) -> SessionMode {
        self.shared.lock().session.mode
    }

    pub fn phase(&self) -> SlotPhase {
        self.shared.lock().session.phase
    }

    pub fn selected(&self) -> bool {
        self.shared.lock().session.selected
    }

    pub fn has_active_content(&self) -> bool {
        self.shared.lock().session.has_active_content
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.requests.try_send(build(reply)).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SessionError::OperationAlreadyInFlight,
            mpsc::error::TrySendError::Closed(_) => SessionError::ControllerClosed,
        })?;
        rx.await.map_err(|_| SessionError::ControllerClosed)
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("slot", &self.shared.slot)
            .finish_non_exhaustive()
    }
}

/// Epoch and cancellation token captured at the start of one operation
struct Op {
    epoch: u64,
    token: CancellationToken,
}

/// Race `fut` against a forced reset.
async fn guarded<F: Future>(op: &Op, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = op.token.cancelled() => Err(SessionError::Aborted),
        out = fut => Ok(out),
    }
}

struct SlotDriver {
    shared: Arc<Shared>,
    ctx: Arc<SlotContext>,
    requests: mpsc::Receiver<Request>,
    notices: mpsc::UnboundedReceiver<StreamNotice>,
}

impl SlotDriver {
    async fn run(mut self) {
        let slot = self.shared.slot;
        debug!(slot, "slot driver started");
        loop {
            tokio::select! {
                biased;
                Some(notice) = self.notices.recv() => self.on_notice(notice),
                request = self.requests.recv() => match request {
                    Some(Request::Shutdown { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(request) => self.handle(request).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
            }
        }
        debug!(slot, "slot driver exited");
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::StartLive {
                device_id,
                channel,
                params,
                reply,
            } => {
                let result = self.start_live(device_id, channel, params).await;
                let _ = reply.send(result);
            }
            Request::Stop { keep_binding, reply } => {
                self.stop(keep_binding).await;
                let _ = reply.send(());
            }
            Request::SwitchToPlayback { range, reply } => {
                let result = self.switch_to_playback(range).await;
                let _ = reply.send(result);
            }
            Request::SwitchToLive { reply } => {
                let result = self.switch_to_live().await;
                let _ = reply.send(result);
            }
            Request::Transport { command, reply } => {
                let result = self.transport(command).await;
                let _ = reply.send(result);
            }
            Request::RefreshDisplay { reply } => {
                self.ctx.surfaces.clear(self.shared.slot);
                let _ = reply.send(());
            }
            Request::Shutdown { reply } => {
                self.teardown().await;
                let _ = reply.send(());
            }
        }
    }

    fn slot(&self) -> usize {
        self.shared.slot
    }

    fn begin_op(&self) -> Op {
        let mut state = self.shared.lock();
        if state.token.is_cancelled() {
            state.token = CancellationToken::new();
        }
        Op {
            epoch: state.epoch,
            token: state.token.clone(),
        }
    }

    fn emit_mode(&self, mode: SessionMode) {
        self.ctx.events.emit(StationEvent::ModeChanged { slot: self.slot(), mode });
    }

    fn set_phase(&self, op: &Op, phase: SlotPhase) -> Result<()> {
        self.shared
            .commit(op.epoch, |state| state.session.phase = phase)
            .ok_or(SessionError::Aborted)
    }

    /// Leave the slot idle and blank after a failed open.
    fn settle_idle(&self, op: &Op) {
        self.shared.commit(op.epoch, |state| state.session.enter_idle());
        self.ctx.surfaces.clear(self.slot());
    }

    /// Close whatever stream the slot holds, bounded by the close timeout.
    /// The surface is blanked and the session idle before the SDK is asked to
    /// close; the surface is blanked again once the close settles.
    async fn close_current(&self, op: &Op) -> Result<()> {
        let slot = self.slot();
        if self.shared.lock().stream.is_some() {
            self.ctx.surfaces.clear(slot);
        }
        let taken = self
            .shared
            .commit(op.epoch, |state| {
                let stream = state.stream.take();
                if stream.is_some() {
                    state.session.enter_idle();
                    state.session.phase = SlotPhase::Stopping;
                }
                stream
            })
            .ok_or(SessionError::Aborted)?;
        let Some(stream) = taken else {
            return Ok(());
        };

        let id = stream.id();
        let role = stream.role();
        let outcome = tokio::select! {
            biased;
            _ = op.token.cancelled() => None,
            outcome = stream.close() => Some(outcome),
        };
        match outcome {
            Some(CloseOutcome::Closed) => debug!(slot, stream = %id, ?role, "stream closed"),
            Some(CloseOutcome::Refused) => {
                warn!(slot, stream = %id, ?role, "SDK refused close, handle abandoned")
            }
            Some(CloseOutcome::TimedOut) => {
                warn!(slot, stream = %id, ?role, "close timed out, handle abandoned")
            }
            None => debug!(slot, stream = %id, "close abandoned by forced reset"),
        }

        self.ctx.surfaces.clear(slot);
        self.shared.commit(op.epoch, |state| state.session.phase = SlotPhase::Idle);
        self.emit_mode(SessionMode::Idle);
        Ok(())
    }

    async fn start_live(
        &mut self,
        device_id: DeviceId,
        channel: u32,
        params: StreamParams,
    ) -> Result<()> {
        let op = self.begin_op();
        self.close_current(&op).await?;
        self.set_phase(&op, SlotPhase::Starting)?;

        let result = self.resolve_and_open(&op, &device_id, channel, params).await;

        if let Err(err) = &result {
            warn!(
                slot = self.slot(),
                device = %device_id,
                channel,
                error = %err,
                "start_live failed"
            );
            if *err != SessionError::Aborted {
                self.settle_idle(&op);
            }
        }
        result.map(|_| ())
    }

    async fn resolve_and_open(
        &self,
        op: &Op,
        device_id: &DeviceId,
        channel: u32,
        params: StreamParams,
    ) -> Result<StreamId> {
        let device = guarded(op, self.ctx.registry.resolve_device(device_id))
            .await?
            .ok_or_else(|| SessionError::DeviceNotFound(device_id.clone()))?;
        self.open_live_on(op, device, channel, params).await
    }

    async fn open_live_on(
        &self,
        op: &Op,
        device: DeviceInfo,
        channel: u32,
        params: StreamParams,
    ) -> Result<StreamId> {
        if !device.connected {
            return Err(SessionError::DeviceOffline(device.id));
        }

        let slot = self.slot();
        let sink = self.ctx.router.sink(slot);
        let surface = self.ctx.surfaces.surface(slot);
        let id = guarded(op, self.ctx.sdk.open_live(&device, channel, &params, surface, sink))
            .await?
            .map_err(|code| SessionError::HandleAcquisitionFailed { code })?;

        let stream = OwnedStream::new(
            id,
            StreamRole::Live,
            Arc::clone(&self.ctx.sdk),
            self.ctx.close_timeout,
        );
        let binding = LiveBinding {
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            channel,
            params,
        };
        // A stale commit drops `stream`, which closes it.
        self.shared
            .commit(op.epoch, move |state| {
                state.session.enter_live(id, binding);
                state.stream = Some(stream);
            })
            .ok_or(SessionError::Aborted)?;

        info!(slot, stream = %id, device = %device.id, channel, "live started");
        self.emit_mode(SessionMode::Live);
        Ok(id)
    }

    /// Reopen live from a saved binding, following the device if it moved.
    async fn reopen_live(&self, op: &Op, binding: &LiveBinding) -> Result<StreamId> {
        let device = guarded(op, self.ctx.coordinator.resolve(binding)).await??;
        self.open_live_on(op, device, binding.channel, binding.params).await
    }

    async fn switch_to_playback(&mut self, requested: TimeRange) -> Result<PlaybackStarted> {
        let op = self.begin_op();
        let binding = {
            let state = self.shared.lock();
            if state.session.is_idle() {
                return Err(SessionError::NotLive);
            }
            state.session.saved_live_binding.clone().ok_or(SessionError::NotLive)?
        };

        // Nothing has been touched yet; plan failures leave the slot as is.
        let plan = guarded(&op, self.ctx.coordinator.plan(&binding, requested)).await??;
        if plan.device_moved(&binding) {
            info!(
                slot = self.slot(),
                from = %binding.device_id,
                to = %plan.device.id,
                "playback device resolved by name"
            );
        }

        self.close_current(&op).await?;
        self.set_phase(&op, SlotPhase::Starting)?;

        let slot = self.slot();
        let sink = self.ctx.router.sink(slot);
        let surface = self.ctx.surfaces.surface(slot);
        let opened = guarded(&op, self.ctx.coordinator.open(&plan, surface, sink))
            .await
            .and_then(|opened| opened);

        match opened {
            Ok(grant) => self.commit_playback(&op, grant),
            Err(SessionError::Aborted) => Err(SessionError::Aborted),
            Err(err) => {
                warn!(slot, error = %err, "playback open failed, restoring live");
                match self.reopen_live(&op, &binding).await {
                    Ok(stream) => {
                        info!(slot, stream = %stream, "live restored after failed playback")
                    }
                    Err(restore) => {
                        warn!(slot, error = %restore, "live restore failed, slot left idle");
                        if restore != SessionError::Aborted {
                            self.settle_idle(&op);
                        }
                    }
                }
                Err(err)
            }
        }
    }

    fn commit_playback(&self, op: &Op, grant: PlaybackGrant) -> Result<PlaybackStarted> {
        let PlaybackGrant {
            stream,
            device_id,
            device_name,
            channel,
            range,
            segments,
        } = grant;
        let id = stream.id();
        let resolved = device_id.clone();

        self.shared
            .commit(op.epoch, move |state| {
                state.session.enter_playback(id, resolved.clone(), channel, range);
                if let Some(binding) = state.session.saved_live_binding.as_mut() {
                    if binding.device_id != resolved {
                        binding.device_id = resolved;
                        binding.device_name = device_name;
                    }
                }
                state.stream = Some(stream);
            })
            .ok_or(SessionError::Aborted)?;

        info!(slot = self.slot(), stream = %id, device = %device_id, "playback started");
        self.emit_mode(SessionMode::Playback);
        Ok(PlaybackStarted {
            stream: id,
            device_id,
            range,
            segments: segments.len(),
        })
    }

    async fn switch_to_live(&mut self) -> Result<()> {
        let op = self.begin_op();
        let binding = {
            let state = self.shared.lock();
            if state.session.mode != SessionMode::Playback {
                return Err(SessionError::NotInPlaybackMode);
            }
            state.session.saved_live_binding.clone().ok_or(SessionError::NotLive)?
        };

        self.close_current(&op).await?;
        self.set_phase(&op, SlotPhase::Starting)?;

        match self.reopen_live(&op, &binding).await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(slot = self.slot(), error = %err, "switch to live failed, slot left idle");
                if err != SessionError::Aborted {
                    self.settle_idle(&op);
                }
                Err(err)
            }
        }
    }

    async fn transport(&mut self, command: PlaybackCommand) -> Result<()> {
        let op = self.begin_op();
        let stream = {
            let state = self.shared.lock();
            match state.session.mode {
                SessionMode::Playback => state.session.native_handle,
                _ => None,
            }
        };
        guarded(&op, self.ctx.coordinator.transport(stream, command)).await?
    }

    async fn stop(&mut self, keep_binding: bool) {
        let op = self.begin_op();
        if let Err(err) = self.close_current(&op).await {
            debug!(slot = self.slot(), error = %err, "stop raced a forced reset");
        }
        self.ctx.surfaces.clear(self.slot());

        if !keep_binding {
            let was_selected = {
                let mut state = self.shared.lock();
                let was_selected = state.session.selected;
                state.session.forget_binding();
                was_selected
            };
            if was_selected {
                self.ctx.events.emit(StationEvent::SelectionChanged { slot: None });
            }
        }
    }

    async fn teardown(&mut self) {
        self.stop(true).await;
    }

    fn on_notice(&mut self, notice: StreamNotice) {
        let slot = self.slot();
        match notice.event {
            StreamEvent::Closed => {
                let released = {
                    let mut state = self.shared.lock();
                    match state.stream.as_ref() {
                        Some(stream) if stream.id() == notice.stream => {
                            state.session.enter_idle();
                            state.stream.take()
                        }
                        _ => None,
                    }
                };
                match released {
                    Some(stream) => {
                        info!(
                            slot,
                            stream = %notice.stream,
                            role = ?stream.role(),
                            "stream closed by device"
                        );
                        stream.forget();
                        self.ctx.surfaces.clear(slot);
                        self.emit_mode(SessionMode::Idle);
                    }
                    None => debug!(
                        slot,
                        stream = %notice.stream,
                        "ignoring close of a stream this slot does not own"
                    ),
                }
            }
            StreamEvent::Error { code } => {
                warn!(slot, stream = %notice.stream, code = %code, "stream error reported by SDK");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::layout::LayoutClock;
    use crate::sim::{RecordingSurfaceHost, SimFaults, SimulatedSdk};
    use crate::types::{RecordSegment, SdkCode};

    struct Fixture {
        sdk: Arc<SimulatedSdk>,
        surfaces: Arc<RecordingSurfaceHost>,
        events: EventBus,
        controller: SessionController,
        _driver: JoinHandle<()>,
    }

    fn range(a: u32, b: u32) -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 6, 1, a, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 1, b, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn fixture() -> Fixture {
        let sdk = Arc::new(SimulatedSdk::new());
        sdk.add_device("cam1", "Lobby");
        let r = range(1, 5);
        sdk.add_recording("cam1", 0, RecordSegment { start: r.start, end: r.end });

        let surfaces = Arc::new(RecordingSurfaceHost::new());
        let clock = Arc::new(LayoutClock::new());
        let router = Arc::new(CallbackRouter::new(clock.clone()));
        router.reset(clock.bump());
        let events = EventBus::new(64);
        let close_timeout = Duration::from_millis(50);

        let ctx = Arc::new(SlotContext {
            registry: sdk.clone(),
            sdk: sdk.clone(),
            coordinator: Arc::new(PlaybackCoordinator::new(
                sdk.clone(),
                sdk.clone(),
                close_timeout,
            )),
            surfaces: surfaces.clone(),
            router,
            events: events.clone(),
            close_timeout,
            stop_timeout: Duration::from_millis(200),
            inbox_capacity: 4,
        });
        let (controller, driver) = SessionController::spawn(0, ctx);
        Fixture {
            sdk,
            surfaces,
            events,
            controller,
            _driver: driver,
        }
    }

    #[tokio::test]
    async fn test_start_live_and_stop() {
        let fx = fixture();
        let mut events = fx.events.subscribe();

        fx.controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();
        let session = fx.controller.session();
        assert_eq!(session.mode, SessionMode::Live);
        assert!(session.is_consistent());
        assert_eq!(fx.sdk.open_streams().len(), 1);

        fx.controller.stop(true).await;
        let session = fx.controller.session();
        assert!(session.is_idle());
        assert!(session.saved_live_binding.is_some());
        assert!(fx.sdk.open_streams().is_empty());
        assert!(fx.surfaces.clear_count(0) >= 1);

        assert_eq!(
            events.recv().await.unwrap(),
            StationEvent::ModeChanged { slot: 0, mode: SessionMode::Live }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StationEvent::ModeChanged { slot: 0, mode: SessionMode::Idle }
        );
    }

    #[tokio::test]
    async fn test_start_live_errors() {
        let fx = fixture();

        let err = fx
            .controller
            .start_live(DeviceId::from("nope"), 0, StreamParams::default())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::DeviceNotFound(DeviceId::from("nope")));

        fx.sdk.set_connected("cam1", false);
        let err = fx
            .controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::DeviceOffline(DeviceId::from("cam1")));

        fx.sdk.set_connected("cam1", true);
        fx.sdk.update_faults(|f| f.fail_live = Some(SdkCode(12)));
        let err = fx
            .controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::HandleAcquisitionFailed { code: SdkCode(12) });

        let session = fx.controller.session();
        assert!(session.is_idle());
        assert_eq!(session.phase, SlotPhase::Idle);
        assert!(session.is_consistent());
    }

    #[tokio::test]
    async fn test_restart_closes_previous_stream() {
        let fx = fixture();
        fx.controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();
        let first = fx.controller.session().native_handle.unwrap();

        fx.controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();
        let second = fx.controller.session().native_handle.unwrap();

        assert_ne!(first, second);
        assert_eq!(fx.sdk.close_count(first), 1);
        assert_eq!(fx.sdk.open_streams().len(), 1);
    }

    #[tokio::test]
    async fn test_switch_requires_content() {
        let fx = fixture();
        assert_eq!(
            fx.controller.switch_to_playback(range(1, 2)).await,
            Err(SessionError::NotLive)
        );
        assert_eq!(fx.controller.switch_to_live().await, Err(SessionError::NotInPlaybackMode));
        assert_eq!(
            fx.controller.playback_control(PlaybackCommand::Pause).await,
            Err(SessionError::NotInPlaybackMode)
        );
    }

    #[tokio::test]
    async fn test_playback_open_failure_restores_live() {
        let fx = fixture();
        fx.controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();
        fx.sdk.update_faults(|f| f.fail_playback = Some(SdkCode(5)));

        let err = fx.controller.switch_to_playback(range(1, 2)).await.unwrap_err();
        assert_eq!(err, SessionError::HandleAcquisitionFailed { code: SdkCode(5) });

        let session = fx.controller.session();
        assert_eq!(session.mode, SessionMode::Live);
        assert!(session.is_consistent());
        assert_eq!(fx.sdk.open_streams().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_restore_leaves_idle() {
        let fx = fixture();
        fx.controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();
        fx.sdk.set_faults(SimFaults {
            fail_playback: Some(SdkCode(5)),
            fail_live: Some(SdkCode(6)),
            ..SimFaults::default()
        });

        let err = fx.controller.switch_to_playback(range(1, 2)).await.unwrap_err();
        assert_eq!(err, SessionError::HandleAcquisitionFailed { code: SdkCode(5) });

        let session = fx.controller.session();
        assert!(session.is_idle());
        assert!(session.is_consistent());
        assert!(fx.sdk.open_streams().is_empty());
    }

    #[tokio::test]
    async fn test_force_reset_aborts_hanging_open() {
        let fx = fixture();
        fx.sdk.update_faults(|f| f.hang_open = true);

        let controller = fx.controller.clone();
        let pending = tokio::spawn(async move {
            controller
                .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fx.controller.phase(), SlotPhase::Starting);

        fx.controller.force_reset("test");
        assert_eq!(pending.await.unwrap(), Err(SessionError::Aborted));
        assert!(fx.controller.session().is_consistent());

        // the driver is usable again
        fx.sdk.update_faults(|f| f.hang_open = false);
        fx.controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();
        assert_eq!(fx.controller.mode(), SessionMode::Live);
    }

    #[tokio::test]
    async fn test_hanging_close_is_bounded() {
        let fx = fixture();
        fx.controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();
        fx.sdk.update_faults(|f| f.hang_close = true);

        let started = std::time::Instant::now();
        fx.controller.stop(true).await;
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(fx.controller.session().is_idle());
    }

    #[tokio::test]
    async fn test_surface_blank_while_close_pending() {
        let fx = fixture();
        fx.controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();
        let before = fx.surfaces.clear_count(0);
        fx.sdk.update_faults(|f| f.hang_close = true);

        let stopping = {
            let controller = fx.controller.clone();
            tokio::spawn(async move { controller.stop(true).await })
        };
        for _ in 0..100 {
            if fx.controller.phase() == SlotPhase::Stopping {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(fx.controller.phase(), SlotPhase::Stopping);
        assert!(fx.controller.session().native_handle.is_none());
        assert!(fx.surfaces.clear_count(0) > before);

        stopping.await.unwrap();
        assert!(fx.surfaces.clear_count(0) >= before + 2);
    }

    #[tokio::test]
    async fn test_inbox_full_reports_in_flight() {
        let fx = fixture();
        fx.sdk.update_faults(|f| f.hang_open = true);

        let spawn_start = |controller: SessionController| {
            tokio::spawn(async move {
                controller
                    .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
                    .await
            })
        };
        let mut pending = vec![spawn_start(fx.controller.clone())];
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fx.controller.phase(), SlotPhase::Starting);

        for _ in 0..4 {
            pending.push(spawn_start(fx.controller.clone()));
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // one in flight, four queued: the inbox is full
        assert_eq!(
            fx.controller.switch_to_live().await,
            Err(SessionError::OperationAlreadyInFlight)
        );
        fx.sdk.update_faults(|f| f.hang_open = false);
        fx.controller.force_reset("test");
        fx.controller.shutdown().await;
        for task in pending {
            let _ = task.await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_stream() {
        let fx = fixture();
        fx.controller
            .start_live(DeviceId::from("cam1"), 0, StreamParams::default())
            .await
            .unwrap();
        fx.controller.shutdown().await;

        assert!(fx.sdk.open_streams().is_empty());
        assert_eq!(
            fx.controller.start_live(DeviceId::from("cam1"), 0, StreamParams::default()).await,
            Err(SessionError::ControllerClosed)
        );
    }
}
