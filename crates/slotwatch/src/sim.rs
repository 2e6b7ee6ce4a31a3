//! In-process simulated device SDK and display host.
//!
//! `SimulatedSdk` implements both [`DeviceRegistry`] and [`DeviceSdk`] over
//! an in-memory device table and recording catalog, with knobs to inject the
//! failures a real station sees: offline devices, null handles, closes and
//! opens that never return, refused transport commands, and streams the
//! device closes on its own. Asynchronous events are emitted from a plain OS
//! thread, the way vendor SDK callbacks arrive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::layout::{Placement, SurfaceHost};
use crate::router::{StreamEvent, StreamEventSink};
use crate::sdk::{DeviceInfo, DeviceRegistry, DeviceSdk};
use crate::types::{
    DeviceId, PlaybackCommand, RecordSegment, SdkCode, StreamId, StreamParams, SurfaceId,
    TimeRange,
};

/// Failure injection switches
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// `close` never completes.
    pub hang_close: bool,
    /// `close` completes and reports failure.
    pub refuse_close: bool,
    /// `open_live`/`open_playback` never complete.
    pub hang_open: bool,
    pub fail_live: Option<SdkCode>,
    pub fail_playback: Option<SdkCode>,
    pub refuse_transport: bool,
    /// Latency added to every open.
    pub open_delay: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStreamKind {
    Live,
    Playback,
}

#[derive(Debug, Clone)]
pub struct SimStream {
    pub id: StreamId,
    pub kind: SimStreamKind,
    pub device_id: DeviceId,
    pub channel: u32,
    pub surface: SurfaceId,
    sink: StreamEventSink,
}

#[derive(Debug, Clone)]
struct SimDevice {
    info: DeviceInfo,
    recordings: HashMap<u32, Vec<RecordSegment>>,
}

#[derive(Debug, Default)]
struct SimState {
    devices: HashMap<DeviceId, SimDevice>,
    open: HashMap<StreamId, SimStream>,
    close_calls: Vec<StreamId>,
    transport_log: Vec<(StreamId, PlaybackCommand)>,
    faults: SimFaults,
}

#[derive(Debug, Default)]
pub struct SimulatedSdk {
    state: Mutex<SimState>,
    next_stream: AtomicU64,
}

impl SimulatedSdk {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connected device.
    pub fn add_device(&self, id: impl Into<String>, name: impl Into<String>) {
        let id = DeviceId::new(id);
        let info = DeviceInfo {
            id: id.clone(),
            name: name.into(),
            connected: true,
        };
        self.lock().devices.insert(
            id,
            SimDevice {
                info,
                recordings: HashMap::new(),
            },
        );
    }

    pub fn set_connected(&self, id: &str, connected: bool) {
        if let Some(device) = self.lock().devices.get_mut(&DeviceId::from(id)) {
            device.info.connected = connected;
        }
    }

    /// Re-register a device under a new id, keeping its name and recordings.
    pub fn reregister(&self, old: &str, new: &str) -> bool {
        let mut state = self.lock();
        match state.devices.remove(&DeviceId::from(old)) {
            Some(mut device) => {
                device.info.id = DeviceId::from(new);
                state.devices.insert(DeviceId::from(new), device);
                true
            }
            None => false,
        }
    }

    pub fn add_recording(&self, id: &str, channel: u32, segment: RecordSegment) {
        if let Some(device) = self.lock().devices.get_mut(&DeviceId::from(id)) {
            device.recordings.entry(channel).or_default().push(segment);
        }
    }

    pub fn set_faults(&self, faults: SimFaults) {
        self.lock().faults = faults;
    }

    pub fn update_faults(&self, f: impl FnOnce(&mut SimFaults)) {
        f(&mut self.lock().faults);
    }

    pub fn open_streams(&self) -> Vec<SimStream> {
        let mut streams: Vec<_> = self.lock().open.values().cloned().collect();
        streams.sort_by_key(|s| s.id.0);
        streams
    }

    pub fn is_open(&self, stream: StreamId) -> bool {
        self.lock().open.contains_key(&stream)
    }

    pub fn close_calls(&self) -> Vec<StreamId> {
        self.lock().close_calls.clone()
    }

    pub fn close_count(&self, stream: StreamId) -> usize {
        self.lock().close_calls.iter().filter(|s| **s == stream).count()
    }

    pub fn transport_log(&self) -> Vec<(StreamId, PlaybackCommand)> {
        self.lock().transport_log.clone()
    }

    /// Close `stream` on the device side and report it through its sink from
    /// a foreign thread. Returns whether the router accepted the notice.
    pub fn drop_stream(&self, stream: StreamId) -> bool {
        let removed = self.lock().open.remove(&stream);
        match removed {
            Some(s) => Self::emit_from_thread(s.sink, stream, StreamEvent::Closed),
            None => false,
        }
    }

    /// Report a non-fatal error on `stream`.
    pub fn emit_error(&self, stream: StreamId, code: SdkCode) -> bool {
        let sink = self.lock().open.get(&stream).map(|s| s.sink.clone());
        match sink {
            Some(sink) => Self::emit_from_thread(sink, stream, StreamEvent::Error { code }),
            None => false,
        }
    }

    /// Emit through a sink captured earlier, bypassing the open table.
    pub fn emit_through(sink: StreamEventSink, stream: StreamId, event: StreamEvent) -> bool {
        Self::emit_from_thread(sink, stream, event)
    }

    /// Sink the simulator holds for an open stream.
    pub fn sink_of(&self, stream: StreamId) -> Option<StreamEventSink> {
        self.lock().open.get(&stream).map(|s| s.sink.clone())
    }

    fn emit_from_thread(sink: StreamEventSink, stream: StreamId, event: StreamEvent) -> bool {
        std::thread::spawn(move || sink.emit(stream, event))
            .join()
            .unwrap_or(false)
    }

    fn register_stream(
        &self,
        kind: SimStreamKind,
        device: &DeviceInfo,
        channel: u32,
        surface: SurfaceId,
        sink: StreamEventSink,
    ) -> StreamId {
        let id = StreamId(self.next_stream.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock().open.insert(
            id,
            SimStream {
                id,
                kind,
                device_id: device.id.clone(),
                channel,
                surface,
                sink,
            },
        );
        debug!(stream = %id, device = %device.id, channel, ?kind, "sim stream opened");
        id
    }

    async fn open_latency(&self) {
        let (hang, delay) = {
            let state = self.lock();
            (state.faults.hang_open, state.faults.open_delay)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DeviceRegistry for SimulatedSdk {
    async fn resolve_device(&self, id: &DeviceId) -> Option<DeviceInfo> {
        self.lock().devices.get(id).map(|d| d.info.clone())
    }

    async fn resolve_device_by_name(&self, name: &str) -> Option<DeviceInfo> {
        self.lock()
            .devices
            .values()
            .find(|d| d.info.name == name)
            .map(|d| d.info.clone())
    }
}

#[async_trait]
impl DeviceSdk for SimulatedSdk {
    async fn open_live(
        &self,
        device: &DeviceInfo,
        channel: u32,
        params: &StreamParams,
        surface: SurfaceId,
        sink: StreamEventSink,
    ) -> Result<StreamId, SdkCode> {
        self.open_latency().await;
        if let Some(code) = self.lock().faults.fail_live {
            return Err(code);
        }
        trace!(device = %device.id, ?params, "sim open_live");
        Ok(self.register_stream(SimStreamKind::Live, device, channel, surface, sink))
    }

    async fn close(&self, stream: StreamId) -> bool {
        let (hang, refuse) = {
            let mut state = self.lock();
            state.close_calls.push(stream);
            (state.faults.hang_close, state.faults.refuse_close)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if refuse {
            return false;
        }
        self.lock().open.remove(&stream).is_some()
    }

    async fn query_recordings(
        &self,
        device: &DeviceInfo,
        channel: u32,
        range: &TimeRange,
    ) -> Vec<RecordSegment> {
        let state = self.lock();
        state
            .devices
            .get(&device.id)
            .and_then(|d| d.recordings.get(&channel))
            .map(|segments| segments.iter().filter(|s| range.overlaps(s)).copied().collect())
            .unwrap_or_default()
    }

    async fn open_playback(
        &self,
        device: &DeviceInfo,
        channel: u32,
        _range: &TimeRange,
        surface: SurfaceId,
        sink: StreamEventSink,
    ) -> Result<StreamId, SdkCode> {
        self.open_latency().await;
        if let Some(code) = self.lock().faults.fail_playback {
            return Err(code);
        }
        Ok(self.register_stream(SimStreamKind::Playback, device, channel, surface, sink))
    }

    async fn playback_control(&self, stream: StreamId, command: PlaybackCommand) -> bool {
        let mut state = self.lock();
        let accepted = !state.faults.refuse_transport
            && state
                .open
                .get(&stream)
                .is_some_and(|s| s.kind == SimStreamKind::Playback);
        if accepted {
            state.transport_log.push((stream, command));
        }
        accepted
    }
}

/// One call received by [`RecordingSurfaceHost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceOp {
    Place { slot: usize, placement: Placement },
    Clear { slot: usize },
}

/// Surface host that remembers every call, for assertions.
#[derive(Debug, Default)]
pub struct RecordingSurfaceHost {
    ops: Mutex<Vec<SurfaceOp>>,
}

impl RecordingSurfaceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<SurfaceOp> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Most recent placement of `slot`.
    pub fn placement(&self, slot: usize) -> Option<Placement> {
        self.ops().into_iter().rev().find_map(|op| match op {
            SurfaceOp::Place { slot: s, placement } if s == slot => Some(placement),
            _ => None,
        })
    }

    pub fn clear_count(&self, slot: usize) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, SurfaceOp::Clear { slot: s } if *s == slot))
            .count()
    }
}

impl SurfaceHost for RecordingSurfaceHost {
    fn surface(&self, slot: usize) -> SurfaceId {
        SurfaceId(1000 + slot as u64)
    }

    fn place(&self, slot: usize, placement: Placement) {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SurfaceOp::Place { slot, placement });
    }

    fn clear(&self, slot: usize) {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SurfaceOp::Clear { slot });
    }
}
