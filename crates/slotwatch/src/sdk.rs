//! Device SDK boundary.
//!
//! The vendor SDK and the device registry are opaque collaborators. The
//! session layer reaches them only through these traits, injected as
//! `Arc<dyn …>` at pool construction; there is no process-wide registry.

use async_trait::async_trait;

use crate::router::StreamEventSink;
use crate::types::{
    DeviceId, PlaybackCommand, RecordSegment, SdkCode, StreamId, StreamParams, SurfaceId,
    TimeRange,
};

/// Registry view of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub connected: bool,
}

/// Read-only device lookup. The session layer never changes connection state.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn resolve_device(&self, id: &DeviceId) -> Option<DeviceInfo>;

    async fn resolve_device_by_name(&self, name: &str) -> Option<DeviceInfo>;
}

/// Stream operations of the vendor SDK.
///
/// `open_*` return `Err(code)` where the SDK would hand back a null handle.
/// Events for an opened stream (closure, errors) arrive later through the
/// sink, on whatever thread the SDK uses.
#[async_trait]
pub trait DeviceSdk: Send + Sync {
    async fn open_live(
        &self,
        device: &DeviceInfo,
        channel: u32,
        params: &StreamParams,
        surface: SurfaceId,
        sink: StreamEventSink,
    ) -> Result<StreamId, SdkCode>;

    /// Best-effort close. May never complete; callers bound it.
    async fn close(&self, stream: StreamId) -> bool;

    async fn query_recordings(
        &self,
        device: &DeviceInfo,
        channel: u32,
        range: &TimeRange,
    ) -> Vec<RecordSegment>;

    async fn open_playback(
        &self,
        device: &DeviceInfo,
        channel: u32,
        range: &TimeRange,
        surface: SurfaceId,
        sink: StreamEventSink,
    ) -> Result<StreamId, SdkCode>;

    async fn playback_control(&self, stream: StreamId, command: PlaybackCommand) -> bool;
}
