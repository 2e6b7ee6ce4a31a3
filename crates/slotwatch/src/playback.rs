//! Live to playback switching.
//!
//! The coordinator holds no state of its own. [`PlaybackCoordinator::plan`]
//! does everything that can fail without touching the slot (device lookup,
//! catalog query) so a slot only gives up its live stream once a playback
//! open is actually going to be attempted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::handle::{OwnedStream, StreamRole};
use crate::router::StreamEventSink;
use crate::sdk::{DeviceInfo, DeviceRegistry, DeviceSdk};
use crate::types::{
    DeviceId, LiveBinding, PlaybackCommand, RecordSegment, StreamId, SurfaceId, TimeRange,
};

/// Everything needed to open playback, gathered before the live stream is closed
#[derive(Debug, Clone)]
pub struct PlaybackPlan {
    pub device: DeviceInfo,
    pub channel: u32,
    pub requested: TimeRange,
    /// Requested range clipped to the span of the returned segments.
    pub range: TimeRange,
    pub segments: Vec<RecordSegment>,
}

impl PlaybackPlan {
    /// True when the device was found under a different id than the binding's.
    pub fn device_moved(&self, binding: &LiveBinding) -> bool {
        self.device.id != binding.device_id
    }
}

/// An opened playback stream together with what it was resolved against
#[derive(Debug)]
pub struct PlaybackGrant {
    pub stream: OwnedStream,
    pub device_id: DeviceId,
    pub device_name: String,
    pub channel: u32,
    pub range: TimeRange,
    pub segments: Vec<RecordSegment>,
}

pub struct PlaybackCoordinator {
    registry: Arc<dyn DeviceRegistry>,
    sdk: Arc<dyn DeviceSdk>,
    close_timeout: Duration,
}

impl PlaybackCoordinator {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        sdk: Arc<dyn DeviceSdk>,
        close_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sdk,
            close_timeout,
        }
    }

    /// Look the binding's device up by id, then by its last known name.
    pub async fn resolve(&self, binding: &LiveBinding) -> Result<DeviceInfo> {
        if let Some(device) = self.registry.resolve_device(&binding.device_id).await {
            return Ok(device);
        }

        warn!(
            device = %binding.device_id,
            name = %binding.device_name,
            "device id not registered, falling back to lookup by name"
        );
        match self.registry.resolve_device_by_name(&binding.device_name).await {
            Some(device) => {
                info!(
                    from = %binding.device_id,
                    to = %device.id,
                    name = %device.name,
                    "device resolved by name"
                );
                Ok(device)
            }
            None => {
                info!(
                    device = %binding.device_id,
                    name = %binding.device_name,
                    "name fallback found nothing"
                );
                Err(SessionError::DeviceNotFound(binding.device_id.clone()))
            }
        }
    }

    pub async fn plan(&self, binding: &LiveBinding, requested: TimeRange) -> Result<PlaybackPlan> {
        let device = self.resolve(binding).await?;
        if !device.connected {
            return Err(SessionError::DeviceOffline(device.id));
        }

        let mut segments: Vec<RecordSegment> = self
            .sdk
            .query_recordings(&device, binding.channel, &requested)
            .await
            .into_iter()
            .filter(|s| s.start < s.end && requested.overlaps(s))
            .collect();
        if segments.is_empty() {
            debug!(device = %device.id, channel = binding.channel, "no recordings in range");
            return Err(SessionError::NoRecordingFound);
        }
        segments.sort_by_key(|s| s.start);

        let span_start = segments.iter().map(|s| s.start).min().unwrap_or(requested.start);
        let span_end = segments.iter().map(|s| s.end).max().unwrap_or(requested.end);
        let range = TimeRange::new(requested.start.max(span_start), requested.end.min(span_end))?;
        debug!(
            device = %device.id,
            segments = segments.len(),
            minutes = range.duration().num_minutes(),
            "playback planned"
        );

        Ok(PlaybackPlan {
            device,
            channel: binding.channel,
            requested,
            range,
            segments,
        })
    }

    pub async fn open(
        &self,
        plan: &PlaybackPlan,
        surface: SurfaceId,
        sink: StreamEventSink,
    ) -> Result<PlaybackGrant> {
        let id = self
            .sdk
            .open_playback(&plan.device, plan.channel, &plan.range, surface, sink)
            .await
            .map_err(|code| SessionError::HandleAcquisitionFailed { code })?;

        info!(
            stream = %id,
            device = %plan.device.id,
            channel = plan.channel,
            segments = plan.segments.len(),
            "playback opened"
        );
        Ok(PlaybackGrant {
            stream: OwnedStream::new(
                id,
                StreamRole::Playback,
                Arc::clone(&self.sdk),
                self.close_timeout,
            ),
            device_id: plan.device.id.clone(),
            device_name: plan.device.name.clone(),
            channel: plan.channel,
            range: plan.range,
            segments: plan.segments.clone(),
        })
    }

    /// Send a transport command to the open playback stream, once.
    pub async fn transport(
        &self,
        stream: Option<StreamId>,
        command: PlaybackCommand,
    ) -> Result<()> {
        let stream = stream.ok_or(SessionError::NotInPlaybackMode)?;
        if self.sdk.playback_control(stream, command).await {
            debug!(stream = %stream, ?command, "transport command accepted");
            Ok(())
        } else {
            warn!(stream = %stream, ?command, "transport command refused");
            Err(SessionError::TransportCommandFailed(command))
        }
    }
}

impl std::fmt::Debug for PlaybackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackCoordinator")
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}
