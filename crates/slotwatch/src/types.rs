//! Domain types shared by the session layer and the SDK boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Identifier of a registered device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque handle of one open stream, as issued by the device SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Display surface a stream renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

/// Vendor error code attached to a failed SDK call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkCode(pub i32);

impl std::fmt::Display for SdkCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which encoder stream of a channel to pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamKind {
    #[default]
    Main,
    Sub,
}

/// Transport used for the media link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkMode {
    #[default]
    Tcp,
    Udp,
}

/// Decode/stream parameters remembered with a live binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamParams {
    pub stream_kind: StreamKind,
    pub link: LinkMode,
}

/// Everything needed to reopen a live feed without asking the user again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveBinding {
    pub device_id: DeviceId,
    /// Last name the device was known by; used when the id goes stale.
    pub device_name: String,
    pub channel: u32,
    pub params: StreamParams,
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SessionError> {
        if start >= end {
            return Err(SessionError::InvalidTimeRange);
        }
        Ok(Self { start, end })
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, segment: &RecordSegment) -> bool {
        segment.start < self.end && segment.end > self.start
    }
}

/// One recorded segment reported by the recording catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSegment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Transport command for an open playback stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackCommand {
    Pause,
    Resume,
    Fast,
    Slow,
    Normal,
    Seek(DateTime<Utc>),
}

/// What a slot is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionMode {
    #[default]
    Idle,
    Live,
    Playback,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Idle => "idle",
            SessionMode::Live => "live",
            SessionMode::Playback => "playback",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Position of a slot in its controller state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlotPhase {
    #[default]
    Idle,
    Starting,
    Live,
    Playback,
    Stopping,
}

impl SlotPhase {
    /// True while a transition is in flight.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, SlotPhase::Starting | SlotPhase::Stopping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_time_range_rejects_inverted() {
        assert_eq!(TimeRange::new(at(5), at(5)), Err(SessionError::InvalidTimeRange));
        assert_eq!(TimeRange::new(at(6), at(5)), Err(SessionError::InvalidTimeRange));
        assert!(TimeRange::new(at(5), at(6)).is_ok());
    }

    #[test]
    fn test_overlap_is_half_open() {
        let range = TimeRange::new(at(2), at(4)).unwrap();
        assert!(range.overlaps(&RecordSegment { start: at(3), end: at(5) }));
        assert!(!range.overlaps(&RecordSegment { start: at(4), end: at(5) }));
        assert!(!range.overlaps(&RecordSegment { start: at(0), end: at(2) }));
    }

    #[test]
    fn test_device_id_display() {
        assert_eq!(DeviceId::from("cam1").to_string(), "cam1");
        assert_eq!(StreamId(7).to_string(), "stream-7");
    }
}
