//! Error taxonomy for session orchestration.
//!
//! Expected conditions (offline device, empty recording range, busy slot) are
//! ordinary values of [`SessionError`]; nothing in this crate panics for them.
//! Teardown paths never produce errors at all - close failures are logged and
//! the slot is forced consistent.

use thiserror::Error;

use crate::types::{DeviceId, PlaybackCommand, SdkCode};

/// Errors returned by slot, pool and playback operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("device {0} is offline")]
    DeviceOffline(DeviceId),

    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("SDK returned no stream handle (code {code})")]
    HandleAcquisitionFailed { code: SdkCode },

    #[error("no recordings in the requested range")]
    NoRecordingFound,

    #[error("slot has no open playback stream")]
    NotInPlaybackMode,

    #[error("slot is not showing live content")]
    NotLive,

    #[error("slot index {index} out of range (pool has {len} slots)")]
    InvalidSlotIndex { index: usize, len: usize },

    #[error("slot request queue is full")]
    OperationAlreadyInFlight,

    #[error("time range is empty or inverted")]
    InvalidTimeRange,

    #[error("playback command {0:?} was refused")]
    TransportCommandFailed(PlaybackCommand),

    #[error("slot {0} has no active content")]
    NoActiveContent(usize),

    #[error("operation not allowed while the pool is {0}")]
    InvalidPoolState(&'static str),

    #[error("slot count {requested} not in 1..={max}")]
    InvalidSlotCount { requested: usize, max: usize },

    #[error("no idle slot available")]
    NoSlotAvailable,

    #[error("operation aborted by a forced slot reset")]
    Aborted,

    #[error("slot controller has shut down")]
    ControllerClosed,
}

impl SessionError {
    /// True for outcomes the UI should treat as normal rather than failures.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            SessionError::DeviceOffline(_)
                | SessionError::NoRecordingFound
                | SessionError::OperationAlreadyInFlight
                | SessionError::NoSlotAvailable
        )
    }
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
