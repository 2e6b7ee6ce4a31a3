//! Owned stream handles.
//!
//! An [`OwnedStream`] is the only way the session layer holds an SDK stream.
//! It is either closed explicitly with [`OwnedStream::close`], released with
//! [`OwnedStream::forget`] when the SDK already closed it, or - if dropped on
//! any other path - closed in a detached task. Each stream is closed at most
//! once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::sdk::DeviceSdk;
use crate::types::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Live,
    Playback,
}

/// Result of a bounded graceful close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// The SDK reported failure; the handle is abandoned regardless.
    Refused,
    /// The SDK did not answer in time; the handle is abandoned.
    TimedOut,
}

pub struct OwnedStream {
    id: StreamId,
    role: StreamRole,
    sdk: Arc<dyn DeviceSdk>,
    close_timeout: Duration,
    released: bool,
}

impl OwnedStream {
    pub fn new(
        id: StreamId,
        role: StreamRole,
        sdk: Arc<dyn DeviceSdk>,
        close_timeout: Duration,
    ) -> Self {
        Self {
            id,
            role,
            sdk,
            close_timeout,
            released: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Close through the SDK, waiting at most the configured timeout.
    pub async fn close(mut self) -> CloseOutcome {
        // Marked before awaiting: if this future is dropped mid-close, Drop
        // must not issue a second close.
        self.released = true;
        let sdk = Arc::clone(&self.sdk);
        match tokio::time::timeout(self.close_timeout, sdk.close(self.id)).await {
            Ok(true) => CloseOutcome::Closed,
            Ok(false) => CloseOutcome::Refused,
            Err(_) => CloseOutcome::TimedOut,
        }
    }

    /// The SDK closed this stream itself; release without calling close.
    pub fn forget(mut self) {
        self.released = true;
    }
}

impl std::fmt::Debug for OwnedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedStream")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for OwnedStream {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let sdk = Arc::clone(&self.sdk);
                let timeout = self.close_timeout;
                debug!(stream = %id, "closing dropped stream in background");
                runtime.spawn(async move {
                    match tokio::time::timeout(timeout, sdk.close(id)).await {
                        Ok(true) => debug!(stream = %id, "background close done"),
                        Ok(false) => warn!(stream = %id, "background close refused by SDK"),
                        Err(_) => warn!(
                            stream = %id,
                            "background close timed out; handle leaked at SDK level"
                        ),
                    }
                });
            }
            Err(_) => warn!(
                stream = %id,
                "stream dropped outside a runtime; handle leaked at SDK level"
            ),
        }
    }
}
