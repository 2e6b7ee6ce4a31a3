//! slotwatch: video session orchestration for a multi-camera viewing station.
//!
//! A station shows a grid of slots. Each slot plays a live feed or a recorded
//! range from some device, can be blown up to full screen, and can be pointed
//! at another device without disturbing its neighbours. This crate owns the
//! part with real concurrency requirements:
//!
//! - [`SlotPool`]: grid layout, selection, full screen, bounded teardown
//! - [`SessionController`]: one per slot, a serialized state machine over
//!   `Idle → Starting → Live ⇄ Playback → Stopping → Idle`
//! - [`PlaybackCoordinator`]: device resolution, recording lookup and
//!   playback open for live → playback switches
//!
//! The device SDK, device registry and display layer are injected through
//! [`DeviceSdk`], [`DeviceRegistry`] and [`SurfaceHost`]. SDK callbacks may
//! arrive on any thread; they are routed into the owning slot's inbox and
//! dropped if the slot they were opened for no longer exists.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use slotwatch::sim::{RecordingSurfaceHost, SimulatedSdk};
//! use slotwatch::{Collaborators, SlotPool, StreamParams};
//!
//! # async fn demo() -> slotwatch::Result<()> {
//! let sdk = Arc::new(SimulatedSdk::new());
//! sdk.add_device("cam1", "Lobby");
//! let surfaces = Arc::new(RecordingSurfaceHost::new());
//! let pool = SlotPool::new(
//!     Collaborators::new(sdk.clone(), sdk.clone(), surfaces),
//!     &slotconf::SlotwatchConfig::default(),
//! );
//!
//! pool.build(4).await?;
//! let slot = pool.open_live_on_available("cam1".into(), 0, StreamParams::default()).await?;
//! println!("live on slot {slot}");
//! pool.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod error;
pub mod events;
pub mod handle;
pub mod layout;
pub mod playback;
pub mod pool;
pub mod router;
pub mod sdk;
pub mod session;
pub mod sim;
pub mod telemetry;
pub mod types;

pub use controller::{PlaybackStarted, SessionController};
pub use error::{Result, SessionError};
pub use events::{EventBus, StationEvent};
pub use handle::{CloseOutcome, OwnedStream, StreamRole};
pub use layout::{GridLayout, LayoutClock, Placement, Rect, SurfaceHost};
pub use playback::{PlaybackCoordinator, PlaybackGrant, PlaybackPlan};
pub use pool::{Collaborators, PoolState, PoolStatus, SlotPool, TeardownReport};
pub use router::{CallbackRouter, StreamEvent, StreamEventSink, StreamNotice};
pub use sdk::{DeviceInfo, DeviceRegistry, DeviceSdk};
pub use session::Session;
pub use types::{
    DeviceId, LinkMode, LiveBinding, PlaybackCommand, RecordSegment, SdkCode, SessionMode,
    SlotPhase,
    StreamId, StreamKind, StreamParams, SurfaceId, TimeRange,
};
