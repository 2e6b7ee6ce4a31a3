//! Session - the observable state of one video slot.
//!
//! A `Session` is plain data. Only the slot's `SessionController` writes it;
//! everyone else reads cloned snapshots.

use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, LiveBinding, SessionMode, SlotPhase, StreamId, TimeRange};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub slot_index: usize,
    pub mode: SessionMode,
    pub phase: SlotPhase,
    pub device_id: Option<DeviceId>,
    pub channel: Option<u32>,
    pub native_handle: Option<StreamId>,
    pub selected: bool,
    pub has_active_content: bool,
    pub saved_live_binding: Option<LiveBinding>,
    pub playback_range: Option<TimeRange>,
}

impl Session {
    pub fn new(slot_index: usize) -> Self {
        Self {
            slot_index,
            mode: SessionMode::Idle,
            phase: SlotPhase::Idle,
            device_id: None,
            channel: None,
            native_handle: None,
            selected: false,
            has_active_content: false,
            saved_live_binding: None,
            playback_range: None,
        }
    }

    /// Record a freshly opened live stream.
    pub fn enter_live(&mut self, stream: StreamId, binding: LiveBinding) {
        self.mode = SessionMode::Live;
        self.phase = SlotPhase::Live;
        self.device_id = Some(binding.device_id.clone());
        self.channel = Some(binding.channel);
        self.native_handle = Some(stream);
        self.has_active_content = true;
        self.playback_range = None;
        self.saved_live_binding = Some(binding);
    }

    /// Record a freshly opened playback stream. The saved live binding is kept.
    pub fn enter_playback(
        &mut self,
        stream: StreamId,
        device_id: DeviceId,
        channel: u32,
        range: TimeRange,
    ) {
        self.mode = SessionMode::Playback;
        self.phase = SlotPhase::Playback;
        self.device_id = Some(device_id);
        self.channel = Some(channel);
        self.native_handle = Some(stream);
        self.has_active_content = true;
        self.playback_range = Some(range);
    }

    /// Drop content state. Binding and selection are left alone.
    pub fn enter_idle(&mut self) {
        self.mode = SessionMode::Idle;
        self.phase = SlotPhase::Idle;
        self.device_id = None;
        self.channel = None;
        self.native_handle = None;
        self.has_active_content = false;
        self.playback_range = None;
    }

    /// Clear what `stop(keep_binding = false)` forgets.
    pub fn forget_binding(&mut self) {
        self.saved_live_binding = None;
        self.selected = false;
    }

    /// Handle present iff content mode iff active content.
    pub fn is_consistent(&self) -> bool {
        let has_handle = self.native_handle.is_some();
        let content_mode = matches!(self.mode, SessionMode::Live | SessionMode::Playback);
        has_handle == content_mode && has_handle == self.has_active_content
    }

    pub fn is_idle(&self) -> bool {
        self.mode == SessionMode::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamParams;
    use chrono::{TimeZone, Utc};

    fn binding() -> LiveBinding {
        LiveBinding {
            device_id: DeviceId::new("cam1"),
            device_name: "Lobby".to_string(),
            channel: 2,
            params: StreamParams::default(),
        }
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = Session::new(3);
        assert_eq!(session.slot_index, 3);
        assert!(session.is_idle());
        assert!(session.is_consistent());
        assert!(!session.selected);
    }

    #[test]
    fn test_live_playback_live_keeps_binding() {
        let mut session = Session::new(0);
        session.enter_live(StreamId(1), binding());
        assert!(session.is_consistent());
        assert_eq!(session.channel, Some(2));

        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
        )
        .unwrap();
        session.enter_playback(StreamId(2), DeviceId::new("cam1"), 2, range);
        assert_eq!(session.mode, SessionMode::Playback);
        assert_eq!(session.saved_live_binding, Some(binding()));
        assert!(session.is_consistent());

        session.enter_idle();
        assert!(session.is_consistent());
        assert_eq!(session.saved_live_binding, Some(binding()));
    }

    #[test]
    fn test_forget_binding_clears_selection() {
        let mut session = Session::new(0);
        session.selected = true;
        session.enter_live(StreamId(1), binding());
        session.enter_idle();
        session.forget_binding();

        assert!(!session.selected);
        assert!(session.saved_live_binding.is_none());
    }

    #[test]
    fn test_inconsistent_states_detected() {
        let mut session = Session::new(0);
        session.mode = SessionMode::Live;
        assert!(!session.is_consistent());

        let mut session = Session::new(0);
        session.native_handle = Some(StreamId(5));
        assert!(!session.is_consistent());
    }
}
