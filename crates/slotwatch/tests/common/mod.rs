#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use slotconf::SlotwatchConfig;
use slotwatch::sim::{RecordingSurfaceHost, SimulatedSdk};
use slotwatch::{Collaborators, RecordSegment, SlotPool, TimeRange};

pub struct Station {
    pub sdk: Arc<SimulatedSdk>,
    pub surfaces: Arc<RecordingSurfaceHost>,
    pub pool: SlotPool,
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 14, hour, 0, 0).unwrap()
}

pub fn range(from: u32, to: u32) -> TimeRange {
    TimeRange::new(at(from), at(to)).unwrap()
}

pub fn config() -> SlotwatchConfig {
    let mut config = SlotwatchConfig::default();
    config.infra.display.width = 1600;
    config.infra.display.height = 900;
    config.orchestration.max_slots = 16;
    config.orchestration.close_timeout_ms = 100;
    config.orchestration.teardown_timeout_ms = 200;
    config
}

/// Station with cam1..cam4 registered, each with recordings 08:00-12:00 on channel 0.
pub fn station_with(config: SlotwatchConfig) -> Station {
    let sdk = Arc::new(SimulatedSdk::new());
    for i in 1..=4 {
        let id = format!("cam{i}");
        sdk.add_device(id.as_str(), format!("Camera {i}"));
        sdk.add_recording(&id, 0, RecordSegment { start: at(8), end: at(12) });
    }
    let surfaces = Arc::new(RecordingSurfaceHost::new());
    let collaborators = Collaborators::new(sdk.clone(), sdk.clone(), surfaces.clone());
    let pool = SlotPool::new(collaborators, &config);
    Station { sdk, surfaces, pool }
}

pub fn station() -> Station {
    station_with(config())
}

/// Poll `check` until it holds or about a second has passed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Number of slots whose selected flag is set.
pub fn selected_count(pool: &SlotPool) -> usize {
    pool.status().slots.iter().filter(|s| s.selected).count()
}
