use web_time::Instant;

use arbor_core::Result;

use crate::scene::{Scene, TickReport};
use crate::surface::Surface;

/// Turns host timer callbacks into ticks with measured frame deltas.
#[derive(Debug)]
pub struct FrameTicker {
    last: Option<Instant>,
    max_dt: f32,
}

impl Default for FrameTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTicker {
    pub fn new() -> Self {
        Self {
            last: None,
            max_dt: 0.25,
        }
    }

    /// Caps the delta reported after a stall (seconds).
    pub fn with_max_dt(mut self, max_dt: f32) -> Self {
        self.max_dt = max_dt;
        self
    }

    /// Seconds since the previous call, `0.0` on the first.
    pub fn next_dt(&mut self) -> f32 {
        let now = Instant::now();
        let dt = self
            .last
            .map_or(0.0, |prev| now.duration_since(prev).as_secs_f32());
        self.last = Some(now);
        dt.min(self.max_dt)
    }

    /// Call from the host timer.
    pub fn pump(&mut self, scene: &mut Scene, surface: &mut dyn Surface) -> Result<TickReport> {
        let dt = self.next_dt();
        scene.tick(dt, surface)
    }
}
