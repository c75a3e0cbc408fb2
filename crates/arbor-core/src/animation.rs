//! Frame-stepped easing for timed extras.

use serde::{Deserialize, Serialize};

/// Shape of a tween over normalised progress in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Easing {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
    /// Half a cosine period; fast in the middle, gentle at both ends.
    Sine,
}

impl Easing {
    /// Maps progress to eased progress. Callers clamp `p` first.
    pub fn ease(self, p: f32) -> f32 {
        let rev = 1.0 - p;
        match self {
            Easing::Linear => p,
            Easing::EaseIn => p.powi(2),
            Easing::EaseOut => 1.0 - rev.powi(2),
            Easing::EaseInOut if p < 0.5 => 2.0 * p.powi(2),
            Easing::EaseInOut => 1.0 - 2.0 * rev.powi(2),
            Easing::Sine => (1.0 - (p * std::f32::consts::PI).cos()) / 2.0,
        }
    }
}

pub trait Interpolate {
    fn interpolate(&self, other: &Self, t: f32) -> Self;
}

impl Interpolate for f32 {
    fn interpolate(&self, other: &Self, t: f32) -> Self {
        self + (other - self) * t
    }
}

/// Progress through a fixed number of frames.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameTween {
    pub from: f32,
    pub to: f32,
    pub frames: u32,
    pub elapsed: u32,
    pub easing: Easing,
}

impl FrameTween {
    pub fn new(from: f32, to: f32, frames: u32, easing: Easing) -> Self {
        Self {
            from,
            to,
            frames,
            elapsed: 0,
            easing,
        }
    }

    /// Advances one frame and returns the eased value.
    pub fn step(&mut self) -> f32 {
        self.elapsed = (self.elapsed + 1).min(self.frames);
        self.value()
    }

    pub fn value(&self) -> f32 {
        if self.frames == 0 {
            return self.to;
        }
        let progress = (self.elapsed as f32 / self.frames as f32).clamp(0.0, 1.0);
        self.from.interpolate(&self.to, self.easing.ease(progress))
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.frames
    }
}
