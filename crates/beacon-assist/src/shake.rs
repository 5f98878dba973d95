//! Accelerometer shake trigger.

pub const STANDARD_GRAVITY: f32 = 9.806_65;
pub const DEFAULT_SHAKE_THRESHOLD: f32 = 12.0;
const DECAY: f32 = 0.9;

/// High-pass "jerk" filter over the acceleration magnitude. Fires whenever
/// the filtered value exceeds the threshold; the caller decides what a
/// repeated trigger means.
#[derive(Debug, Clone)]
pub struct ShakeDetector {
    threshold: f32,
    accel: f32,
    current: f32,
}

impl Default for ShakeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SHAKE_THRESHOLD)
    }
}

impl ShakeDetector {
    pub fn new(threshold: f32) -> Self {
        Self { threshold, accel: 0.0, current: STANDARD_GRAVITY }
    }

    /// Feed one sample in m/s². Returns true when it counts as a shake.
    pub fn feed(&mut self, x: f32, y: f32, z: f32) -> bool {
        let last = self.current;
        self.current = (x * x + y * y + z * z).sqrt();
        self.accel = self.accel * DECAY + (self.current - last);
        self.accel > self.threshold
    }

    pub fn level(&self) -> f32 {
        self.accel
    }
}
