use beacon_vision::Detection;

pub const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 3000;

/// Rate limit for spoken announcements during detection.
///
/// An offer is accepted only when nothing is being spoken and strictly more
/// than `min_interval_ms` has passed since the last accepted offer. The
/// first offer after construction or `reset` is always eligible.
#[derive(Debug, Clone)]
pub struct AnnouncementThrottle {
    min_interval_ms: u64,
    last_spoken_at_ms: Option<u64>,
}

impl Default for AnnouncementThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_ANNOUNCE_INTERVAL_MS)
    }
}

impl AnnouncementThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self { min_interval_ms, last_spoken_at_ms: None }
    }

    pub fn min_interval_ms(&self) -> u64 {
        self.min_interval_ms
    }

    pub fn last_spoken_at_ms(&self) -> Option<u64> {
        self.last_spoken_at_ms
    }

    pub fn ready(&self, now_ms: u64, speaking: bool) -> bool {
        if speaking {
            return false;
        }
        match self.last_spoken_at_ms {
            None => true,
            Some(t) => now_ms.saturating_sub(t) > self.min_interval_ms,
        }
    }

    /// Returns the announcement text when it should be spoken now and
    /// records `now_ms`. Detections without a distance are never announced.
    pub fn offer(&mut self, det: &Detection, now_ms: u64, speaking: bool) -> Option<String> {
        if !self.ready(now_ms, speaking) {
            return None;
        }
        let text = det.spoken()?;
        self.last_spoken_at_ms = Some(now_ms);
        Some(text)
    }

    pub fn reset(&mut self) {
        self.last_spoken_at_ms = None;
    }
}
