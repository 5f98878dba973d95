//! Pinhole-camera distance heuristic.
//!
//! `distance = real_height * focal_length_px / pixel_height`, with the box
//! height measured in camera-frame pixels. Assumes an upright, unoccluded
//! object whose box spans its true projected height. No lens model.

use std::collections::HashMap;

use serde::Deserialize;

use crate::{ConfigError, Detection};

pub const DEFAULT_FOCAL_LENGTH_PX: f32 = 600.0;

const BUILTIN_HEIGHTS_M: &[(&str, f32)] = &[
    ("person", 1.7),
    ("bicycle", 1.5),
    ("car", 1.5),
    ("motorcycle", 1.0),
    ("bus", 3.0),
    ("truck", 3.0),
    ("traffic light", 2.5),
    ("stop sign", 2.0),
    ("bench", 0.5),
    ("chair", 1.0),
    ("couch", 0.8),
    ("pottedplant", 0.4),
    ("bed", 0.6),
    ("diningtable", 0.75),
    ("toilet", 0.5),
    ("tvmonitor", 0.6),
    ("laptop", 0.3),
    ("mouse", 0.1),
    ("remote", 0.05),
    ("keyboard", 0.05),
    ("cell phone", 0.15),
    ("microwave", 0.4),
    ("oven", 0.5),
    ("toaster", 0.3),
    ("sink", 0.8),
    ("refrigerator", 1.7),
    ("book", 0.25),
    ("clock", 0.3),
    ("vase", 0.3),
    ("scissors", 0.1),
    ("teddy bear", 0.4),
    ("hair drier", 0.2),
    ("toothbrush", 0.15),
    ("door", 2.0),
];

/// Average real-world heights in meters keyed by lower-cased label.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassHeightTable {
    heights: HashMap<String, f32>,
}

impl ClassHeightTable {
    pub fn builtin() -> Self {
        Self {
            heights: BUILTIN_HEIGHTS_M.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    pub fn from_map(map: HashMap<String, f32>) -> Result<Self, ConfigError> {
        if map.is_empty() {
            return Err(ConfigError::EmptyHeightTable);
        }
        let mut heights = HashMap::with_capacity(map.len());
        for (label, height) in map {
            if !(height.is_finite() && height > 0.0) {
                return Err(ConfigError::InvalidHeight { label, height });
            }
            heights.insert(label.to_lowercase(), height);
        }
        Ok(Self { heights })
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.heights.get(&label.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.heights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty()
    }
}

impl Default for ClassHeightTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CalibrationConstants {
    pub focal_length_px: f32,
}

impl CalibrationConstants {
    pub fn new(focal_length_px: f32) -> Result<Self, ConfigError> {
        if !(focal_length_px.is_finite() && focal_length_px > 0.0) {
            return Err(ConfigError::FocalLength(focal_length_px));
        }
        Ok(Self { focal_length_px })
    }
}

impl Default for CalibrationConstants {
    fn default() -> Self {
        Self { focal_length_px: DEFAULT_FOCAL_LENGTH_PX }
    }
}

/// Source of per-detection distances. Boxes are in camera-frame pixels.
pub trait DistanceEstimator: Send + Sync {
    fn estimate(&self, det: &Detection) -> Option<f32>;

    fn apply(&self, dets: &mut [Detection]) {
        for d in dets {
            d.distance_m = self.estimate(d);
        }
    }
}

#[derive(Debug, Clone)]
pub struct PinholeEstimator {
    heights: ClassHeightTable,
    calibration: CalibrationConstants,
}

impl PinholeEstimator {
    pub fn new(heights: ClassHeightTable, calibration: CalibrationConstants) -> Result<Self, ConfigError> {
        if heights.is_empty() {
            return Err(ConfigError::EmptyHeightTable);
        }
        CalibrationConstants::new(calibration.focal_length_px)?;
        Ok(Self { heights, calibration })
    }

    pub fn distance_for(&self, label: &str, pixel_height: f32) -> Option<f32> {
        let real = self.heights.get(label)?;
        if !(pixel_height > 0.0) {
            return None;
        }
        Some(real * self.calibration.focal_length_px / pixel_height)
    }
}

impl DistanceEstimator for PinholeEstimator {
    fn estimate(&self, det: &Detection) -> Option<f32> {
        self.distance_for(&det.label, det.rect.height())
    }
}
