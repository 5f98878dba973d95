mod nms;
pub mod camera;
pub mod decode;
pub mod distance;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod preprocess;
pub mod score;
pub mod select;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

pub use error::{ConfigError, RecognitionError};
pub use nms::{iou, suppress};

use serde::{Deserialize, Serialize};

/// Joint confidence a candidate must exceed to become a detection.
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.5;
/// Same-class candidates overlapping an accepted box at or above this IoU are dropped.
pub const DEFAULT_NMS_IOU_THRESHOLD: f32 = 0.6;
/// Square model input resolution used by the stock yolov5s export.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Axis-aligned rectangle in pixels, corners inclusive of `(x0, y0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Clip both corners into `[lo, hi]` on each axis.
    pub fn clamp(self, lo: f32, hi: f32) -> Self {
        Self {
            x0: self.x0.clamp(lo, hi),
            y0: self.y0.clamp(lo, hi),
            x1: self.x1.clamp(lo, hi),
            y1: self.y1.clamp(lo, hi),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    /// objectness x best class score
    pub confidence: f32,
    /// model-input pixels until remapped, camera-frame pixels afterwards
    pub rect: Rect,
    pub distance_m: Option<f32>,
}

impl Detection {
    /// Spoken form, e.g. `person, 2.5 meters`. `None` without a distance.
    pub fn spoken(&self) -> Option<String> {
        self.distance_m
            .map(|d| format!("{}, {:.1} meters", self.label, d))
    }
}
