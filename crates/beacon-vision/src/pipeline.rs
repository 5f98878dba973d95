//! Per-frame detection flow and its reentrancy guard.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, TryLockError,
};

use tracing::{debug, warn};

use crate::{
    decode::{OutputDecoder, OutputFormat, OutputGeometry, RawOutputTensor},
    distance::DistanceEstimator,
    engine::{InferenceEngine, TensorSpec},
    geometry::FrameGeometry,
    nms, preprocess,
    preprocess::{CameraFrame, InputEncoding},
    score::ClassScorer,
    select, ConfigError, Detection, RecognitionError,
};

#[derive(Debug, Clone, Default)]
pub struct FrameResult {
    /// Suppressed detections, boxes in camera-frame pixels.
    pub detections: Vec<Detection>,
    pub best: Option<Detection>,
}

pub struct DetectionPipeline {
    decoder: OutputDecoder,
    scorer: ClassScorer,
    iou_threshold: f32,
    geometry: FrameGeometry,
    estimator: Box<dyn DistanceEstimator>,
}

impl DetectionPipeline {
    pub fn new(
        decoder: OutputDecoder,
        scorer: ClassScorer,
        iou_threshold: f32,
        geometry: FrameGeometry,
        estimator: Box<dyn DistanceEstimator>,
    ) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&iou_threshold) {
            return Err(ConfigError::Threshold { name: "nms_iou_threshold", value: iou_threshold });
        }
        if geometry.crop_size != decoder.geometry().input_size() {
            return Err(ConfigError::InputSize(geometry.crop_size));
        }
        Ok(Self { decoder, scorer, iou_threshold, geometry, estimator })
    }

    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    pub fn decoder(&self) -> &OutputDecoder {
        &self.decoder
    }

    /// Fail fast when the loaded model disagrees with the configured template.
    pub fn check_engine(&self, spec: &TensorSpec) -> Result<(), ConfigError> {
        let g = self.decoder.geometry();
        if spec.input_size != g.input_size() {
            return Err(ConfigError::InputSize(spec.input_size));
        }
        if spec.output_fields != g.fields() {
            return Err(ConfigError::LabelCount {
                classes: spec.output_fields.saturating_sub(5),
                labels: g.num_classes(),
            });
        }
        self.decoder.check_len(spec.output_len)?;
        match (self.decoder.format(), spec.output_quant) {
            (OutputFormat::Float, None) | (OutputFormat::Quantized(_), Some(_)) => Ok(()),
            (OutputFormat::Float, Some(_)) => {
                Err(ConfigError::FormatMismatch { expected: "float", actual: "quantized" })
            }
            (OutputFormat::Quantized(_), None) => {
                Err(ConfigError::FormatMismatch { expected: "quantized", actual: "float" })
            }
        }
    }

    /// decode -> score -> suppress -> remap -> distance -> nearest
    pub fn process(&self, raw: &RawOutputTensor) -> Result<FrameResult, ConfigError> {
        let rows = self.decoder.decode(raw)?;
        let candidates = self.scorer.score(&rows);
        let n_candidates = candidates.len();

        let mut detections = nms::suppress(candidates, self.iou_threshold);
        for d in &mut detections {
            d.rect = self.geometry.rect_to_frame(&d.rect);
        }
        self.estimator.apply(&mut detections);

        let best = select::nearest(&detections).cloned();
        debug!(
            "frame: candidates={} kept={} best={:?}",
            n_candidates,
            detections.len(),
            best.as_ref().map(|b| &b.label)
        );
        Ok(FrameResult { detections, best })
    }

    /// One full cycle on an engine. Any failure is transient for this frame.
    pub fn run_frame(
        &self,
        engine: &mut dyn InferenceEngine,
        frame: &CameraFrame,
    ) -> Result<FrameResult, RecognitionError> {
        let encoding = InputEncoding::for_spec(engine.spec());
        let input = preprocess::prepare(frame, &self.geometry, encoding);
        let raw = engine.recognize(&input).map_err(RecognitionError::Inference)?;
        self.process(&raw).map_err(RecognitionError::Decode)
    }
}

/// Build the output decoder a tensor layout implies.
pub fn decoder_for(spec: &TensorSpec, num_classes: usize) -> Result<OutputDecoder, ConfigError> {
    let geometry = OutputGeometry::new(spec.input_size, num_classes)?;
    let format = match spec.output_quant {
        Some(q) => OutputFormat::Quantized(q),
        None => OutputFormat::Float,
    };
    OutputDecoder::new(geometry, format)
}

/// Drops frames while a detection cycle is still in flight. No queueing.
#[derive(Debug, Clone, Default)]
pub struct FrameGate {
    busy: Arc<AtomicBool>,
}

impl FrameGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&self) -> Option<FrameGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FrameGuard { busy: self.busy.clone() })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the gate on drop, including when the cycle fails or panics.
#[derive(Debug)]
pub struct FrameGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Engine shared between the frame loop and runtime reconfiguration.
pub type SharedEngine = Arc<Mutex<Box<dyn InferenceEngine>>>;

/// Run one frame under the gate. `None` when the frame was dropped or failed.
pub fn guarded_frame(
    gate: &FrameGate,
    pipeline: &DetectionPipeline,
    engine: &mut dyn InferenceEngine,
    frame: &CameraFrame,
) -> Option<FrameResult> {
    let Some(_guard) = gate.try_enter() else {
        debug!("frame: dropped, previous cycle still computing");
        return None;
    };
    run_logged(pipeline, engine, frame)
}

/// Run a frame the caller already admitted through the gate. The guard is
/// held for the whole cycle. A frame that finds the engine locked (a
/// reconfiguration in progress) is dropped rather than waiting for it.
pub fn admitted_frame(
    _guard: FrameGuard,
    pipeline: &DetectionPipeline,
    engine: &Mutex<Box<dyn InferenceEngine>>,
    frame: &CameraFrame,
) -> Option<FrameResult> {
    let mut engine = match engine.try_lock() {
        Ok(e) => e,
        Err(TryLockError::WouldBlock) => {
            debug!("frame: dropped, engine busy");
            return None;
        }
        Err(TryLockError::Poisoned(_)) => {
            warn!("frame: engine lock poisoned");
            return None;
        }
    };
    run_logged(pipeline, &mut **engine, frame)
}

fn run_logged(pipeline: &DetectionPipeline, engine: &mut dyn InferenceEngine, frame: &CameraFrame) -> Option<FrameResult> {
    match pipeline.run_frame(engine, frame) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!("frame: {:#}", e);
            None
        }
    }
}
