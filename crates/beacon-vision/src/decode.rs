//! Raw output tensor decoding.
//!
//! The network emits `N` candidate rows of `[cx, cy, w, h, obj, cls0..clsC]`.
//! Box parameters are relative to the square input, so the decoder scales
//! the first four columns back up to input pixels. Whether the buffer holds
//! quantized bytes or floats is fixed when the model is loaded; the decoder
//! refuses a buffer of the other kind instead of guessing.

use serde::Deserialize;

use crate::ConfigError;

const BOX_FIELDS: usize = 4;
const OBJECTNESS: usize = 4;
const CLASS_OFFSET: usize = 5;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 3;

/// Output tensor template derived from input resolution and class count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputGeometry {
    input_size: u32,
    num_classes: usize,
}

impl OutputGeometry {
    pub fn new(input_size: u32, num_classes: usize) -> Result<Self, ConfigError> {
        if input_size == 0 || input_size % 32 != 0 {
            return Err(ConfigError::InputSize(input_size));
        }
        if num_classes == 0 {
            return Err(ConfigError::NoClasses);
        }
        Ok(Self { input_size, num_classes })
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Candidate rows: three anchors per cell over the stride 8/16/32 grids.
    pub fn num_boxes(&self) -> usize {
        let s = self.input_size as usize;
        STRIDES.iter().map(|st| (s / st).pow(2)).sum::<usize>() * ANCHORS_PER_CELL
    }

    pub fn fields(&self) -> usize {
        CLASS_OFFSET + self.num_classes
    }

    pub fn len(&self) -> usize {
        self.num_boxes() * self.fields()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-tensor affine quantization: `real = scale * (q - zero_point)`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParams {
    pub fn new(scale: f32, zero_point: i32) -> Result<Self, ConfigError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ConfigError::QuantScale(scale));
        }
        Ok(Self { scale, zero_point })
    }

    pub fn dequantize(&self, q: u8) -> f32 {
        self.scale * (i32::from(q) - self.zero_point) as f32
    }

    pub fn quantize(&self, real: f32) -> u8 {
        let q = (real / self.scale + self.zero_point as f32).round();
        q.clamp(0.0, 255.0) as u8
    }
}

/// Output buffer as handed back by the inference engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutputTensor {
    Quantized(Vec<u8>),
    Float(Vec<f32>),
}

impl RawOutputTensor {
    pub fn len(&self) -> usize {
        match self {
            Self::Quantized(b) => b.len(),
            Self::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Quantized(_) => "quantized",
            Self::Float(_) => "float",
        }
    }
}

/// Element layout of the output tensor, chosen once at model load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Float,
    Quantized(QuantParams),
}

impl OutputFormat {
    fn kind(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Quantized(_) => "quantized",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputDecoder {
    geometry: OutputGeometry,
    format: OutputFormat,
}

impl OutputDecoder {
    pub fn new(geometry: OutputGeometry, format: OutputFormat) -> Result<Self, ConfigError> {
        if let OutputFormat::Quantized(q) = format {
            QuantParams::new(q.scale, q.zero_point)?;
        }
        Ok(Self { geometry, format })
    }

    pub fn geometry(&self) -> &OutputGeometry {
        &self.geometry
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Check a buffer length against the template without decoding it.
    pub fn check_len(&self, len: usize) -> Result<(), ConfigError> {
        let expected = self.geometry.len();
        if len != expected {
            return Err(ConfigError::ShapeMismatch {
                expected,
                actual: len,
                boxes: self.geometry.num_boxes(),
                fields: self.geometry.fields(),
            });
        }
        Ok(())
    }

    pub fn decode(&self, raw: &RawOutputTensor) -> Result<DecodedRows, ConfigError> {
        self.check_len(raw.len())?;

        let mut values = match (self.format, raw) {
            (OutputFormat::Float, RawOutputTensor::Float(v)) => v.clone(),
            (OutputFormat::Quantized(q), RawOutputTensor::Quantized(b)) => {
                b.iter().map(|&byte| q.dequantize(byte)).collect()
            }
            (format, raw) => {
                return Err(ConfigError::FormatMismatch {
                    expected: format.kind(),
                    actual: raw.kind(),
                })
            }
        };

        let size = self.geometry.input_size as f32;
        for row in values.chunks_exact_mut(self.geometry.fields()) {
            for v in &mut row[..BOX_FIELDS] {
                *v *= size;
            }
        }

        Ok(DecodedRows { values, fields: self.geometry.fields() })
    }
}

/// Dense decoded rows; box columns already in input pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRows {
    values: Vec<f32>,
    fields: usize,
}

impl DecodedRows {
    /// Wrap values that are already in input-pixel units.
    pub fn from_values(values: Vec<f32>, num_classes: usize) -> Result<Self, ConfigError> {
        if num_classes == 0 {
            return Err(ConfigError::NoClasses);
        }
        let fields = CLASS_OFFSET + num_classes;
        if values.len() % fields != 0 {
            return Err(ConfigError::ShapeMismatch {
                expected: (values.len() / fields + 1) * fields,
                actual: values.len(),
                boxes: values.len() / fields,
                fields,
            });
        }
        Ok(Self { values, fields })
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.fields - CLASS_OFFSET
    }

    pub fn iter(&self) -> impl Iterator<Item = DecodedRow<'_>> {
        self.values.chunks_exact(self.fields).map(DecodedRow)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecodedRow<'a>(&'a [f32]);

impl<'a> DecodedRow<'a> {
    pub fn cx(&self) -> f32 {
        self.0[0]
    }

    pub fn cy(&self) -> f32 {
        self.0[1]
    }

    pub fn w(&self) -> f32 {
        self.0[2]
    }

    pub fn h(&self) -> f32 {
        self.0[3]
    }

    pub fn objectness(&self) -> f32 {
        self.0[OBJECTNESS]
    }

    pub fn class_scores(&self) -> &'a [f32] {
        &self.0[CLASS_OFFSET..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_matches_yolov5_export() {
        let g = OutputGeometry::new(640, 80).unwrap();
        assert_eq!(g.num_boxes(), 25200);
        assert_eq!(g.fields(), 85);
        let g = OutputGeometry::new(320, 2).unwrap();
        assert_eq!(g.num_boxes(), 6300);
        assert!(matches!(OutputGeometry::new(100, 2), Err(ConfigError::InputSize(100))));
        assert!(matches!(OutputGeometry::new(640, 0), Err(ConfigError::NoClasses)));
    }

    #[test]
    fn float_rows_are_denormalized() {
        let g = OutputGeometry::new(32, 1).unwrap();
        let mut raw = vec![0.0f32; g.len()];
        raw[..6].copy_from_slice(&[0.5, 0.25, 0.125, 1.0, 0.9, 0.7]);
        let dec = OutputDecoder::new(g, OutputFormat::Float).unwrap();
        let rows = dec.decode(&RawOutputTensor::Float(raw)).unwrap();
        assert_eq!(rows.len(), g.num_boxes());
        let first = rows.iter().next().unwrap();
        assert_eq!((first.cx(), first.cy(), first.w(), first.h()), (16.0, 8.0, 4.0, 32.0));
        assert_eq!(first.objectness(), 0.9);
        assert_eq!(first.class_scores(), &[0.7]);
    }

    #[test]
    fn quantized_rows_use_scale_and_zero_point() {
        let g = OutputGeometry::new(32, 1).unwrap();
        let q = QuantParams::new(0.5, 10).unwrap();
        let mut raw = vec![10u8; g.len()];
        raw[4] = 12;
        raw[0] = 11;
        let dec = OutputDecoder::new(g, OutputFormat::Quantized(q)).unwrap();
        let rows = dec.decode(&RawOutputTensor::Quantized(raw)).unwrap();
        let first = rows.iter().next().unwrap();
        assert_eq!(first.cx(), 0.5 * 32.0);
        assert_eq!(first.objectness(), 1.0);
        assert_eq!(first.class_scores(), &[0.0]);
    }

    #[test]
    fn length_mismatch_is_a_configuration_error() {
        let g = OutputGeometry::new(32, 2).unwrap();
        let dec = OutputDecoder::new(g, OutputFormat::Float).unwrap();
        let err = dec.decode(&RawOutputTensor::Float(vec![0.0; g.len() - 1])).unwrap_err();
        assert!(matches!(err, ConfigError::ShapeMismatch { expected, .. } if expected == g.len()));
    }

    #[test]
    fn buffer_kind_must_match_loaded_format() {
        let g = OutputGeometry::new(32, 2).unwrap();
        let dec = OutputDecoder::new(g, OutputFormat::Float).unwrap();
        let err = dec.decode(&RawOutputTensor::Quantized(vec![0; g.len()])).unwrap_err();
        assert!(matches!(err, ConfigError::FormatMismatch { expected: "float", actual: "quantized" }));
    }

    #[test]
    fn quantize_roundtrip_clamps_to_byte() {
        let q = QuantParams::new(1.0 / 255.0, 0).unwrap();
        assert_eq!(q.quantize(1.0), 255);
        assert_eq!(q.quantize(2.0), 255);
        assert_eq!(q.quantize(-1.0), 0);
        assert!(QuantParams::new(0.0, 0).is_err());
    }
}
