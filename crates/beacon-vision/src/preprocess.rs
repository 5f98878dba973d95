use image::{Rgb, RgbImage};

use crate::{
    decode::QuantParams,
    engine::{InputTensor, TensorSpec},
    geometry::FrameGeometry,
    RecognitionError,
};

/// Camera frame plus the sensor rotation it was captured with.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub image: RgbImage,
    pub rotation: i32,
}

impl CameraFrame {
    pub fn from_rgb(rgb: Vec<u8>, width: u32, height: u32, rotation: i32) -> Result<Self, RecognitionError> {
        let need = width as usize * height as usize * 3;
        let len = rgb.len();
        let image = RgbImage::from_raw(width, height, rgb)
            .ok_or(RecognitionError::FrameBuffer { width, height, len, need })?;
        Ok(Self { image, rotation })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEncoding {
    Float,
    Quantized(QuantParams),
}

impl InputEncoding {
    pub fn for_spec(spec: &TensorSpec) -> Self {
        match spec.input_quant {
            Some(q) => Self::Quantized(q),
            None => Self::Float,
        }
    }
}

/// Sample the frame through the crop->frame map (nearest neighbour), so the
/// pixels the model sees are exactly where the inverse transform says.
pub fn crop_frame(frame: &RgbImage, geometry: &FrameGeometry) -> RgbImage {
    let size = geometry.crop_size;
    let inv = geometry.crop_to_frame();
    let (w, h) = (frame.width() as f32, frame.height() as f32);

    RgbImage::from_fn(size, size, |x, y| {
        let (sx, sy) = inv.map_point(x as f32 + 0.5, y as f32 + 0.5);
        if sx >= 0.0 && sy >= 0.0 && sx < w && sy < h {
            *frame.get_pixel(sx as u32, sy as u32)
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// RGB bytes normalized to `[0, 1]`, then quantized if the model wants bytes.
pub fn encode(crop: &RgbImage, encoding: InputEncoding) -> InputTensor {
    let norm = crop.as_raw().iter().map(|&v| f32::from(v) / 255.0);
    match encoding {
        InputEncoding::Float => InputTensor::Float(norm.collect()),
        InputEncoding::Quantized(q) => InputTensor::Quantized(norm.map(|v| q.quantize(v)).collect()),
    }
}

pub fn prepare(frame: &CameraFrame, geometry: &FrameGeometry, encoding: InputEncoding) -> InputTensor {
    encode(&crop_frame(&frame.image, geometry), encoding)
}
