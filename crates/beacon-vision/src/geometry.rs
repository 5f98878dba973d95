//! Camera-frame <-> model-input coordinate mapping.

use crate::{ConfigError, Rect};

/// 2D affine map `x' = a*x + b*y + tx`, `y' = c*x + d*y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Affine {
    pub const IDENTITY: Self = Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0, tx: 0.0, ty: 0.0 };

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self { tx, ty, ..Self::IDENTITY }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self { a: sx, d: sy, ..Self::IDENTITY }
    }

    /// Rotation by a multiple of 90 degrees, exact (no trig rounding).
    pub fn rotate_quarter(degrees: i32) -> Result<Self, ConfigError> {
        if degrees % 90 != 0 {
            return Err(ConfigError::Rotation(degrees));
        }
        let (cos, sin) = match degrees.rem_euclid(360) {
            0 => (1.0, 0.0),
            90 => (0.0, 1.0),
            180 => (-1.0, 0.0),
            _ => (0.0, -1.0),
        };
        Ok(Self { a: cos, b: -sin, c: sin, d: cos, tx: 0.0, ty: 0.0 })
    }

    /// `self` followed by `next`.
    pub fn then(self, next: Self) -> Self {
        Self {
            a: next.a * self.a + next.b * self.c,
            b: next.a * self.b + next.b * self.d,
            c: next.c * self.a + next.d * self.c,
            d: next.c * self.b + next.d * self.d,
            tx: next.a * self.tx + next.b * self.ty + next.tx,
            ty: next.c * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + b * self.ty),
            ty: -(c * self.tx + d * self.ty),
        })
    }

    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.b * y + self.tx, self.c * x + self.d * y + self.ty)
    }

    /// Bounding box of the four mapped corners.
    pub fn map_rect(&self, r: &Rect) -> Rect {
        let corners = [
            self.map_point(r.x0, r.y0),
            self.map_point(r.x1, r.y0),
            self.map_point(r.x0, r.y1),
            self.map_point(r.x1, r.y1),
        ];
        let mut out = Rect::new(f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY);
        for (x, y) in corners {
            out.x0 = out.x0.min(x);
            out.y0 = out.y0.min(y);
            out.x1 = out.x1.max(x);
            out.y1 = out.y1.max(y);
        }
        out
    }
}

/// Forward and inverse transforms between a camera frame and the square crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
    pub frame_w: u32,
    pub frame_h: u32,
    pub crop_size: u32,
    pub rotation: i32,
    frame_to_crop: Affine,
    crop_to_frame: Affine,
}

impl FrameGeometry {
    pub fn new(
        frame_w: u32,
        frame_h: u32,
        crop_size: u32,
        rotation: i32,
        maintain_aspect: bool,
    ) -> Result<Self, ConfigError> {
        if frame_w == 0 || frame_h == 0 {
            return Err(ConfigError::FrameSize { width: frame_w, height: frame_h });
        }
        if crop_size == 0 {
            return Err(ConfigError::InputSize(crop_size));
        }
        let frame_to_crop =
            transformation(frame_w, frame_h, crop_size, crop_size, rotation, maintain_aspect)?;
        let crop_to_frame = frame_to_crop
            .invert()
            .ok_or(ConfigError::FrameSize { width: frame_w, height: frame_h })?;
        Ok(Self { frame_w, frame_h, crop_size, rotation, frame_to_crop, crop_to_frame })
    }

    pub fn frame_to_crop(&self) -> &Affine {
        &self.frame_to_crop
    }

    pub fn crop_to_frame(&self) -> &Affine {
        &self.crop_to_frame
    }

    pub fn rect_to_frame(&self, r: &Rect) -> Rect {
        self.crop_to_frame.map_rect(r)
    }
}

/// Centre, rotate, scale to the destination and re-centre.
///
/// With `maintain_aspect` the larger of the two axis scales is used on both
/// axes, so the destination is filled and the overflow is cropped.
pub fn transformation(
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
    rotation: i32,
    maintain_aspect: bool,
) -> Result<Affine, ConfigError> {
    let rot = Affine::rotate_quarter(rotation)?;
    let mut m = Affine::IDENTITY;
    if rotation != 0 {
        m = m
            .then(Affine::translate(-(src_w as f32) / 2.0, -(src_h as f32) / 2.0))
            .then(rot);
    }

    let transpose = (rotation.abs() + 90) % 180 == 0;
    let (in_w, in_h) = if transpose { (src_h, src_w) } else { (src_w, src_h) };

    if in_w != dst_w || in_h != dst_h {
        let sx = dst_w as f32 / in_w as f32;
        let sy = dst_h as f32 / in_h as f32;
        m = if maintain_aspect {
            let s = sx.max(sy);
            m.then(Affine::scale(s, s))
        } else {
            m.then(Affine::scale(sx, sy))
        };
    }

    if rotation != 0 {
        m = m.then(Affine::translate(dst_w as f32 / 2.0, dst_h as f32 / 2.0));
    }
    Ok(m)
}
