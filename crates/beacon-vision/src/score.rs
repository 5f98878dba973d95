use crate::{
    decode::{DecodedRows, OutputGeometry},
    ConfigError, Detection, Rect,
};

/// Resolves the best class of each decoded row and keeps confident ones.
#[derive(Debug, Clone)]
pub struct ClassScorer {
    labels: Vec<String>,
    input_size: f32,
    threshold: f32,
}

impl ClassScorer {
    pub fn new(labels: Vec<String>, geometry: &OutputGeometry, threshold: f32) -> Result<Self, ConfigError> {
        if labels.len() != geometry.num_classes() {
            return Err(ConfigError::LabelCount {
                classes: geometry.num_classes(),
                labels: labels.len(),
            });
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Threshold { name: "conf_threshold", value: threshold });
        }
        Ok(Self {
            labels,
            input_size: geometry.input_size() as f32,
            threshold,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn score(&self, rows: &DecodedRows) -> Vec<Detection> {
        let hi = self.input_size - 1.0;
        let mut out = Vec::new();

        for row in rows.iter() {
            let Some((class_id, best)) = best_class(row.class_scores()) else { continue };
            let conf = best * row.objectness();
            if !(conf > self.threshold) {
                continue;
            }
            let Some(label) = self.labels.get(class_id) else { continue };

            out.push(Detection {
                class_id,
                label: label.clone(),
                // sigmoid outputs; dequantization can overshoot slightly
                confidence: conf.min(1.0),
                rect: Rect::from_center(row.cx(), row.cy(), row.w(), row.h()).clamp(0.0, hi),
                distance_m: None,
            });
        }
        out
    }
}

/// Index and value of the highest score; the lowest index wins ties.
pub fn best_class(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &p) in scores.iter().enumerate() {
        match best {
            Some((_, b)) if !(p > b) => {}
            _ => best = Some((i, p)),
        }
    }
    best
}
