use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use beacon_assist::machine::Timings;
use beacon_assist::shake::DEFAULT_SHAKE_THRESHOLD;
use beacon_assist::Language;
use beacon_vision::camera::CameraConfig;
use beacon_vision::decode::{OutputFormat, OutputGeometry, QuantParams};
use beacon_vision::distance::{CalibrationConstants, ClassHeightTable, PinholeEstimator, DEFAULT_FOCAL_LENGTH_PX};
use beacon_vision::engine::{Backend, EngineOptions};
use beacon_vision::geometry::FrameGeometry;
use beacon_vision::{DEFAULT_CONF_THRESHOLD, DEFAULT_INPUT_SIZE, DEFAULT_NMS_IOU_THRESHOLD};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub vision: VisionCfg,
    pub camera: Option<CameraConfig>,
    #[serde(default)]
    pub distance: DistanceCfg,
    #[serde(default)]
    pub interaction: InteractionCfg,
    #[serde(default)]
    pub speech: SpeechCfg,
    #[serde(default)]
    pub emergency: EmergencyCfg,
    #[serde(default)]
    pub reader: ReaderCfg,
}

fn default_input_size() -> u32 { DEFAULT_INPUT_SIZE }
fn default_conf() -> f32 { DEFAULT_CONF_THRESHOLD }
fn default_iou() -> f32 { DEFAULT_NMS_IOU_THRESHOLD }
fn default_threads() -> u32 { 1 }
fn default_backend() -> Backend { Backend::Cpu }

#[derive(Debug, Deserialize)]
pub struct VisionCfg {
    pub model_path: String,
    pub labels: Option<Vec<String>>,
    pub labels_path: Option<String>,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default)]
    pub quantized: bool,
    // only consulted when no engine reports them (`beacon decode`)
    pub output_scale: Option<f32>,
    pub output_zero_point: Option<i32>,
    #[serde(default = "default_conf")]
    pub conf_threshold: f32,
    #[serde(default = "default_iou")]
    pub nms_iou_threshold: f32,
    #[serde(default = "default_threads")]
    pub num_threads: u32,
    #[serde(default = "default_backend")]
    pub backend: Backend,
}

impl VisionCfg {
    /// Inline `labels` win over `labels_path`.
    pub fn labels(&self) -> Result<Vec<String>> {
        if let Some(l) = &self.labels {
            return Ok(l.clone());
        }
        let path = self.labels_path.as_ref().context("vision.labels or vision.labels_path required")?;
        let s = std::fs::read_to_string(path).with_context(|| format!("read labels {}", path))?;
        Ok(s.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions { num_threads: self.num_threads, backend: self.backend }
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        if !self.quantized {
            return Ok(OutputFormat::Float);
        }
        let scale = self.output_scale.context("vision.output_scale required for a quantized model")?;
        let zp = self.output_zero_point.unwrap_or(0);
        Ok(OutputFormat::Quantized(QuantParams::new(scale, zp)?))
    }
}

fn default_focal() -> f32 { DEFAULT_FOCAL_LENGTH_PX }

#[derive(Debug, Deserialize)]
pub struct DistanceCfg {
    #[serde(default = "default_focal")]
    pub focal_length_px: f32,
    /// Replaces the built-in table when present.
    pub heights: Option<HashMap<String, f32>>,
}

impl Default for DistanceCfg {
    fn default() -> Self {
        Self { focal_length_px: DEFAULT_FOCAL_LENGTH_PX, heights: None }
    }
}

impl DistanceCfg {
    pub fn estimator(&self) -> Result<PinholeEstimator> {
        let table = match &self.heights {
            Some(h) => ClassHeightTable::from_map(h.clone())?,
            None => ClassHeightTable::builtin(),
        };
        Ok(PinholeEstimator::new(table, CalibrationConstants::new(self.focal_length_px)?)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InteractionCfg {
    pub announce_interval_ms: u64,
    pub relisten_delay_ms: u64,
    pub emergency_delay_ms: u64,
    pub emergency_cooldown_ms: u64,
    pub haptic_pulse_ms: u64,
    pub language: Language,
    pub shake_threshold: f32,
}

impl Default for InteractionCfg {
    fn default() -> Self {
        let t = Timings::default();
        Self {
            announce_interval_ms: t.announce_interval_ms,
            relisten_delay_ms: t.relisten_delay_ms,
            emergency_delay_ms: t.emergency_delay_ms,
            emergency_cooldown_ms: t.emergency_cooldown_ms,
            haptic_pulse_ms: t.haptic_pulse_ms,
            language: Language::English,
            shake_threshold: DEFAULT_SHAKE_THRESHOLD,
        }
    }
}

impl InteractionCfg {
    pub fn timings(&self) -> Timings {
        Timings {
            announce_interval_ms: self.announce_interval_ms,
            relisten_delay_ms: self.relisten_delay_ms,
            emergency_delay_ms: self.emergency_delay_ms,
            emergency_cooldown_ms: self.emergency_cooldown_ms,
            haptic_pulse_ms: self.haptic_pulse_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SpeechCfg {
    pub tts_command: String,
    /// Language code -> synthesizer voice. Missing languages use the code itself.
    pub voices: HashMap<String, String>,
}

impl Default for SpeechCfg {
    fn default() -> Self {
        Self { tts_command: "espeak-ng".into(), voices: HashMap::new() }
    }
}

impl SpeechCfg {
    pub fn voice_table(&self) -> Result<HashMap<Language, String>> {
        let mut out: HashMap<Language, String> =
            Language::ALL.iter().map(|l| (*l, l.code().to_string())).collect();
        for (code, voice) in &self.voices {
            out.insert(code.parse()?, voice.clone());
        }
        Ok(out)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EmergencyCfg {
    pub contact_number: Option<String>,
    pub sms_command: Option<String>,
    pub call_command: Option<String>,
    pub location_command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReaderCfg {
    pub command: Option<String>,
}

pub fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

impl Config {
    /// Frame geometry for the configured camera, or an identity crop when
    /// frames already arrive at model resolution.
    pub fn frame_geometry(&self) -> Result<FrameGeometry> {
        let s = self.vision.input_size;
        let g = match &self.camera {
            Some(c) => FrameGeometry::new(c.width, c.height, s, c.rotation, c.maintain_aspect)?,
            None => FrameGeometry::new(s, s, s, 0, false)?,
        };
        Ok(g)
    }

    pub fn doctor(&self) -> Result<()> {
        let v = &self.vision;
        let labels = v.labels()?;
        let geometry = OutputGeometry::new(v.input_size, labels.len())?;
        anyhow::ensure!(
            v.conf_threshold > 0.0 && v.conf_threshold < 1.0,
            "vision.conf_threshold must be in (0,1), got {}",
            v.conf_threshold
        );
        anyhow::ensure!(
            v.nms_iou_threshold > 0.0 && v.nms_iou_threshold <= 1.0,
            "vision.nms_iou_threshold must be in (0,1], got {}",
            v.nms_iou_threshold
        );
        anyhow::ensure!(v.num_threads > 0, "vision.num_threads must be > 0");
        anyhow::ensure!(Path::new(&v.model_path).exists(), "vision.model_path missing: {}", v.model_path);
        v.output_format()?;

        if let Some(c) = &self.camera {
            anyhow::ensure!(c.fps > 0, "camera.fps must be > 0");
            match c.mode.as_str() {
                "libcamera-jpeg" => {}
                "v4l2-mjpeg" => anyhow::ensure!(!c.device.is_empty(), "camera.device missing"),
                "file" => anyhow::ensure!(Path::new(&c.path).exists(), "camera.path missing: {}", c.path),
                other => anyhow::bail!("unknown camera.mode: {}", other),
            }
        }
        self.frame_geometry()?;

        let est = self.distance.estimator()?;
        let unknown: Vec<&str> = labels
            .iter()
            .filter(|l| est.distance_for(l, 1.0).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            tracing::info!("doctor: no height for {} labels (never announced)", unknown.len());
        }

        let i = &self.interaction;
        anyhow::ensure!(i.shake_threshold > 0.0, "interaction.shake_threshold must be > 0");
        anyhow::ensure!(i.relisten_delay_ms > 0, "interaction.relisten_delay_ms must be > 0");
        self.speech.voice_table()?;

        if self.emergency.contact_number.as_deref().unwrap_or("").is_empty() {
            tracing::warn!("doctor: emergency.contact_number not set, emergency calls will fail");
        }
        tracing::info!(
            "doctor: {} labels, {} boxes x {} fields per frame",
            labels.len(),
            geometry.num_boxes(),
            geometry.fields()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[vision]
model_path = "Cargo.toml"
labels = ["person", "car", "chair"]
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.vision.input_size, 640);
        assert_eq!(cfg.vision.conf_threshold, 0.5);
        assert_eq!(cfg.vision.nms_iou_threshold, 0.6);
        assert_eq!(cfg.vision.backend, Backend::Cpu);
        assert_eq!(cfg.interaction.announce_interval_ms, 3000);
        assert_eq!(cfg.interaction.emergency_delay_ms, 4000);
        assert_eq!(cfg.interaction.language, Language::English);
        assert_eq!(cfg.speech.tts_command, "espeak-ng");
        assert!(matches!(cfg.vision.output_format().unwrap(), OutputFormat::Float));
        cfg.doctor().unwrap();
    }

    #[test]
    fn full_config_parses() {
        let cfg: Config = toml::from_str(
            r#"
[vision]
model_path = "Cargo.toml"
labels = ["person"]
quantized = true
output_scale = 0.0039
output_zero_point = 2
backend = "coral"
num_threads = 4

[camera]
mode = "v4l2-mjpeg"
device = "/dev/video0"
width = 1280
height = 720
fps = 5
rotation = 90

[distance]
focal_length_px = 720.0
heights = { person = 1.75, door = 2.1 }

[interaction]
language = "hi"
emergency_cooldown_ms = 20000

[speech]
voices = { te = "te+f3" }

[emergency]
contact_number = "+911234567890"
call_command = "termux-telephony-call \"$BEACON_TO\""
"#,
        )
        .unwrap();
        assert_eq!(cfg.vision.backend, Backend::NnAccelerator);
        assert!(matches!(cfg.vision.output_format().unwrap(), OutputFormat::Quantized(q) if q.zero_point == 2));
        assert_eq!(cfg.interaction.language, Language::Hindi);
        assert_eq!(cfg.interaction.timings().emergency_cooldown_ms, 20_000);
        assert_eq!(cfg.interaction.timings().relisten_delay_ms, 1000);
        assert_eq!(cfg.speech.voice_table().unwrap()[&Language::Telugu], "te+f3");
        assert_eq!(cfg.speech.voice_table().unwrap()[&Language::Hindi], "hi");
        let est = cfg.distance.estimator().unwrap();
        assert!((est.distance_for("door", 210.0).unwrap() - 7.2).abs() < 1e-4);
        assert!(est.distance_for("car", 100.0).is_none());
        let g = cfg.frame_geometry().unwrap();
        assert_eq!(g.rotation, 90);
        cfg.doctor().unwrap();
    }

    #[test]
    fn doctor_rejects_bad_values() {
        let mut cfg: Config = toml::from_str(MINIMAL).unwrap();
        cfg.vision.conf_threshold = 1.5;
        assert!(cfg.doctor().is_err());

        let mut cfg: Config = toml::from_str(MINIMAL).unwrap();
        cfg.vision.input_size = 100;
        assert!(cfg.doctor().is_err());

        let mut cfg: Config = toml::from_str(MINIMAL).unwrap();
        cfg.vision.quantized = true;
        assert!(cfg.doctor().is_err(), "quantized without output_scale");

        let mut cfg: Config = toml::from_str(MINIMAL).unwrap();
        cfg.speech.voices.insert("fr".into(), "fr".into());
        assert!(cfg.doctor().is_err());
    }

    #[test]
    fn labels_from_file() {
        let path = std::env::temp_dir().join(format!("beacon-labels-{}.txt", std::process::id()));
        std::fs::write(&path, "person\n\n car \nchair\n").unwrap();
        let cfg: Config = toml::from_str(&format!(
            "[vision]\nmodel_path = \"Cargo.toml\"\nlabels_path = \"{}\"\n",
            path.display()
        ))
        .unwrap();
        assert_eq!(cfg.vision.labels().unwrap(), vec!["person", "car", "chair"]);
        let _ = std::fs::remove_file(path);
    }
}
