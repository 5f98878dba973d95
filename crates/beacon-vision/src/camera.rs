use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

use crate::preprocess::CameraFrame;

fn default_rotation() -> i32 { 0 }
fn default_true() -> bool { true }

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraConfig {
    pub mode: String,   // "libcamera-jpeg" | "v4l2-mjpeg" | "file"
    #[serde(default)]
    pub device: String, // /dev/video0 (v4l2)
    #[serde(default)]
    pub path: String,   // still image for "file"
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(default = "default_rotation")]
    pub rotation: i32,
    #[serde(default = "default_true")]
    pub maintain_aspect: bool,
}

/// Grab one frame and decode it to RGB.
/// - libcamera-jpeg: `libcamera-still -n -t 1 --width ... --height ... -o -`
/// - v4l2-mjpeg: one MJPEG frame through `ffmpeg`
/// - file: re-read a still from disk every tick (bench and replay)
pub async fn capture_frame(cfg: &CameraConfig) -> Result<CameraFrame> {
    let jpeg = match cfg.mode.as_str() {
        "libcamera-jpeg" => capture_libcamera(cfg).await?,
        "v4l2-mjpeg" => capture_v4l2_ffmpeg(cfg).await?,
        "file" => tokio::fs::read(&cfg.path)
            .await
            .with_context(|| format!("read frame file {}", cfg.path))?,
        other => anyhow::bail!("unknown camera.mode: {}", other),
    };
    decode_frame(&jpeg, cfg.rotation)
}

pub fn decode_frame(encoded: &[u8], rotation: i32) -> Result<CameraFrame> {
    let img = image::load_from_memory(encoded).context("decode camera frame")?;
    Ok(CameraFrame { image: img.to_rgb8(), rotation })
}

async fn capture_libcamera(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("libcamera-still");
    cmd.args([
        "-n",                 // no preview
        "-t", "1",            // 1ms
        "--width", &cfg.width.to_string(),
        "--height", &cfg.height.to_string(),
        "-o", "-",            // stdout
    ]);

    debug!("capture: libcamera-still");
    let out = cmd.output().await.context("run libcamera-still")?;
    anyhow::ensure!(out.status.success(), "libcamera-still failed");
    Ok(out.stdout)
}

async fn capture_v4l2_ffmpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-hide_banner","-loglevel","error",
        "-f","video4linux2",
        "-input_format","mjpeg",
        "-video_size",&format!("{}x{}", cfg.width, cfg.height),
        "-i",&cfg.device,
        "-vframes","1",
        "-f","image2pipe",
        "-vcodec","mjpeg",
        "-",
    ]);

    debug!("capture: ffmpeg v4l2");
    let out = cmd.output().await.context("run ffmpeg capture")?;
    anyhow::ensure!(out.status.success(), "ffmpeg capture failed");
    Ok(out.stdout)
}
