use std::sync::{atomic::AtomicBool, Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use beacon_assist::driver::{event_channel, Collaborators, EventSender, SessionDriver};
use beacon_assist::machine::{Event, Session};
use beacon_assist::shake::ShakeDetector;
use beacon_vision::camera;
use beacon_vision::decode::{OutputDecoder, OutputFormat, OutputGeometry, RawOutputTensor};
use beacon_vision::engine::{Backend, EngineOptions, InferenceEngine};
use beacon_vision::pipeline::{admitted_frame, decoder_for, DetectionPipeline, FrameGate, SharedEngine};
use beacon_vision::score::ClassScorer;

#[cfg(feature = "vision-tflite")]
use beacon_vision::tflite::TfliteEngine;

mod config;
mod hooks;
mod speech;

use config::{load_config, Config};

#[derive(Debug, Parser)]
#[command(name = "beacon", version, about = "Beacon - spoken obstacle detection for blind and low-vision users")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Decode a raw output tensor dump and print the detections as JSON.
    Decode {
        #[arg(long)]
        tensor: String,
        /// Dump holds little-endian f32 values instead of quantized bytes.
        #[arg(long)]
        float: bool,
    },
    Vision { #[command(subcommand)] cmd: VisionCmd },
    Run,
}

#[derive(Debug, Subcommand)]
enum VisionCmd { Inspect }

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Decode { tensor, float } => decode(&cfg, &tensor, float)?,
        Command::Vision { cmd } => vision_cmd(&cfg, cmd)?,
        Command::Run => run(&cfg).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    cfg.doctor()?;

    #[cfg(feature = "vision-tflite")]
    {
        let engine = init_engine(cfg)?;
        let labels = cfg.vision.labels()?;
        let pipeline = build_pipeline(cfg, decoder_for(engine.spec(), labels.len())?)?;
        pipeline.check_engine(engine.spec())?;
        info!("doctor: model matches labels and input size");
    }

    info!("doctor: OK");
    println!("OK");
    Ok(())
}

fn build_pipeline(cfg: &Config, decoder: OutputDecoder) -> Result<DetectionPipeline> {
    let scorer = ClassScorer::new(cfg.vision.labels()?, decoder.geometry(), cfg.vision.conf_threshold)?;
    let estimator = Box::new(cfg.distance.estimator()?);
    Ok(DetectionPipeline::new(
        decoder,
        scorer,
        cfg.vision.nms_iou_threshold,
        cfg.frame_geometry()?,
        estimator,
    )?)
}

fn decode(cfg: &Config, tensor: &str, float: bool) -> Result<()> {
    let bytes = std::fs::read(tensor).with_context(|| format!("read tensor {}", tensor))?;
    let geometry = OutputGeometry::new(cfg.vision.input_size, cfg.vision.labels()?.len())?;

    let (raw, format) = if float {
        anyhow::ensure!(bytes.len() % 4 == 0, "f32 dump length {} is not a multiple of 4", bytes.len());
        let values = bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect();
        (RawOutputTensor::Float(values), OutputFormat::Float)
    } else {
        match cfg.vision.output_format()? {
            q @ OutputFormat::Quantized(_) => (RawOutputTensor::Quantized(bytes), q),
            OutputFormat::Float => {
                anyhow::bail!("byte dump needs vision.quantized = true and output_scale; use --float for f32 dumps")
            }
        }
    };

    let pipeline = build_pipeline(cfg, OutputDecoder::new(geometry, format)?)?;
    let result = pipeline.process(&raw)?;
    let out = serde_json::json!({
        "detections": &result.detections,
        "best": &result.best,
        "announcement": result.best.as_ref().and_then(|b| b.spoken()),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Inspect => {
            #[cfg(feature = "vision-tflite")]
            {
                let engine = TfliteEngine::new(&cfg.vision.model_path, cfg.vision.engine_options())?;
                print!("{}", engine.inspect()?);
                return Ok(());
            }
            #[allow(unreachable_code)]
            {
                let _ = cfg;
                anyhow::bail!("vision backend not available; build with --features vision-tflite");
            }
        }
    }
}

fn init_engine(cfg: &Config) -> Result<Box<dyn InferenceEngine>> {
    #[cfg(feature = "vision-tflite")]
    {
        let engine = TfliteEngine::new(&cfg.vision.model_path, cfg.vision.engine_options())?;
        return Ok(Box::new(engine));
    }
    #[allow(unreachable_code)]
    {
        let _ = cfg;
        anyhow::bail!("vision backend not available; build with --features vision-tflite")
    }
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let camera_cfg = cfg.camera.clone().context("no [camera] config section")?;
    let engine = init_engine(cfg)?;
    let labels = cfg.vision.labels()?;
    let pipeline = build_pipeline(cfg, decoder_for(engine.spec(), labels.len())?)?;
    pipeline.check_engine(engine.spec())?;

    let (tx, rx) = event_channel();
    let armed = Arc::new(AtomicBool::new(false));
    let collab = Collaborators {
        synthesizer: Box::new(speech::CommandSynthesizer::new(
            cfg.speech.tts_command.clone(),
            cfg.speech.voice_table()?,
            tx.clone(),
        )),
        recognizer: Box::new(speech::ConsoleRecognizer::new(armed.clone())),
        haptics: Box::new(hooks::LogHaptics),
        reader: Box::new(hooks::CommandReader { command: cfg.reader.command.clone() }),
        telephony: Arc::new(hooks::ShellTelephony {
            sms_command: cfg.emergency.sms_command.clone(),
            call_command: cfg.emergency.call_command.clone(),
            location_command: cfg.emergency.location_command.clone(),
        }),
        emergency_contact: cfg.emergency.contact_number.clone().unwrap_or_default(),
    };
    let driver = SessionDriver::new(
        Session::new(cfg.interaction.language, cfg.interaction.timings()),
        collab,
        tx,
        rx,
    );
    let handle = driver.handle();
    let session = tokio::spawn(driver.run());
    handle.events.send(Event::SessionStarted)?;

    let engine: SharedEngine = Arc::new(Mutex::new(engine));
    let pipeline = Arc::new(pipeline);
    let gate = FrameGate::new();

    tokio::spawn(console_loop(
        handle.events.clone(),
        armed,
        engine.clone(),
        cfg.vision.engine_options(),
        ShakeDetector::new(cfg.interaction.shake_threshold),
    ));

    let period = Duration::from_secs_f32(1.0 / camera_cfg.fps.max(1) as f32);
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("run: interrupted");
                break;
            }
            _ = tick.tick() => {}
        }
        if session.is_finished() {
            break;
        }
        if !*handle.detection.borrow() {
            continue;
        }
        // admission happens here so a busy cycle skips the capture and nothing queues
        let Some(guard) = gate.try_enter() else {
            continue;
        };

        let frame = match camera::capture_frame(&camera_cfg).await {
            Ok(f) => f,
            Err(e) => {
                warn!("camera: {:#}", e);
                continue;
            }
        };

        let (pipeline, engine, events) = (pipeline.clone(), engine.clone(), handle.events.clone());
        tokio::task::spawn_blocking(move || {
            if let Some(res) = admitted_frame(guard, &pipeline, &engine, &frame) {
                let _ = events.send(Event::DetectionReady(res.best));
            }
        });
    }

    let _ = handle.events.send(Event::SessionEnded);
    let s = session.await?;
    info!("run: session ended ({:?}, language {})", s.state(), s.language());
    Ok(())
}

/// Stdin stands in for the microphone and motion sensor. Plain lines are
/// speech; lines starting with `!` are controls:
/// `!shake`, `!accel <x> <y> <z>`, `!stop`, `!threads <n>`, `!backend <cpu|gpu|nnapi>`, `!quit`.
async fn console_loop(
    events: EventSender,
    armed: Arc<AtomicBool>,
    engine: SharedEngine,
    mut options: EngineOptions,
    mut shake: ShakeDetector,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let res = match line.strip_prefix('!') {
            None => speech::deliver(line, &armed, &events),
            Some(ctl) => control(ctl, &events, &engine, &mut options, &mut shake),
        };
        if let Err(e) = res {
            warn!("console: {:#}", e);
        }
    }
    info!("console: stdin closed");
    events.send(Event::SessionEnded)?;
    Ok(())
}

fn control(
    ctl: &str,
    events: &EventSender,
    engine: &SharedEngine,
    options: &mut EngineOptions,
    shake: &mut ShakeDetector,
) -> Result<()> {
    let mut parts = ctl.split_whitespace();
    match parts.next() {
        Some("shake") => events.send(Event::Shake)?,
        Some("accel") => {
            let v = parts.map(str::parse::<f32>).collect::<Result<Vec<_>, _>>()?;
            anyhow::ensure!(v.len() == 3, "usage: !accel <x> <y> <z>");
            if shake.feed(v[0], v[1], v[2]) {
                events.send(Event::Shake)?;
            }
        }
        Some("stop") => events.send(Event::StopRequested)?,
        Some("quit") => events.send(Event::SessionEnded)?,
        Some("threads") => {
            let n: u32 = parts.next().context("usage: !threads <n>")?.parse()?;
            anyhow::ensure!(n > 0, "threads must be > 0");
            reconfigure(engine, options, EngineOptions { num_threads: n, ..*options })?;
        }
        Some("backend") => {
            let b: Backend = parts.next().context("usage: !backend <cpu|gpu|nnapi>")?.parse()?;
            reconfigure(engine, options, EngineOptions { backend: b, ..*options })?;
        }
        other => anyhow::bail!("unknown control {:?}", other),
    }
    Ok(())
}

fn reconfigure(engine: &SharedEngine, current: &mut EngineOptions, next: EngineOptions) -> Result<()> {
    let mut engine = engine.lock().map_err(|_| anyhow::anyhow!("engine lock poisoned"))?;
    engine.reconfigure(next)?;
    *current = next;
    info!("vision: engine now {} threads on {:?}", next.num_threads, next.backend);
    Ok(())
}
