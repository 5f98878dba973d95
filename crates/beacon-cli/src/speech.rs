//! Console stand-ins for the phone's speech services: a command-line TTS
//! (espeak-ng by default) and a recognizer fed from stdin.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use beacon_assist::driver::{EventSender, Recognizer, Synthesizer};
use beacon_assist::machine::{Event, QueueMode, UtteranceId};
use beacon_assist::Language;

/// Strip characters that could confuse the TTS argument parser.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() && !matches!(c, ';' | '|' | '&' | '$' | '`' | '<' | '>'))
        .take(2000)
        .collect()
}

pub struct CommandSynthesizer {
    command: String,
    voices: HashMap<Language, String>,
    voice: String,
    events: EventSender,
    // one utterance at a time, FIFO
    speaker: Arc<Mutex<()>>,
    inflight: Vec<JoinHandle<()>>,
}

impl CommandSynthesizer {
    pub fn new(command: String, voices: HashMap<Language, String>, events: EventSender) -> Self {
        Self { command, voices, voice: Language::English.code().into(), events, speaker: Arc::new(Mutex::new(())), inflight: Vec::new() }
    }

    fn flush(&mut self) {
        // dropping the child kills it (kill_on_drop)
        for h in self.inflight.drain(..) {
            h.abort();
        }
    }
}

impl Synthesizer for CommandSynthesizer {
    fn set_language(&mut self, lang: Language) -> Result<()> {
        let voice = self.voices.get(&lang).ok_or_else(|| anyhow::anyhow!("no voice for {}", lang))?;
        self.voice = voice.clone();
        debug!("tts: voice {}", self.voice);
        Ok(())
    }

    fn speak(&mut self, id: UtteranceId, text: &str, queue: QueueMode) -> Result<()> {
        let text = sanitize(text);
        anyhow::ensure!(!text.is_empty(), "nothing to say");
        if queue == QueueMode::Flush {
            self.flush();
        }
        self.inflight.retain(|h| !h.is_finished());

        println!("[beacon] {}", text);
        let mut cmd = Command::new(&self.command);
        cmd.args(["-v", &self.voice, &text])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let speaker = self.speaker.clone();
        let events = self.events.clone();
        self.inflight.push(tokio::spawn(async move {
            let _turn = speaker.lock().await;
            let _ = events.send(Event::SpeechStarted(id));
            let done = match cmd.output().await {
                Ok(out) if out.status.success() => Event::SpeechDone(id),
                Ok(out) => {
                    warn!("tts: exited {}: {}", out.status, String::from_utf8_lossy(&out.stderr).trim());
                    Event::SpeechError(id)
                }
                Err(e) => {
                    warn!("tts: spawn failed: {}", e);
                    Event::SpeechError(id)
                }
            };
            let _ = events.send(done);
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.flush();
    }
}

/// Treats each stdin line as one recognition result while armed.
pub struct ConsoleRecognizer {
    armed: Arc<AtomicBool>,
}

impl ConsoleRecognizer {
    pub fn new(armed: Arc<AtomicBool>) -> Self {
        Self { armed }
    }
}

impl Recognizer for ConsoleRecognizer {
    fn start(&mut self, lang: Language) -> Result<()> {
        self.armed.store(true, Ordering::Release);
        println!("[listening:{}] >", lang.locale_tag());
        Ok(())
    }

    fn stop(&mut self) {
        self.armed.store(false, Ordering::Release);
    }
}

/// Hand a heard line to the session if the recognizer is armed.
pub fn deliver(line: &str, armed: &AtomicBool, events: &EventSender) -> Result<()> {
    if armed.swap(false, Ordering::AcqRel) {
        events.send(Event::RecognizerResult(line.to_string()))?;
    } else {
        info!("console: not listening, ignored {:?}", line);
    }
    Ok(())
}
