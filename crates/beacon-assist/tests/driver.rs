use std::sync::Arc;
use std::time::Duration;

use beacon_assist::driver::{
    event_channel, Collaborators, EventSender, Haptics, Recognizer, SessionDriver, SessionHandle, Synthesizer,
    TextReader,
};
use beacon_assist::emergency::{GeoPoint, Telephony};
use beacon_assist::machine::{Event, InteractionState, QueueMode, Session, Timings, UtteranceId};
use beacon_assist::Language;
use beacon_vision::{Detection, Rect};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Probe = mpsc::UnboundedSender<String>;

struct FakeSynth {
    probe: Probe,
    events: EventSender,
    supported: Vec<Language>,
}

impl Synthesizer for FakeSynth {
    fn set_language(&mut self, lang: Language) -> anyhow::Result<()> {
        anyhow::ensure!(self.supported.contains(&lang), "no voice for {lang}");
        let _ = self.probe.send(format!("lang:{lang}"));
        Ok(())
    }

    fn speak(&mut self, id: UtteranceId, text: &str, _queue: QueueMode) -> anyhow::Result<()> {
        let _ = self.probe.send(format!("say:{text}"));
        self.events.send(Event::SpeechStarted(id))?;
        self.events.send(Event::SpeechDone(id))?;
        Ok(())
    }

    fn stop(&mut self) {
        let _ = self.probe.send("hush".into());
    }
}

struct FakeRecognizer(Probe);

impl Recognizer for FakeRecognizer {
    fn start(&mut self, lang: Language) -> anyhow::Result<()> {
        let _ = self.0.send(format!("listen:{lang}"));
        Ok(())
    }

    fn stop(&mut self) {
        let _ = self.0.send("mute".into());
    }
}

struct FakeHaptics(Probe);

impl Haptics for FakeHaptics {
    fn vibrate(&mut self, duration: Duration) {
        let _ = self.0.send(format!("buzz:{}", duration.as_millis()));
    }
}

struct FakeReader(Probe);

impl TextReader for FakeReader {
    fn start(&mut self) -> anyhow::Result<()> {
        let _ = self.0.send("ocr".into());
        Ok(())
    }
}

struct FakePhone {
    probe: Probe,
    call_ok: bool,
}

impl Telephony for FakePhone {
    fn last_known_location(&self) -> Option<GeoPoint> {
        Some(GeoPoint { lat: 12.5, lon: 77.25 })
    }

    fn send_sms(&self, to: &str, body: &str) -> anyhow::Result<()> {
        let _ = self.probe.send(format!("sms:{to}:{body}"));
        Ok(())
    }

    fn call(&self, to: &str) -> anyhow::Result<()> {
        let _ = self.probe.send(format!("call:{to}"));
        anyhow::ensure!(self.call_ok, "call rejected");
        Ok(())
    }
}

struct Rig {
    handle: SessionHandle,
    probe: mpsc::UnboundedReceiver<String>,
    task: JoinHandle<Session>,
}

impl Rig {
    fn start(lang: Language, supported: Vec<Language>, call_ok: bool) -> Self {
        let (probe_tx, probe) = mpsc::unbounded_channel();
        let (tx, rx) = event_channel();
        let collab = Collaborators {
            synthesizer: Box::new(FakeSynth { probe: probe_tx.clone(), events: tx.clone(), supported }),
            recognizer: Box::new(FakeRecognizer(probe_tx.clone())),
            haptics: Box::new(FakeHaptics(probe_tx.clone())),
            reader: Box::new(FakeReader(probe_tx.clone())),
            telephony: Arc::new(FakePhone { probe: probe_tx, call_ok }),
            emergency_contact: "112".into(),
        };
        let driver = SessionDriver::new(Session::new(lang, Timings::default()), collab, tx, rx);
        let handle = driver.handle();
        let task = tokio::spawn(driver.run());
        handle.events.send(Event::SessionStarted).unwrap();
        Rig { handle, probe, task }
    }

    fn send(&self, ev: Event) {
        self.handle.events.send(ev).unwrap();
    }

    /// Next probe line with `prefix`, skipping anything else.
    async fn next(&mut self, prefix: &str) -> String {
        loop {
            let line = self.probe.recv().await.expect("probe closed");
            if line.starts_with(prefix) {
                return line;
            }
        }
    }

    async fn finish(self) -> (Session, mpsc::UnboundedReceiver<String>) {
        self.send(Event::SessionEnded);
        (self.task.await.unwrap(), self.probe)
    }
}

fn chair(distance_m: f32) -> Detection {
    Detection {
        class_id: 56,
        label: "chair".into(),
        confidence: 0.9,
        rect: Rect::new(0.0, 0.0, 50.0, 120.0),
        distance_m: Some(distance_m),
    }
}

#[tokio::test(start_paused = true)]
async fn prompt_then_listen_then_detect() {
    let mut rig = Rig::start(Language::English, Language::ALL.to_vec(), true);
    assert_eq!(rig.next("say").await, "say:What do you need?");
    assert_eq!(rig.next("listen").await, "listen:en");

    rig.send(Event::RecognizerResult("detect".into()));
    let mut detection = rig.handle.detection.clone();
    detection.wait_for(|on| *on).await.unwrap();
    rig.next("listen").await;

    rig.send(Event::DetectionReady(Some(chair(2.0))));
    assert_eq!(rig.next("say").await, "say:chair, 2.0 meters");
    rig.next("listen").await;

    // inside the announcement interval, so the next line spoken is the stop confirmation
    rig.send(Event::DetectionReady(Some(chair(1.0))));
    rig.send(Event::RecognizerResult("stop".into()));
    assert_eq!(rig.next("say").await, "say:Stopping detection");
    detection.wait_for(|on| !*on).await.unwrap();

    let (session, _) = rig.finish().await;
    assert!(!session.is_active());
}

#[tokio::test(start_paused = true)]
async fn unrecognized_speech_relistens_after_a_second() {
    let mut rig = Rig::start(Language::English, Language::ALL.to_vec(), true);
    rig.next("listen").await;

    let t0 = Instant::now();
    rig.send(Event::RecognizerResult("umm".into()));
    rig.next("listen").await;
    assert!(t0.elapsed() >= Duration::from_millis(1000));
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn emergency_sequence_runs_after_delay_then_cools_down() {
    let mut rig = Rig::start(Language::English, Language::ALL.to_vec(), true);
    rig.next("listen").await;

    let t0 = Instant::now();
    rig.send(Event::Shake);
    assert_eq!(rig.next("mute").await, "mute");
    assert_eq!(rig.next("say").await, "say:Emergency activated. Calling now.");
    assert_eq!(rig.next("buzz").await, "buzz:500");

    let sms = rig.next("sms").await;
    assert_eq!(sms, "sms:112:EMERGENCY! My location: https://maps.google.com/?q=12.5,77.25");
    assert!(t0.elapsed() >= Duration::from_millis(4000));
    assert_eq!(rig.next("call").await, "call:112");

    let mut state = rig.handle.state.clone();
    state.wait_for(|s| *s != InteractionState::Emergency).await.unwrap();
    assert!(t0.elapsed() >= Duration::from_millis(19_000));
    assert_eq!(rig.next("say").await, "say:What do you need?");
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn failed_call_returns_to_idle_and_can_retry() {
    let mut rig = Rig::start(Language::English, Language::ALL.to_vec(), false);
    rig.next("listen").await;

    let t0 = Instant::now();
    rig.send(Event::Shake);
    rig.next("call").await;
    let mut state = rig.handle.state.clone();
    state.wait_for(|s| *s != InteractionState::Emergency).await.unwrap();
    assert!(t0.elapsed() < Duration::from_millis(15_000));

    rig.send(Event::Shake);
    assert_eq!(rig.next("buzz").await, "buzz:500");
    rig.next("call").await;
    rig.finish().await;
}

#[tokio::test(start_paused = true)]
async fn ending_the_session_cancels_the_pending_call() {
    let mut rig = Rig::start(Language::English, Language::ALL.to_vec(), true);
    rig.next("listen").await;
    rig.send(Event::Shake);
    rig.next("buzz").await;

    let (session, mut probe) = rig.finish().await;
    assert_eq!(session.state(), InteractionState::Idle);
    tokio::time::sleep(Duration::from_secs(10)).await;

    let mut rest = Vec::new();
    while let Ok(line) = probe.try_recv() {
        rest.push(line);
    }
    assert!(rest.iter().any(|l| l == "hush"));
    assert!(!rest.iter().any(|l| l.starts_with("call") || l.starts_with("sms")));
}

#[tokio::test(start_paused = true)]
async fn missing_voice_falls_back_to_english() {
    let mut rig = Rig::start(Language::Telugu, vec![Language::English], true);
    assert_eq!(rig.next("lang").await, "lang:en");
    let (session, _) = rig.finish().await;
    assert_eq!(session.language(), Language::English);
}
