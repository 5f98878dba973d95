//! Tokio runtime for a [`Session`].
//!
//! One task owns the session and is its only writer. Recognizer, synthesizer,
//! sensor and timer callbacks are posted to it as [`Event`]s through an
//! unbounded channel and handled strictly in arrival order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::commands::Language;
use crate::emergency::{self, Telephony};
use crate::machine::{Effect, Event, InteractionState, QueueMode, Session, TimerId, UtteranceId, UtteranceKind};
use crate::InteractionError;

/// Text to speech. `speak` returns once the utterance is queued; the
/// implementation must later post `SpeechDone` or `SpeechError` for `id`.
pub trait Synthesizer: Send {
    fn set_language(&mut self, lang: Language) -> anyhow::Result<()>;
    fn speak(&mut self, id: UtteranceId, text: &str, queue: QueueMode) -> anyhow::Result<()>;
    fn stop(&mut self);
}

/// One-shot speech recognition. After `start` the implementation posts
/// exactly one `RecognizerResult` or `RecognizerError`.
pub trait Recognizer: Send {
    fn start(&mut self, lang: Language) -> anyhow::Result<()>;
    fn stop(&mut self);
}

pub trait Haptics: Send {
    fn vibrate(&mut self, duration: Duration);
}

/// Hands the camera to the text-reading flow.
pub trait TextReader: Send {
    fn start(&mut self) -> anyhow::Result<()>;
}

pub struct Collaborators {
    pub synthesizer: Box<dyn Synthesizer>,
    pub recognizer: Box<dyn Recognizer>,
    pub haptics: Box<dyn Haptics>,
    pub reader: Box<dyn TextReader>,
    pub telephony: Arc<dyn Telephony>,
    pub emergency_contact: String,
}

#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<Event>);

impl EventSender {
    pub fn send(&self, ev: Event) -> Result<(), InteractionError> {
        self.0.send(ev).map_err(|_| InteractionError::SessionClosed)
    }
}

#[derive(Debug)]
pub struct EventReceiver(mpsc::UnboundedReceiver<Event>);

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender(tx), EventReceiver(rx))
}

/// What the rest of the process needs to talk to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub events: EventSender,
    /// True while frames should be run through the detector.
    pub detection: watch::Receiver<bool>,
    pub state: watch::Receiver<InteractionState>,
}

pub struct SessionDriver {
    session: Session,
    collab: Collaborators,
    events: EventSender,
    rx: EventReceiver,
    timers: HashMap<TimerId, JoinHandle<()>>,
    clock: Instant,
    detection: watch::Sender<bool>,
    state: watch::Sender<InteractionState>,
}

impl SessionDriver {
    pub fn new(session: Session, collab: Collaborators, events: EventSender, rx: EventReceiver) -> Self {
        let (detection, _) = watch::channel(false);
        let (state, _) = watch::channel(session.state());
        Self {
            session,
            collab,
            events,
            rx,
            timers: HashMap::new(),
            clock: Instant::now(),
            detection,
            state,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            events: self.events.clone(),
            detection: self.detection.subscribe(),
            state: self.state.subscribe(),
        }
    }

    /// Process events until `SessionEnded`, then release every collaborator.
    pub async fn run(mut self) -> Session {
        info!("session: driver running");
        while let Some(ev) = self.rx.0.recv().await {
            let ended = ev == Event::SessionEnded;
            self.dispatch(ev);
            if ended {
                break;
            }
        }
        self.teardown();
        info!("session: driver stopped");
        self.session
    }

    fn now_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }

    fn dispatch(&mut self, ev: Event) {
        // collaborator failures feed back synchronously, ahead of queued events
        let mut pending = VecDeque::from([ev]);
        while let Some(ev) = pending.pop_front() {
            if let Event::TimerFired(id) = ev {
                self.timers.remove(&id);
            }
            let now = self.now_ms();
            for effect in self.session.handle(ev, now) {
                self.apply(effect, &mut pending);
            }
        }
        self.state.send_replace(self.session.state());
    }

    fn apply(&mut self, effect: Effect, pending: &mut VecDeque<Event>) {
        debug!("effect: {:?}", effect);
        match effect {
            Effect::Speak { id, text, kind, queue } => {
                match kind {
                    UtteranceKind::Announcement => info!("announce: {}", text),
                    UtteranceKind::Emergency => warn!("emergency: {}", text),
                    UtteranceKind::Prompt | UtteranceKind::Confirmation => debug!("say: {}", text),
                }
                if let Err(e) = self.collab.synthesizer.speak(id, &text, queue) {
                    warn!("tts: {:#}", e);
                    pending.push_back(Event::SpeechError(id));
                }
            }
            Effect::StopSpeaking => self.collab.synthesizer.stop(),
            Effect::StartListening(lang) => {
                if let Err(e) = self.collab.recognizer.start(lang) {
                    pending.push_back(Event::RecognizerStartFailed(format!("{e:#}")));
                }
            }
            Effect::StopListening => self.collab.recognizer.stop(),
            Effect::SetLanguage(lang) => {
                if let Err(e) = self.collab.synthesizer.set_language(lang) {
                    warn!("tts: set language {}: {:#}", lang, e);
                    pending.push_back(Event::LanguageUnsupported(lang));
                }
            }
            Effect::SetDetection(on) => {
                self.detection.send_replace(on);
            }
            Effect::StartReading => {
                if let Err(e) = self.collab.reader.start() {
                    warn!("reader: {:#}", e);
                }
            }
            Effect::Vibrate(d) => self.collab.haptics.vibrate(d),
            Effect::Schedule { id, after, .. } => {
                let tx = self.events.clone();
                let h = tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(Event::TimerFired(id));
                });
                self.timers.insert(id, h);
            }
            Effect::CancelTimer(id) => {
                if let Some(h) = self.timers.remove(&id) {
                    h.abort();
                }
            }
            Effect::CancelAllTimers => self.abort_timers(),
            Effect::RunEmergencyActions(_) => self.spawn_emergency_actions(),
        }
    }

    fn spawn_emergency_actions(&self) {
        let telephony = self.collab.telephony.clone();
        let contact = self.collab.emergency_contact.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let res = tokio::task::spawn_blocking(move || emergency::perform(telephony.as_ref(), &contact)).await;
            let res = match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(InteractionError::EmergencyAction(msg))) => Err(msg),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("emergency task: {e}")),
            };
            if tx.send(Event::EmergencyActionsFinished(res)).is_err() {
                debug!("emergency: session ended before actions finished");
            }
        });
    }

    fn abort_timers(&mut self) {
        for (_, h) in self.timers.drain() {
            h.abort();
        }
    }

    fn teardown(&mut self) {
        self.abort_timers();
        self.collab.recognizer.stop();
        self.collab.synthesizer.stop();
        self.detection.send_replace(false);
        self.state.send_replace(self.session.state());
    }
}
