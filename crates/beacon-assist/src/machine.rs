//! Interaction state machine.
//!
//! `Session` is pure: it consumes one `Event` at a time with the current
//! monotonic time and returns the `Effect`s the driver must carry out. All
//! timers, recognizer and synthesizer callbacks come back in as events, so
//! every transition is serialized through `handle`.

use std::collections::BTreeMap;
use std::time::Duration;

use beacon_vision::Detection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::commands::{self, phrase, Command, Language, Phrase};
use crate::throttle::{AnnouncementThrottle, DEFAULT_ANNOUNCE_INTERVAL_MS};
use crate::InteractionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InteractionState {
    Idle,
    Listening,
    Detecting,
    Emergency,
}

pub type UtteranceId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Relisten,
    EmergencyActions,
    EmergencyCooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Interrupt whatever is playing.
    Flush,
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceKind {
    Prompt,
    Confirmation,
    Announcement,
    Emergency,
}

#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub announce_interval_ms: u64,
    pub relisten_delay_ms: u64,
    pub emergency_delay_ms: u64,
    pub emergency_cooldown_ms: u64,
    pub haptic_pulse_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            announce_interval_ms: DEFAULT_ANNOUNCE_INTERVAL_MS,
            relisten_delay_ms: 1000,
            emergency_delay_ms: 4000,
            emergency_cooldown_ms: 15_000,
            haptic_pulse_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SessionStarted,
    SessionEnded,
    RecognizerResult(String),
    RecognizerError(String),
    RecognizerStartFailed(String),
    SpeechStarted(UtteranceId),
    SpeechDone(UtteranceId),
    SpeechError(UtteranceId),
    LanguageUnsupported(Language),
    /// Best match of the latest processed frame.
    DetectionReady(Option<Detection>),
    Shake,
    StopRequested,
    TimerFired(TimerId),
    EmergencyActionsFinished(Result<(), String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Speak { id: UtteranceId, text: String, kind: UtteranceKind, queue: QueueMode },
    StopSpeaking,
    StartListening(Language),
    StopListening,
    SetLanguage(Language),
    SetDetection(bool),
    StartReading,
    Vibrate(Duration),
    Schedule { id: TimerId, kind: TimerKind, after: Duration },
    CancelTimer(TimerId),
    CancelAllTimers,
    RunEmergencyActions(Language),
}

#[derive(Debug)]
pub struct Session {
    timings: Timings,
    state: InteractionState,
    language: Language,
    active: bool,
    listening: bool,
    speaking: Option<UtteranceId>,
    next_utterance: UtteranceId,
    next_timer: u64,
    timers: BTreeMap<TimerId, TimerKind>,
    throttle: AnnouncementThrottle,
}

impl Session {
    pub fn new(language: Language, timings: Timings) -> Self {
        Self {
            timings,
            state: InteractionState::Idle,
            language,
            active: false,
            listening: false,
            speaking: None,
            next_utterance: 1,
            next_timer: 1,
            timers: BTreeMap::new(),
            throttle: AnnouncementThrottle::new(timings.announce_interval_ms),
        }
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.is_some()
    }

    pub fn pending_timers(&self) -> impl Iterator<Item = (TimerId, TimerKind)> + '_ {
        self.timers.iter().map(|(id, k)| (*id, *k))
    }

    pub fn handle(&mut self, event: Event, now_ms: u64) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.active && event != Event::SessionStarted {
            debug!("session: inactive, ignoring {:?}", event);
            return fx;
        }
        let before = self.state;

        match event {
            Event::SessionStarted => self.start(&mut fx),
            Event::SessionEnded => self.end(&mut fx),
            Event::RecognizerResult(text) => self.on_result(&text, &mut fx),
            Event::RecognizerError(msg) => {
                debug!("recognizer: {}", msg);
                self.on_recognizer_failure(&mut fx);
            }
            Event::RecognizerStartFailed(msg) => {
                warn!("{}", InteractionError::RecognizerStart(msg));
                self.on_recognizer_failure(&mut fx);
            }
            Event::SpeechStarted(id) => {
                if id + 1 == self.next_utterance {
                    self.speaking = Some(id);
                    self.stop_listening(&mut fx);
                }
            }
            Event::SpeechDone(id) | Event::SpeechError(id) => self.on_speech_finished(id, &mut fx),
            Event::LanguageUnsupported(lang) => {
                if lang == self.language && lang != Language::English {
                    warn!("tts: {} unsupported, falling back to en", lang);
                    self.language = Language::English;
                    fx.push(Effect::SetLanguage(Language::English));
                }
            }
            Event::DetectionReady(best) => self.on_detection(best, now_ms, &mut fx),
            Event::Shake => self.enter_emergency(&mut fx),
            Event::StopRequested => self.stop_detection(&mut fx),
            Event::TimerFired(id) => self.on_timer(id, &mut fx),
            Event::EmergencyActionsFinished(res) => self.on_emergency_finished(res, &mut fx),
        }

        if self.state != before {
            debug!("session: {:?} -> {:?}", before, self.state);
        }
        fx
    }

    fn start(&mut self, fx: &mut Vec<Effect>) {
        self.cancel_all(fx);
        self.stop_listening(fx);
        self.active = true;
        self.state = InteractionState::Idle;
        self.speaking = None;
        self.throttle.reset();
        fx.push(Effect::SetLanguage(self.language));
        fx.push(Effect::SetDetection(false));
        self.speak(phrase(self.language, Phrase::Prompt), UtteranceKind::Prompt, QueueMode::Flush, fx);
    }

    fn end(&mut self, fx: &mut Vec<Effect>) {
        self.cancel_all(fx);
        self.stop_listening(fx);
        if self.state == InteractionState::Detecting {
            fx.push(Effect::SetDetection(false));
        }
        if self.speaking.take().is_some() {
            fx.push(Effect::StopSpeaking);
        }
        self.state = InteractionState::Idle;
        self.active = false;
    }

    fn speak(&mut self, text: &str, kind: UtteranceKind, queue: QueueMode, fx: &mut Vec<Effect>) {
        let id = self.next_utterance;
        self.next_utterance += 1;
        // half duplex: never listen over our own voice
        self.stop_listening(fx);
        self.speaking = Some(id);
        fx.push(Effect::Speak { id, text: text.to_string(), kind, queue });
    }

    fn stop_listening(&mut self, fx: &mut Vec<Effect>) {
        if self.listening {
            self.listening = false;
            fx.push(Effect::StopListening);
        }
        if self.state == InteractionState::Listening {
            self.state = InteractionState::Idle;
        }
    }

    fn arm_listening(&mut self, fx: &mut Vec<Effect>) {
        if self.listening || self.speaking.is_some() || self.state == InteractionState::Emergency {
            return;
        }
        self.cancel_kind(TimerKind::Relisten, fx);
        self.listening = true;
        if self.state == InteractionState::Idle {
            self.state = InteractionState::Listening;
        }
        fx.push(Effect::StartListening(self.language));
    }

    fn schedule(&mut self, kind: TimerKind, after_ms: u64, fx: &mut Vec<Effect>) {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.insert(id, kind);
        fx.push(Effect::Schedule { id, kind, after: Duration::from_millis(after_ms) });
    }

    fn schedule_relisten(&mut self, fx: &mut Vec<Effect>) {
        if self.state == InteractionState::Emergency
            || self.timers.values().any(|k| *k == TimerKind::Relisten)
        {
            return;
        }
        self.schedule(TimerKind::Relisten, self.timings.relisten_delay_ms, fx);
    }

    fn cancel_kind(&mut self, kind: TimerKind, fx: &mut Vec<Effect>) {
        let ids: Vec<TimerId> = self.timers.iter().filter(|(_, k)| **k == kind).map(|(id, _)| *id).collect();
        for id in ids {
            self.timers.remove(&id);
            fx.push(Effect::CancelTimer(id));
        }
    }

    fn cancel_all(&mut self, fx: &mut Vec<Effect>) {
        self.timers.clear();
        fx.push(Effect::CancelAllTimers);
    }

    fn on_result(&mut self, text: &str, fx: &mut Vec<Effect>) {
        if !self.listening {
            debug!("recognizer: late result ignored");
            return;
        }
        self.recognizer_ended();

        let cmd = commands::parse(text, self.language);
        info!("heard {:?} -> {:?}", text, cmd);
        match cmd {
            Command::ChangeLanguage(lang) => {
                self.language = lang;
                fx.push(Effect::SetLanguage(lang));
                self.speak(phrase(lang, Phrase::LanguageChanged), UtteranceKind::Confirmation, QueueMode::Flush, fx);
                if self.state == InteractionState::Idle {
                    self.speak(phrase(lang, Phrase::Prompt), UtteranceKind::Prompt, QueueMode::Add, fx);
                }
            }
            Command::Emergency => self.enter_emergency(fx),
            Command::Detect => {
                if self.state == InteractionState::Detecting {
                    self.schedule_relisten(fx);
                    return;
                }
                self.state = InteractionState::Detecting;
                fx.push(Effect::SetDetection(true));
                self.speak(
                    phrase(self.language, Phrase::DetectionStarted),
                    UtteranceKind::Confirmation,
                    QueueMode::Flush,
                    fx,
                );
            }
            Command::Read => {
                if self.state == InteractionState::Detecting {
                    self.leave_detection(fx);
                }
                fx.push(Effect::StartReading);
                self.speak(phrase(self.language, Phrase::Reading), UtteranceKind::Confirmation, QueueMode::Flush, fx);
            }
            Command::Stop => {
                if self.state == InteractionState::Detecting {
                    self.stop_detection(fx);
                } else {
                    self.schedule_relisten(fx);
                }
            }
            Command::Unrecognized => self.schedule_relisten(fx),
        }
    }

    /// The recognizer stopped by itself, so no StopListening is needed.
    fn recognizer_ended(&mut self) {
        self.listening = false;
        if self.state == InteractionState::Listening {
            self.state = InteractionState::Idle;
        }
    }

    fn on_recognizer_failure(&mut self, fx: &mut Vec<Effect>) {
        self.recognizer_ended();
        self.schedule_relisten(fx);
    }

    fn on_speech_finished(&mut self, id: UtteranceId, fx: &mut Vec<Effect>) {
        if self.speaking != Some(id) {
            debug!("tts: utterance {} superseded", id);
            return;
        }
        self.speaking = None;
        if self.state != InteractionState::Emergency {
            self.arm_listening(fx);
        }
    }

    fn on_detection(&mut self, best: Option<Detection>, now_ms: u64, fx: &mut Vec<Effect>) {
        if self.state != InteractionState::Detecting {
            return;
        }
        let Some(det) = best else { return };
        if let Some(text) = self.throttle.offer(&det, now_ms, self.speaking.is_some()) {
            self.speak(&text, UtteranceKind::Announcement, QueueMode::Flush, fx);
        }
    }

    fn leave_detection(&mut self, fx: &mut Vec<Effect>) {
        self.state = InteractionState::Idle;
        fx.push(Effect::SetDetection(false));
    }

    fn stop_detection(&mut self, fx: &mut Vec<Effect>) {
        if self.state != InteractionState::Detecting {
            return;
        }
        self.leave_detection(fx);
        self.speak(
            phrase(self.language, Phrase::DetectionStopped),
            UtteranceKind::Confirmation,
            QueueMode::Flush,
            fx,
        );
    }

    fn enter_emergency(&mut self, fx: &mut Vec<Effect>) {
        if self.state == InteractionState::Emergency {
            debug!("emergency: already active");
            return;
        }
        warn!("emergency: triggered");
        self.cancel_all(fx);
        if self.state == InteractionState::Detecting {
            fx.push(Effect::SetDetection(false));
        }
        self.stop_listening(fx);
        self.state = InteractionState::Emergency;
        self.speak(
            phrase(self.language, Phrase::EmergencyActivated),
            UtteranceKind::Emergency,
            QueueMode::Flush,
            fx,
        );
        fx.push(Effect::Vibrate(Duration::from_millis(self.timings.haptic_pulse_ms)));
        self.schedule(TimerKind::EmergencyActions, self.timings.emergency_delay_ms, fx);
    }

    fn exit_emergency(&mut self, fx: &mut Vec<Effect>) {
        self.state = InteractionState::Idle;
        self.speak(phrase(self.language, Phrase::Prompt), UtteranceKind::Prompt, QueueMode::Flush, fx);
    }

    fn on_timer(&mut self, id: TimerId, fx: &mut Vec<Effect>) {
        let Some(kind) = self.timers.remove(&id) else {
            debug!("timer {:?}: stale", id);
            return;
        };
        match kind {
            TimerKind::Relisten => self.arm_listening(fx),
            TimerKind::EmergencyActions => {
                if self.state == InteractionState::Emergency {
                    fx.push(Effect::RunEmergencyActions(self.language));
                }
            }
            TimerKind::EmergencyCooldown => {
                if self.state == InteractionState::Emergency {
                    self.exit_emergency(fx);
                }
            }
        }
    }

    fn on_emergency_finished(&mut self, res: Result<(), String>, fx: &mut Vec<Effect>) {
        if self.state != InteractionState::Emergency {
            return;
        }
        match res {
            Ok(()) => self.schedule(TimerKind::EmergencyCooldown, self.timings.emergency_cooldown_ms, fx),
            Err(msg) => {
                warn!("{}; resetting", InteractionError::EmergencyAction(msg));
                self.exit_emergency(fx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> (Session, UtteranceId) {
        let mut s = Session::new(Language::English, Timings::default());
        let fx = s.handle(Event::SessionStarted, 0);
        let id = fx
            .iter()
            .find_map(|e| match e {
                Effect::Speak { id, .. } => Some(*id),
                _ => None,
            })
            .unwrap();
        (s, id)
    }

    #[test]
    fn start_prompts_then_listens() {
        let (mut s, prompt) = started();
        assert_eq!(s.state(), InteractionState::Idle);
        assert!(s.is_speaking());

        let fx = s.handle(Event::SpeechDone(prompt), 10);
        assert_eq!(fx, vec![Effect::StartListening(Language::English)]);
        assert_eq!(s.state(), InteractionState::Listening);
        assert!(s.is_listening());
    }

    #[test]
    fn superseded_utterance_does_not_rearm() {
        let (mut s, prompt) = started();
        s.handle(Event::Shake, 5);
        assert!(s.handle(Event::SpeechDone(prompt), 6).is_empty());
        assert!(!s.is_listening());
    }

    fn kinds(fx: &[Effect]) -> Vec<UtteranceKind> {
        fx.iter()
            .filter_map(|e| match e {
                Effect::Speak { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn utterances_carry_their_kind() {
        let (mut s, prompt) = started();
        s.handle(Event::SpeechDone(prompt), 10);
        let fx = s.handle(Event::RecognizerResult("detect".into()), 20);
        assert_eq!(kinds(&fx), vec![UtteranceKind::Confirmation]);
        let confirm = fx
            .iter()
            .find_map(|e| match e {
                Effect::Speak { id, .. } => Some(*id),
                _ => None,
            })
            .unwrap();
        s.handle(Event::SpeechDone(confirm), 25);

        let det = Detection {
            class_id: 0,
            label: "person".into(),
            confidence: 0.9,
            rect: beacon_vision::Rect::new(0.0, 0.0, 10.0, 10.0),
            distance_m: Some(3.0),
        };
        let fx = s.handle(Event::DetectionReady(Some(det)), 30);
        assert_eq!(kinds(&fx), vec![UtteranceKind::Announcement]);

        let fx = s.handle(Event::Shake, 40);
        assert_eq!(kinds(&fx), vec![UtteranceKind::Emergency]);
    }

    #[test]
    fn inactive_session_ignores_events() {
        let mut s = Session::new(Language::English, Timings::default());
        assert!(s.handle(Event::Shake, 0).is_empty());
        assert_eq!(s.state(), InteractionState::Idle);
    }

    #[test]
    fn stale_timer_is_ignored() {
        let (mut s, _) = started();
        assert!(s.handle(Event::TimerFired(TimerId(999)), 0).is_empty());
    }

    #[test]
    fn unsupported_language_falls_back() {
        let mut s = Session::new(Language::Telugu, Timings::default());
        s.handle(Event::SessionStarted, 0);
        let fx = s.handle(Event::LanguageUnsupported(Language::Telugu), 1);
        assert_eq!(fx, vec![Effect::SetLanguage(Language::English)]);
        assert_eq!(s.language(), Language::English);
    }
}
