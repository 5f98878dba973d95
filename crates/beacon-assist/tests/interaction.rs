use std::time::Duration;

use beacon_assist::machine::{Effect, Event, InteractionState, QueueMode, Session, TimerKind, Timings, UtteranceId};
use beacon_assist::throttle::AnnouncementThrottle;
use beacon_assist::Language;
use beacon_vision::{Detection, Rect};
use proptest::prelude::*;

fn chair(distance_m: f32) -> Detection {
    Detection {
        class_id: 56,
        label: "chair".into(),
        confidence: 0.8,
        rect: Rect::new(10.0, 10.0, 110.0, 210.0),
        distance_m: Some(distance_m),
    }
}

fn spoken(fx: &[Effect]) -> Vec<(UtteranceId, String)> {
    fx.iter()
        .filter_map(|e| match e {
            Effect::Speak { id, text, .. } => Some((*id, text.clone())),
            _ => None,
        })
        .collect()
}

fn last_spoken_id(fx: &[Effect]) -> UtteranceId {
    spoken(fx).last().map(|(id, _)| *id).expect("something spoken")
}

fn scheduled(fx: &[Effect], kind: TimerKind) -> Option<(beacon_assist::machine::TimerId, Duration)> {
    fx.iter().find_map(|e| match e {
        Effect::Schedule { id, kind: k, after } if *k == kind => Some((*id, *after)),
        _ => None,
    })
}

/// Started session whose prompt has finished; the recognizer is live.
fn listening(lang: Language) -> Session {
    let mut s = Session::new(lang, Timings::default());
    let fx = s.handle(Event::SessionStarted, 0);
    let prompt = last_spoken_id(&fx);
    let fx = s.handle(Event::SpeechDone(prompt), 100);
    assert!(fx.contains(&Effect::StartListening(lang)));
    s
}

fn speak_out(s: &mut Session, fx: &[Effect], now: u64) -> Vec<Effect> {
    s.handle(Event::SpeechDone(last_spoken_id(fx)), now)
}

#[test]
fn language_change_in_idle_stays_idle() {
    let mut s = listening(Language::English);
    assert_eq!(s.state(), InteractionState::Listening);

    let fx = s.handle(Event::RecognizerResult("change language to hindi".into()), 200);
    assert_eq!(s.state(), InteractionState::Idle);
    assert_eq!(s.language(), Language::Hindi);
    assert!(fx.contains(&Effect::SetLanguage(Language::Hindi)));
    assert!(!fx.contains(&Effect::SetDetection(true)));

    let said = spoken(&fx);
    assert_eq!(said[0].1, "भाषा हिंदी में बदल दी गई है");
    assert_eq!(said[1].1, "आपको क्या चाहिए?");
    assert!(fx.iter().any(|e| matches!(e, Effect::Speak { queue: QueueMode::Add, .. })));

    // only the queued prompt finishing re-arms, in the new language
    assert!(s.handle(Event::SpeechDone(said[0].0), 300).is_empty());
    let fx = s.handle(Event::SpeechDone(said[1].0), 400);
    assert_eq!(fx, vec![Effect::StartListening(Language::Hindi)]);
}

#[test]
fn detect_then_announce_then_stop() {
    let mut s = listening(Language::English);
    let fx = s.handle(Event::RecognizerResult("Detect".into()), 200);
    assert_eq!(s.state(), InteractionState::Detecting);
    assert!(fx.contains(&Effect::SetDetection(true)));
    assert_eq!(spoken(&fx)[0].1, "Detection mode started. Say stop to exit.");

    // still speaking the confirmation
    assert!(s.handle(Event::DetectionReady(Some(chair(2.0))), 300).is_empty());

    let fx = speak_out(&mut s, &fx, 400);
    assert_eq!(fx, vec![Effect::StartListening(Language::English)]);
    assert_eq!(s.state(), InteractionState::Detecting);

    let fx = s.handle(Event::DetectionReady(Some(chair(2.04))), 500);
    assert_eq!(spoken(&fx)[0].1, "chair, 2.0 meters");
    assert!(fx.contains(&Effect::StopListening));
    speak_out(&mut s, &fx, 1500);

    // 3000 ms after the last announcement is not enough, it must be strictly more
    assert!(spoken(&s.handle(Event::DetectionReady(Some(chair(1.0))), 3500)).is_empty());
    assert!(spoken(&s.handle(Event::DetectionReady(None), 3600)).is_empty());
    let fx = s.handle(Event::DetectionReady(Some(chair(1.0))), 3601);
    assert_eq!(spoken(&fx)[0].1, "chair, 1.0 meters");
    speak_out(&mut s, &fx, 4000);

    let fx = s.handle(Event::RecognizerResult("stop".into()), 4100);
    assert_eq!(s.state(), InteractionState::Idle);
    assert!(fx.contains(&Effect::SetDetection(false)));
    assert_eq!(spoken(&fx)[0].1, "Stopping detection");

    // frames arriving after stop are ignored
    assert!(s.handle(Event::DetectionReady(Some(chair(0.5))), 9000).is_empty());
}

#[test]
fn redetecting_keeps_the_announcement_spacing() {
    let mut s = listening(Language::English);
    let fx = s.handle(Event::RecognizerResult("detect".into()), 200);
    speak_out(&mut s, &fx, 300);

    let fx = s.handle(Event::DetectionReady(Some(chair(2.0))), 400);
    assert_eq!(spoken(&fx)[0].1, "chair, 2.0 meters");
    speak_out(&mut s, &fx, 600);

    let fx = s.handle(Event::RecognizerResult("stop".into()), 700);
    assert_eq!(s.state(), InteractionState::Idle);
    let fx = speak_out(&mut s, &fx, 800);
    assert!(fx.contains(&Effect::StartListening(Language::English)));

    let fx = s.handle(Event::RecognizerResult("detect".into()), 900);
    assert_eq!(s.state(), InteractionState::Detecting);
    speak_out(&mut s, &fx, 1000);

    // the clock survives stop and detect
    assert!(spoken(&s.handle(Event::DetectionReady(Some(chair(1.5))), 1100)).is_empty());
    assert!(spoken(&s.handle(Event::DetectionReady(Some(chair(1.5))), 3400)).is_empty());
    let fx = s.handle(Event::DetectionReady(Some(chair(1.5))), 3401);
    assert_eq!(spoken(&fx)[0].1, "chair, 1.5 meters");
}

#[test]
fn shake_during_detection_raises_emergency() {
    let mut s = listening(Language::English);
    let fx = s.handle(Event::RecognizerResult("detect".into()), 200);
    speak_out(&mut s, &fx, 300);

    let fx = s.handle(Event::Shake, 1000);
    assert_eq!(s.state(), InteractionState::Emergency);
    assert!(fx.contains(&Effect::SetDetection(false)));
    assert!(fx.contains(&Effect::StopListening));
    assert!(fx.contains(&Effect::Vibrate(Duration::from_millis(500))));
    assert_eq!(spoken(&fx)[0].1, "Emergency activated. Calling now.");
    let (timer, after) = scheduled(&fx, TimerKind::EmergencyActions).unwrap();
    assert_eq!(after, Duration::from_millis(4000));

    // repeated triggers are absorbed
    assert!(s.handle(Event::Shake, 1100).is_empty());
    assert!(s.handle(Event::RecognizerResult("help".into()), 1200).is_empty());

    // speech ending does not re-arm listening during an emergency
    assert!(speak_out(&mut s, &fx, 2000).is_empty());

    let fx = s.handle(Event::TimerFired(timer), 5000);
    assert_eq!(fx, vec![Effect::RunEmergencyActions(Language::English)]);

    let fx = s.handle(Event::EmergencyActionsFinished(Ok(())), 5200);
    let (cooldown, after) = scheduled(&fx, TimerKind::EmergencyCooldown).unwrap();
    assert_eq!(after, Duration::from_millis(15_000));
    assert_eq!(s.state(), InteractionState::Emergency);

    let fx = s.handle(Event::TimerFired(cooldown), 20_200);
    assert_eq!(s.state(), InteractionState::Idle);
    assert_eq!(spoken(&fx)[0].1, "What do you need?");
    speak_out(&mut s, &fx, 21_000);
    assert_eq!(s.state(), InteractionState::Listening);
}

#[test]
fn emergency_spoken_in_current_language() {
    let mut s = listening(Language::Telugu);
    let fx = s.handle(Event::RecognizerResult("సహాయం".into()), 200);
    assert_eq!(s.state(), InteractionState::Emergency);
    assert_eq!(spoken(&fx)[0].1, "అత్యవసర సహాయం కాల్ చేయబడుతోంది");
}

#[test]
fn failed_call_resets_and_allows_retry() {
    let mut s = listening(Language::English);
    let fx = s.handle(Event::Shake, 200);
    let (timer, _) = scheduled(&fx, TimerKind::EmergencyActions).unwrap();
    s.handle(Event::TimerFired(timer), 4200);

    let fx = s.handle(Event::EmergencyActionsFinished(Err("call permission denied".into())), 4300);
    assert_eq!(s.state(), InteractionState::Idle);
    assert!(scheduled(&fx, TimerKind::EmergencyCooldown).is_none());

    let fx = s.handle(Event::Shake, 4400);
    assert_eq!(s.state(), InteractionState::Emergency);
    assert!(scheduled(&fx, TimerKind::EmergencyActions).is_some());
}

#[test]
fn session_end_cancels_pending_emergency() {
    let mut s = listening(Language::English);
    let fx = s.handle(Event::Shake, 200);
    let (timer, _) = scheduled(&fx, TimerKind::EmergencyActions).unwrap();

    let fx = s.handle(Event::SessionEnded, 300);
    assert!(fx.contains(&Effect::CancelAllTimers));
    assert!(fx.contains(&Effect::StopSpeaking));
    assert!(!s.is_active());
    assert_eq!(s.pending_timers().count(), 0);

    // a timer that raced the teardown does nothing
    assert!(s.handle(Event::TimerFired(timer), 4200).is_empty());
}

#[test]
fn unrecognized_speech_relistens_after_delay() {
    let mut s = listening(Language::English);
    let fx = s.handle(Event::RecognizerResult("what time is it".into()), 200);
    assert_eq!(s.state(), InteractionState::Idle);
    assert!(!fx.contains(&Effect::StopListening));
    let (timer, after) = scheduled(&fx, TimerKind::Relisten).unwrap();
    assert_eq!(after, Duration::from_millis(1000));

    let fx = s.handle(Event::TimerFired(timer), 1200);
    assert_eq!(fx, vec![Effect::StartListening(Language::English)]);
}

#[test]
fn recognizer_failures_are_retried() {
    let mut s = listening(Language::English);
    let fx = s.handle(Event::RecognizerError("no match".into()), 200);
    assert_eq!(s.state(), InteractionState::Idle);
    assert!(!s.is_listening());
    let (timer, _) = scheduled(&fx, TimerKind::Relisten).unwrap();

    let fx = s.handle(Event::TimerFired(timer), 1200);
    assert_eq!(fx, vec![Effect::StartListening(Language::English)]);
    let fx = s.handle(Event::RecognizerStartFailed("busy".into()), 1201);
    assert!(scheduled(&fx, TimerKind::Relisten).is_some());
    assert_eq!(s.state(), InteractionState::Idle);
}

#[test]
fn late_recognizer_result_is_ignored() {
    let mut s = Session::new(Language::English, Timings::default());
    s.handle(Event::SessionStarted, 0);
    // still speaking the prompt, so nothing is listening
    assert!(s.handle(Event::RecognizerResult("detect".into()), 10).is_empty());
    assert_eq!(s.state(), InteractionState::Idle);
}

#[test]
fn read_hands_over_to_text_reader() {
    let mut s = listening(Language::Hindi);
    let fx = s.handle(Event::RecognizerResult("पढ़ो".into()), 200);
    assert!(fx.contains(&Effect::StartReading));
    assert_eq!(s.state(), InteractionState::Idle);
}

proptest! {
    #[test]
    fn accepted_announcements_are_spaced(
        steps in prop::collection::vec((1u64..2000, any::<bool>()), 1..200)
    ) {
        let mut t = AnnouncementThrottle::new(3000);
        let det = chair(1.5);
        let mut now = 0u64;
        let mut accepted = Vec::new();
        for (dt, speaking) in steps {
            now += dt;
            if t.offer(&det, now, speaking).is_some() {
                prop_assert!(!speaking);
                accepted.push(now);
            }
        }
        for w in accepted.windows(2) {
            prop_assert!(w[1] - w[0] > 3000);
        }
    }
}
