//! Spoken command vocabulary and the localized phrases the session speaks.

use serde::{Deserialize, Serialize};

use crate::InteractionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en", alias = "english")]
    English,
    #[serde(rename = "hi", alias = "hindi")]
    Hindi,
    #[serde(rename = "te", alias = "telugu")]
    Telugu,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::English, Language::Hindi, Language::Telugu];

    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Hindi => "hi",
            Language::Telugu => "te",
        }
    }

    /// BCP-47 tag handed to the recognizer and synthesizer.
    pub fn locale_tag(&self) -> &'static str {
        match self {
            Language::English => "en-IN",
            Language::Hindi => "hi-IN",
            Language::Telugu => "te-IN",
        }
    }

    fn keywords(&self) -> &'static Keywords {
        match self {
            Language::English => &ENGLISH,
            Language::Hindi => &HINDI,
            Language::Telugu => &TELUGU,
        }
    }
}

impl std::str::FromStr for Language {
    type Err = InteractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" | "english" | "en-in" | "en-us" => Ok(Language::English),
            "hi" | "hindi" | "hi-in" => Ok(Language::Hindi),
            "te" | "telugu" | "te-in" => Ok(Language::Telugu),
            other => Err(InteractionError::UnknownLanguage(other.to_string())),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ChangeLanguage(Language),
    Emergency,
    Detect,
    Read,
    Stop,
    Unrecognized,
}

struct Keywords {
    /// Words that select this language from any other.
    selects: &'static [&'static str],
    detect: &'static [&'static str],
    read: &'static [&'static str],
    help: &'static [&'static str],
    stop: &'static [&'static str],
}

const ENGLISH: Keywords = Keywords {
    selects: &["english", "इंग्लिश", "अंग्रेज़ी", "अंग्रेजी", "ఇంగ్లీష్"],
    detect: &["detect"],
    read: &["read"],
    help: &["help", "emergency"],
    stop: &["stop"],
};

const HINDI: Keywords = Keywords {
    selects: &["hindi", "हिंदी", "हिन्दी", "హిందీ"],
    detect: &["पहचानो"],
    read: &["पढ़ो"],
    help: &["मदद", "बचाओ"],
    stop: &["बंद", "रुको"],
};

const TELUGU: Keywords = Keywords {
    selects: &["telugu", "तेलुगु", "తెలుగు"],
    detect: &["గుర్తించు"],
    read: &["చదవు"],
    help: &["సహాయం"],
    stop: &["ఆపు"],
};

// Language names are checked in this order.
const SELECT_ORDER: [Language; 3] = [Language::Hindi, Language::Telugu, Language::English];

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// Map a recognized utterance to a command.
///
/// Matching is substring based after case folding. Precedence is
/// language change, emergency, detect, read, stop. Emergency and stop words
/// are honoured in every language so a user can always get help or leave
/// detection even after switching to a language they do not speak.
pub fn parse(text: &str, current: Language) -> Command {
    let text = text.to_lowercase();
    let table = current.keywords();

    if let Some(lang) = SELECT_ORDER
        .into_iter()
        .find(|l| contains_any(&text, l.keywords().selects))
    {
        return Command::ChangeLanguage(lang);
    }
    if Language::ALL.iter().any(|l| contains_any(&text, l.keywords().help)) {
        return Command::Emergency;
    }
    if contains_any(&text, table.detect) {
        return Command::Detect;
    }
    if contains_any(&text, table.read) {
        return Command::Read;
    }
    if Language::ALL.iter().any(|l| contains_any(&text, l.keywords().stop)) {
        return Command::Stop;
    }
    Command::Unrecognized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phrase {
    Prompt,
    LanguageChanged,
    EmergencyActivated,
    DetectionStarted,
    DetectionStopped,
    Reading,
}

pub fn phrase(lang: Language, p: Phrase) -> &'static str {
    use Language::*;
    use Phrase::*;
    match (lang, p) {
        (English, Prompt) => "What do you need?",
        (Hindi, Prompt) => "आपको क्या चाहिए?",
        (Telugu, Prompt) => "మీకు ఏమి కావాలి?",

        (English, LanguageChanged) => "Language changed to English",
        (Hindi, LanguageChanged) => "भाषा हिंदी में बदल दी गई है",
        (Telugu, LanguageChanged) => "భాష తెలుగులోకి మార్చబడింది",

        (English, EmergencyActivated) => "Emergency activated. Calling now.",
        (Hindi, EmergencyActivated) => "आपातकालीन सहायता सक्रिय। अभी कॉल कर रहे हैं।",
        (Telugu, EmergencyActivated) => "అత్యవసర సహాయం కాల్ చేయబడుతోంది",

        (English, DetectionStarted) => "Detection mode started. Say stop to exit.",
        (Hindi, DetectionStarted) => "पहचान मोड शुरू। बाहर निकलने के लिए बंद बोलें।",
        (Telugu, DetectionStarted) => "గుర్తింపు మోడ్ ప్రారంభమైంది. ఆపడానికి ఆపు అని చెప్పండి.",

        (English, DetectionStopped) => "Stopping detection",
        (Hindi, DetectionStopped) => "पहचान बंद की जा रही है",
        (Telugu, DetectionStopped) => "గుర్తింపు ఆపివేయబడుతోంది",

        (English, Reading) => "Reading text",
        (Hindi, Reading) => "पाठ पढ़ा जा रहा है",
        (Telugu, Reading) => "వచనం చదువుతోంది",
    }
}
