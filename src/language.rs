//! Language detection for incoming questions.
//!
//! Commands carry no language tag, so the language stage sniffs the question
//! text with cheap heuristics: accented characters and common question words
//! for the Latin-script languages, Unicode script ranges for Japanese and
//! Chinese. A confident non-English detection swaps in a localized prompt
//! preamble and tags the published response so the speech stage picks the
//! matching voice.

/// Detections at or below this confidence fall back to the configured
/// personality and the default language.
pub const CONFIDENCE_THRESHOLD: f32 = 0.3;

pub struct LanguageProfile {
    /// ISO 639-1 code, also used as the TTS voice identifier
    pub code: &'static str,
    pub name: &'static str,
    /// Localized personality preamble, ending with an instruction to
    /// respond in this language
    pub prompt_template: &'static str,
    markers: &'static [&'static str],
}

const PROFILES: &[LanguageProfile] = &[
    LanguageProfile {
        code: "en",
        name: "English",
        prompt_template: "You are Raven, a helpful AI assistant integrated into a meeting \
            system. Provide concise, helpful responses to questions during meetings. Keep \
            responses brief and relevant to the meeting context. Respond in English.",
        markers: &[],
    },
    LanguageProfile {
        code: "es",
        name: "Spanish",
        prompt_template: "Eres Raven, un asistente de IA útil integrado en un sistema de \
            reuniones. Proporciona respuestas concisas y útiles a las preguntas durante las \
            reuniones. Mantén las respuestas breves y relevantes al contexto de la reunión. \
            Responde en español.",
        markers: &["ñ", "¿", "¡", "qué", "dónde", "cuándo", "cómo", "por qué", "puedes", "podrías"],
    },
    LanguageProfile {
        code: "fr",
        name: "French",
        prompt_template: "Tu es Raven, un assistant IA utile intégré dans un système de \
            réunion. Fournis des réponses concises et utiles aux questions pendant les \
            réunions. Garde les réponses brèves et pertinentes au contexte de la réunion. \
            Réponds en français.",
        markers: &["ç", "où", "qu'", "est-ce", "peux-tu", "pourrais-tu", "pourquoi", "quelle"],
    },
    LanguageProfile {
        code: "de",
        name: "German",
        prompt_template: "Du bist Raven, ein hilfreicher KI-Assistent, der in ein \
            Meeting-System integriert ist. Gib prägnante, hilfreiche Antworten auf Fragen \
            während Meetings. Halte Antworten kurz und relevant zum Meeting-Kontext. \
            Antworte auf Deutsch.",
        markers: &["ä", "ö", "ü", "ß", "kannst", "könntest", "warum", "welche"],
    },
    LanguageProfile {
        code: "it",
        name: "Italian",
        prompt_template: "Sei Raven, un assistente IA utile integrato in un sistema di \
            riunioni. Fornisci risposte concise e utili alle domande durante le riunioni. \
            Mantieni le risposte brevi e rilevanti al contesto della riunione. Rispondi in \
            italiano.",
        markers: &["perché", "potresti", "puoi", "cosa", "dove", "quando", "chi è"],
    },
    LanguageProfile {
        code: "pt",
        name: "Portuguese",
        prompt_template: "Você é Raven, um assistente de IA útil integrado em um sistema de \
            reuniões. Forneça respostas concisas e úteis para perguntas durante reuniões. \
            Mantenha as respostas breves e relevantes ao contexto da reunião. Responda em \
            português.",
        markers: &["você", "poderia", "ã", "õ", "por que", "quem", "onde"],
    },
    LanguageProfile {
        code: "ja",
        name: "Japanese",
        prompt_template: "あなたはRavenです。会議システムに統合された有用なAIアシスタントです。\
            会議中の質問に対して簡潔で有用な回答を提供してください。\
            回答は短く、会議の文脈に関連性を保ってください。日本語で回答してください。",
        markers: &[],
    },
    LanguageProfile {
        code: "zh",
        name: "Chinese",
        prompt_template: "你是Raven，一个集成在会议系统中的有用AI助手。\
            在会议期间为问题提供简洁、有用的回答。保持回答简短并与会议内容相关。用中文回答。",
        markers: &[],
    },
];

fn is_kana(c: char) -> bool {
    matches!(c, '\u{3040}'..='\u{309f}' | '\u{30a0}'..='\u{30ff}')
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}')
}

/// Detect the language of `text`, returning the code and a confidence in
/// `[0, 1]`. Unrecognized text defaults to English at middling confidence.
pub fn detect(text: &str) -> (&'static str, f32) {
    let lower = text.to_lowercase();
    let has_kana = text.chars().any(is_kana);
    let has_cjk = text.chars().any(is_cjk);

    let mut best: Option<(&'static str, f32)> = None;
    for profile in PROFILES {
        let mut score = 0.0f32;
        for marker in profile.markers {
            if lower.contains(marker) {
                score += 0.3;
            }
        }
        // Kana is unambiguously Japanese; bare CJK ideographs read as
        // Chinese.
        match profile.code {
            "ja" if has_kana => score += 0.8,
            "zh" if has_cjk && !has_kana => score += 0.8,
            _ => {}
        }

        if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((profile.code, score.min(1.0)));
        }
    }

    best.unwrap_or(("en", 0.5))
}

pub fn profile(code: &str) -> Option<&'static LanguageProfile> {
    PROFILES.iter().find(|p| p.code == code)
}

/// Localized prompt preamble for a detected language
pub fn prompt_template(code: &str) -> Option<&'static str> {
    profile(code).map(|p| p.prompt_template)
}
