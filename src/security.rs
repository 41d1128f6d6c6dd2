use std::sync::OnceLock;

use regex::Regex;

pub const MAX_INPUT_CHARS: usize = 4000;

const INJECTION_PATTERNS: [&str; 7] = [
    r"\bignore (all )?previous instructions\b",
    r"\bdisregard (the )?(above|prior)\b",
    r"\breveal (the )?system prompt\b",
    r"\bshow (the )?hidden prompt\b",
    r"\b(developer|dev) mode\b",
    r"\b(jailbreak|bypass)\b",
    r"\bsudo\s+|rm\s+-rf|format\s+c:",
];

static INJECTION_REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
static TOKEN_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

fn injection_regexes() -> &'static [Regex] {
    INJECTION_REGEXES.get_or_init(|| {
        INJECTION_PATTERNS
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    tracing::error!(pattern, error = %err, "invalid injection pattern");
                    None
                }
            })
            .collect()
    })
}

/// Normalises curly quotes, collapses whitespace and caps the length.
pub fn sanitize_user_input(text: &str) -> String {
    let normalized = text
        .replace('\u{2019}', "'")
        .replace('\u{201c}', "\"")
        .replace('\u{201d}', "\"");
    let collapsed = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_INPUT_CHARS).collect()
}

/// Catches common prompt-injection framings without blocking ordinary questions.
pub fn is_injection(text: &str) -> bool {
    let lowered = text.to_lowercase();
    injection_regexes()
        .iter()
        .any(|regex| regex.is_match(&lowered))
}

/// Rough token count: words plus punctuation marks.
pub fn estimate_tokens(text: &str) -> u32 {
    let regex = TOKEN_REGEX.get_or_init(|| Regex::new(r"\w+|[^\w\s]").ok());
    match regex {
        Some(regex) => regex.find_iter(text).count() as u32,
        None => text.split_whitespace().count() as u32,
    }
}
