//! Deterministic text rewrites that make plain text read well aloud.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>()\[\]]+").expect("url regex is valid"));

static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(?:\d+(?:\s*[,\-–]\s*\d+)*|citation needed|note \d+)\]").expect("citation regex is valid")
});

static EG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\be\.\s?g\.").expect("eg regex is valid"));
static IE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bi\.\s?e\.").expect("ie regex is valid"));
static ETC_SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\betc\.(\s+[A-Z]|\s*$)").expect("etc sentence end regex is valid"));
static ETC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\betc\.").expect("etc regex is valid"));
static VS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bvs\.").expect("vs regex is valid"));
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(Dr|Mr|Mrs|Ms|Prof|Jr|Sr|St)\.").expect("title regex is valid"));

static CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([$€£¥])\s?(\d+(?:,\d{3})*(?:\.\d+)?)(?:\s?(thousand|million|billion|trillion|[kKmMbB]n?)\b)?")
        .expect("currency regex is valid")
});
static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s?%").expect("percent regex is valid"));
static TEMPERATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+(?:\.\d+)?)\s?°\s?([CF])\b").expect("temperature regex is valid"));
static DEGREE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d)\s?°").expect("degree regex is valid"));
static AMPERSAND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s&\s").expect("ampersand regex is valid"));

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").expect("paragraph break regex is valid"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([,.;:!?])").expect("space before punct regex is valid"));
static EMPTY_BRACKETS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\s*\)|\[\s*\]").expect("empty brackets regex is valid"));

/// Runs the full normalization pass.
///
/// Paragraph breaks (blank lines) survive as `"\n\n"` so synthesis can pause
/// there; every other whitespace run collapses to a single space.
pub fn normalize_for_speech(text: &str) -> String {
    let text = text.replace(['\u{a0}', '\u{2009}', '\u{202f}'], " ");
    let text = URL.replace_all(&text, "");
    let text = CITATION.replace_all(&text, "");
    let text = EMPTY_BRACKETS.replace_all(&text, "");

    let text = expand_abbreviations(&text);
    let text = verbalize_symbols(&text);

    collapse_whitespace(&text)
}

pub fn expand_abbreviations(text: &str) -> String {
    let text = EG.replace_all(text, "for example");
    let text = IE.replace_all(&text, "that is");
    let text = ETC_SENTENCE_END.replace_all(&text, "et cetera.$1");
    let text = ETC.replace_all(&text, "et cetera");
    let text = VS.replace_all(&text, "versus");
    let text = TITLE.replace_all(&text, |caps: &Captures<'_>| {
        match &caps[1] {
            "Dr" => "Doctor",
            "Mr" => "Mister",
            "Mrs" => "Missus",
            "Ms" => "Miz",
            "Prof" => "Professor",
            "Jr" => "Junior",
            "Sr" => "Senior",
            _ => "Saint",
        }
        .to_string()
    });
    text.into_owned()
}

pub fn verbalize_symbols(text: &str) -> String {
    let text = CURRENCY.replace_all(text, |caps: &Captures<'_>| {
        let amount = caps[2].replace(',', "");
        let scale = caps.get(3).map(|m| match m.as_str().to_ascii_lowercase().as_str() {
            "k" => "thousand",
            "m" | "mn" => "million",
            "b" | "bn" => "billion",
            "thousand" => "thousand",
            "million" => "million",
            "billion" => "billion",
            _ => "trillion",
        });
        let singular = amount == "1" && scale.is_none();
        let unit = match (&caps[1], singular) {
            ("$", true) => "dollar",
            ("$", false) => "dollars",
            ("€", true) => "euro",
            ("€", false) => "euros",
            ("£", true) => "pound",
            ("£", false) => "pounds",
            _ => "yen",
        };
        match scale {
            Some(scale) => format!("{amount} {scale} {unit}"),
            None => format!("{amount} {unit}"),
        }
    });
    let text = PERCENT.replace_all(&text, "$1 percent");
    let text = TEMPERATURE.replace_all(&text, |caps: &Captures<'_>| {
        let scale = if &caps[2] == "C" { "Celsius" } else { "Fahrenheit" };
        format!("{} degrees {}", &caps[1], scale)
    });
    let text = DEGREE.replace_all(&text, "$1 degrees");
    let text = AMPERSAND.replace_all(&text, " and ");
    text.into_owned()
}

/// Collapses whitespace inside paragraphs and joins paragraphs with a blank
/// line. Empty paragraphs are dropped.
pub fn collapse_whitespace(text: &str) -> String {
    PARAGRAPH_BREAK
        .split(text)
        .map(|para| {
            let joined = para.split_whitespace().collect::<Vec<_>>().join(" ");
            SPACE_BEFORE_PUNCT.replace_all(&joined, "$1").into_owned()
        })
        .filter(|para| !para.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
