//! Raw label text to [`ExtractedFields`].
//!
//! Each field has its own rule and fails independently: a rule that finds
//! nothing leaves its field `None`.

use std::sync::LazyLock;

use regex::Regex;
use strsim::normalized_levenshtein;

use crate::models::label::{ExtractedFields, GovernmentWarning};
use crate::services::ttb_standards;
use crate::services::validation::{fuzzy_match, WARNING_MATCH_THRESHOLD};

pub const GOVERNMENT_WARNING_HEADER: &str = "GOVERNMENT WARNING:";

/// Statutory warning statement, 27 CFR § 16.21.
pub const GOVERNMENT_WARNING_TEXT: &str = "GOVERNMENT WARNING: (1) According to the Surgeon General, \
women should not drink alcoholic beverages during pregnancy because of the risk of birth defects. \
(2) Consumption of alcoholic beverages impairs your ability to drive a car or operate machinery, \
and may cause health problems.";

/// Similarity needed for a token pair to count as a noisy "government warning".
const HEADER_PRESENCE_THRESHOLD: f64 = 0.85;

static ABV_PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%\s*(?:abv|alc\.?\s*/\s*vol\.?|alc\.?\s+by\s+vol(?:ume)?\.?|alcohol(?:\s+by\s+volume)?)")
        .expect("valid regex")
});

static ABV_PREFIXED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)alc(?:ohol)?\.?\s*(\d+(?:\.\d+)?)\s*%\s*(?:by\s+)?vol(?:ume)?\.?")
        .expect("valid regex")
});

static PROOF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*proof\b").expect("valid regex"));

static NET_CONTENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d+(?:\.\d+)?\s*(?:ml\b|milliliters?\b|fl\.?\s*oz\.?|fluid\s+ounces?\b|liters?\b|litres?\b|l\b)")
        .expect("valid regex")
});

static COUNTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:product\s+of|made\s+in|imported\s+from)\s+([a-z][a-z ]*[a-z])")
        .expect("valid regex")
});

static PERCENT_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?\s*%").expect("valid regex"));

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").expect("valid regex"));

const BOTTLER_PHRASES: &[&str] = &[
    "bottled by",
    "imported by",
    "packed by",
    "produced by",
    "distilled by",
    "brewed by",
    "vinted by",
    "distributed by",
];

const DESCRIPTORS: &[&str] = &["limited edition", "reserve", "premium", "aged", "estate"];

pub fn extract_fields(raw_text: &str) -> ExtractedFields {
    // vision models like to bold things
    let text = raw_text.replace("**", "");
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let (abv, abv_numeric) = match extract_abv(&text) {
        Some((raw, value)) => (Some(raw), Some(value)),
        None => (None, None),
    };

    ExtractedFields {
        brand_name: extract_brand_name(&lines),
        class_type: extract_class_type(&text, &lines),
        abv,
        abv_numeric,
        net_contents: NET_CONTENTS.find(&text).map(|m| m.as_str().trim().to_string()),
        bottler: extract_bottler(&lines),
        country_of_origin: COUNTRY
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string()),
        government_warning: extract_government_warning(&text),
    }
}

/// Printed ABV statement and its value as a percentage.
fn extract_abv(text: &str) -> Option<(String, f64)> {
    for pattern in [&*ABV_PERCENT, &*ABV_PREFIXED] {
        if let Some(caps) = pattern.captures(text) {
            if let (Some(all), Ok(value)) = (caps.get(0), caps[1].parse::<f64>()) {
                return Some((all.as_str().trim().to_string(), value));
            }
        }
    }
    let caps = PROOF.captures(text)?;
    let proof = caps[1].parse::<f64>().ok()?;
    Some((caps.get(0)?.as_str().trim().to_string(), proof / 2.0))
}

fn is_volume_or_strength(line: &str) -> bool {
    PERCENT_LIKE.is_match(line) || NET_CONTENTS.is_match(line) || PROOF.is_match(line)
}

fn mentions_warning(line: &str) -> bool {
    line.to_lowercase().contains("warning")
}

fn extract_brand_name(lines: &[&str]) -> Option<String> {
    let brand = lines.iter().take(5).find(|line| {
        let lower = line.to_lowercase();
        line.chars().count() >= 2
            && !DESCRIPTORS.contains(&lower.as_str())
            && !mentions_warning(line)
            && !is_volume_or_strength(line)
    });
    brand.or(lines.first()).map(|l| l.to_string())
}

fn extract_class_type(text: &str, lines: &[&str]) -> Option<String> {
    if let Some((standard, _)) = ttb_standards::find_designation(text) {
        let line = lines.iter().find(|line| {
            ttb_standards::find_designation(line).is_some_and(|(found, _)| found == standard)
        });
        if let Some(line) = line {
            return Some(line.to_string());
        }
        return Some(standard.to_string());
    }

    lines
        .iter()
        .skip(1)
        .take(3)
        .find(|line| {
            let lower = line.to_lowercase();
            line.chars().count() > 3
                && !mentions_warning(line)
                && !is_volume_or_strength(line)
                && !BOTTLER_PHRASES.iter().any(|p| lower.contains(p))
        })
        .map(|l| l.to_string())
}

fn extract_bottler(lines: &[&str]) -> Option<String> {
    BOTTLER_PHRASES.iter().find_map(|phrase| {
        lines
            .iter()
            .find(|line| line.to_lowercase().contains(phrase))
            .map(|l| l.to_string())
    })
}

/// Byte offset of the warning header, tolerating OCR noise in the two header words.
fn find_warning_start(text: &str) -> Option<usize> {
    if let Some(idx) = text.to_lowercase().find("government warning") {
        // lowercasing can shift offsets for non-ASCII text; only trust it on a char boundary
        if text.is_char_boundary(idx) {
            return Some(idx);
        }
    }

    let words: Vec<_> = WORD.find_iter(text).collect();
    words.windows(2).find_map(|pair| {
        let candidate = format!("{} {}", pair[0].as_str(), pair[1].as_str())
            .trim_end_matches(':')
            .to_lowercase();
        (normalized_levenshtein(&candidate, "government warning") >= HEADER_PRESENCE_THRESHOLD)
            .then(|| pair[0].start())
    })
}

fn extract_government_warning(text: &str) -> GovernmentWarning {
    let Some(start) = find_warning_start(text) else {
        return GovernmentWarning::default();
    };

    let block = text[start..].split_whitespace().collect::<Vec<_>>().join(" ");
    let canonical_len = GOVERNMENT_WARNING_TEXT.chars().count();
    let candidate: String = block.chars().take(canonical_len).collect();

    let similarity = fuzzy_match(&candidate, GOVERNMENT_WARNING_TEXT);

    GovernmentWarning {
        present: true,
        header_correct: Some(candidate.starts_with(GOVERNMENT_WARNING_HEADER)),
        text_correct: Some(similarity >= WARNING_MATCH_THRESHOLD),
        text: Some(candidate),
        similarity_score: Some(similarity),
    }
}
