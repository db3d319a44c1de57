//! Structured-output extraction
//!
//! The local model is asked to reply with `{"answer": ..., "confidence": ...}`
//! but small models wrap it in prose, break the escaping, or ignore the format
//! entirely. Extraction runs an ordered chain of strategies and stops at the
//! first one that matches:
//!
//! 1. [`StrictJson`] - decode the outermost `{...}` span as JSON
//! 2. [`PatternSalvage`] - pull the fields out of a malformed span by pattern
//! 3. [`RawText`] - the whole reply, with zero confidence
//!
//! Extraction never fails. Confidence is clamped to `[0, 1]` and is `0.0`
//! whenever no value could be read.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static ANSWER_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""answer"\s*:\s*""#).expect("answer pattern is valid"));

static CONFIDENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""confidence"\s*:\s*([0-9]+(?:\.[0-9]*)?)"#).expect("confidence pattern is valid")
});

/// Recovered answer and confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub answer: String,
    pub confidence: f64,
    /// Name of the strategy that produced this result
    pub strategy: String,
}

impl Extraction {
    fn new(answer: String, confidence: f64, strategy: &str) -> Self {
        Self {
            answer,
            confidence: clamp_confidence(confidence),
            strategy: strategy.to_string(),
        }
    }
}

/// One step of the extraction chain. `None` means "no match, try the next one".
pub trait ExtractionStrategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn extract(&self, raw: &str) -> Option<Extraction>;
}

/// Clamp into `[0, 1]`; NaN and infinities become 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Span from the first `{` through the last `}`, across lines.
pub fn json_block(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

fn coerce_confidence(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Decode the JSON block with serde
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictJson;

impl ExtractionStrategy for StrictJson {
    fn name(&self) -> &'static str {
        "strict_json"
    }

    fn extract(&self, raw: &str) -> Option<Extraction> {
        let block = json_block(raw)?;
        let value: Value = serde_json::from_str(block).ok()?;
        let object = value.as_object()?;

        let answer = match object.get("answer") {
            None => String::new(),
            Some(Value::String(s)) => s.trim().to_string(),
            // Null or non-string answers are not the shape we asked for.
            Some(_) => return None,
        };

        Some(Extraction::new(
            answer,
            coerce_confidence(object.get("confidence")),
            self.name(),
        ))
    }
}

/// Recover fields from a block that is not valid JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternSalvage;

impl PatternSalvage {
    /// Value of `"answer": "..."` up to the first unescaped quote that is
    /// followed by `,` or `}`. Returns the raw (still escaped) text.
    fn capture_answer(block: &str) -> Option<&str> {
        let open = ANSWER_OPEN.find(block)?;
        let body = &block[open.end()..];

        let mut chars = body.char_indices();
        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' => {
                    chars.next();
                }
                '"' => {
                    let rest = body[idx + 1..].trim_start();
                    if rest.starts_with(',') || rest.starts_with('}') {
                        return Some(&body[..idx]);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn capture_confidence(block: &str) -> Option<f64> {
        CONFIDENCE
            .captures(block)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    }
}

impl ExtractionStrategy for PatternSalvage {
    fn name(&self) -> &'static str {
        "pattern_salvage"
    }

    fn extract(&self, raw: &str) -> Option<Extraction> {
        let block = json_block(raw)?;
        let answer = Self::capture_answer(block).map(|a| unescape(a).trim().to_string());
        let confidence = Self::capture_confidence(block);

        if answer.is_none() && confidence.is_none() {
            return None;
        }

        let answer = match answer {
            Some(a) if !a.is_empty() => a,
            _ => raw.trim().to_string(),
        };

        Some(Extraction::new(answer, confidence.unwrap_or(0.0), self.name()))
    }
}

/// Last resort: the reply as-is
#[derive(Debug, Default, Clone, Copy)]
pub struct RawText;

impl ExtractionStrategy for RawText {
    fn name(&self) -> &'static str {
        "raw_text"
    }

    fn extract(&self, raw: &str) -> Option<Extraction> {
        Some(Extraction::new(raw.trim().to_string(), 0.0, self.name()))
    }
}

/// Undo the common JSON escapes. Unknown sequences such as `\frac` are kept
/// verbatim so LaTeX survives.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.peek().copied() {
            Some('n') => {
                chars.next();
                out.push('\n');
            }
            Some('t') => {
                chars.next();
                out.push('\t');
            }
            Some('r') => {
                chars.next();
                out.push('\r');
            }
            Some('"') => {
                chars.next();
                out.push('"');
            }
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            Some('/') => {
                chars.next();
                out.push('/');
            }
            Some('u') => {
                let hex: String = chars.clone().skip(1).take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => {
                        for _ in 0..5 {
                            chars.next();
                        }
                        out.push(decoded);
                    }
                    _ => out.push('\\'),
                }
            }
            _ => out.push('\\'),
        }
    }

    out
}

/// Ordered strategy chain
#[derive(Debug)]
pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Extractor {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn extract(&self, raw: &str) -> Extraction {
        self.strategies
            .iter()
            .find_map(|s| s.extract(raw))
            .or_else(|| RawText.extract(raw))
            .unwrap_or_else(|| Extraction::new(raw.trim().to_string(), 0.0, "raw_text"))
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(vec![
            Box::new(StrictJson),
            Box::new(PatternSalvage),
            Box::new(RawText),
        ])
    }
}

/// Run the default chain
pub fn extract(raw: &str) -> Extraction {
    Extractor::default().extract(raw)
}
