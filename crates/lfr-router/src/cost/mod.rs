//! Cost estimation over provider usage counters

use lfr_llm::Usage;
use serde::{Deserialize, Serialize};

/// Cloud prices in USD per 1000 tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    pub per_1k_input: f64,
    pub per_1k_output: f64,
}

impl PriceTable {
    pub fn new(per_1k_input: f64, per_1k_output: f64) -> Self {
        Self {
            per_1k_input,
            per_1k_output,
        }
    }

    /// `(prompt / 1000) * in + (completion / 1000) * out`.
    ///
    /// Absent counters count as zero here only; the usage itself is untouched.
    pub fn estimate(&self, usage: &Usage) -> f64 {
        let prompt = usage.prompt_tokens.unwrap_or(0) as f64;
        let completion = usage.completion_tokens.unwrap_or(0) as f64;
        (prompt / 1000.0) * self.per_1k_input + (completion / 1000.0) * self.per_1k_output
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new(0.005, 0.015)
    }
}

/// Round to 6 decimal places for reporting
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
