//! Movement-category label folding.
//!
//! Exports spell the same category many ways ("2 Fruta recibida",
//! "FRUTA PROYECTADA 2023", "Proyección compra de fruta ajustada"). Labels
//! are folded by an ordered list of substring rules, first match wins;
//! anything unmatched is title-cased.

use crate::utils::{strip_accents, title_case};
use once_cell::sync::Lazy;
use regex::Regex;

pub const RECEIVED: &str = "Fruta Recibida";
pub const PROJECTED: &str = "Fruta Proyectada";
pub const ADJUSTED_PROJECTION: &str = "Proyeccion Ajustada";

/// Leading numbering such as `"1 "` or `"12  "`.
static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s\d]*").expect("valid regex"));

/// One folding rule: labels containing `pattern` become `label`.
///
/// `pattern` is matched against the lowercase, accent-free label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelRule {
    pub pattern: &'static str,
    pub label: &'static str,
}

/// Built-in rules. Order matters: "proyeccion ... ajustada" must be seen
/// before the plain projection rule.
pub const DEFAULT_RULES: &[LabelRule] = &[
    LabelRule {
        pattern: "ajustad",
        label: ADJUSTED_PROJECTION,
    },
    LabelRule {
        pattern: "proyectad",
        label: PROJECTED,
    },
    LabelRule {
        pattern: "recibid",
        label: RECEIVED,
    },
];

/// Folds raw description text into canonical category labels.
#[derive(Debug, Clone)]
pub struct LabelFolder {
    rules: Vec<LabelRule>,
}

impl Default for LabelFolder {
    fn default() -> Self {
        Self::new(DEFAULT_RULES.to_vec())
    }
}

impl LabelFolder {
    pub fn new(rules: Vec<LabelRule>) -> Self {
        Self { rules }
    }

    /// Canonical label for `raw`.
    ///
    /// Idempotent: folding an already folded label returns it unchanged.
    pub fn fold(&self, raw: &str) -> String {
        let label = extract_label(raw);
        let key = strip_accents(&label.to_lowercase());

        self.rules
            .iter()
            .find(|rule| key.contains(rule.pattern))
            .map(|rule| rule.label.to_string())
            .unwrap_or_else(|| title_case(&label))
    }
}

/// Strip leading numbering and surrounding whitespace.
///
/// A label that is nothing but numbering is kept as-is.
pub fn extract_label(raw: &str) -> String {
    let stripped = LEADING_NUMBER.replace(raw, "");
    let stripped = stripped.trim();
    if stripped.is_empty() {
        raw.trim().to_string()
    } else {
        stripped.to_string()
    }
}
