//! Raw value normalization
//!
//! A raw string is tried against the vocabulary with each rule in
//! `RULES` order; the first rule that yields a member wins. When none
//! does, the field falls back to the sentinel and a warning names the
//! field, the rejected value and the permitted set.

use super::vocab::{Phase, Vocabulary};
use std::collections::BTreeSet;
use tracing::debug;

/// Named normalization rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationRule {
    /// Case-insensitive exact label match
    Exact,
    /// Match after dropping whitespace and punctuation
    Compact,
    /// Roman numerals (I-IV) rewritten as digits, then compact match
    RomanNumeral,
    /// Vocabulary-specific alternative spelling
    Alias,
    /// Normalized Levenshtein similarity of compact forms >= `MIN_SIMILARITY`,
    /// with identical digits; the match is reported as a warning
    CloseSpelling,
}

/// Rules in application order
pub const RULES: [NormalizationRule; 5] = [
    NormalizationRule::Exact,
    NormalizationRule::Compact,
    NormalizationRule::RomanNumeral,
    NormalizationRule::Alias,
    NormalizationRule::CloseSpelling,
];

/// Similarity required by `CloseSpelling`
pub const MIN_SIMILARITY: f64 = 0.9;

/// Canonical joiner for multi-valued phases
pub const PHASE_JOINER: &str = "|";

/// Uppercase alphanumerics only
pub fn compact(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

fn roman_digit(word: &str) -> Option<&'static str> {
    match word.to_ascii_uppercase().as_str() {
        "I" => Some("1"),
        "II" => Some("2"),
        "III" => Some("3"),
        "IV" => Some("4"),
        _ => None,
    }
}

fn digits(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

/// Rewrite standalone roman numerals and a roman suffix glued to "PHASE"
fn romanize(text: &str) -> String {
    let spaced: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| roman_digit(w).map(str::to_string).unwrap_or_else(|| w.to_string()))
        .collect();
    let joined = compact(&spaced.join(" "));

    for suffix in ["IV", "III", "II", "I"] {
        if let Some(prefix) = joined.strip_suffix(suffix) {
            if prefix.ends_with("PHASE") {
                return format!("{}{}", prefix, roman_digit(suffix).unwrap_or(suffix));
            }
        }
    }
    joined
}

/// Apply one rule
pub fn apply_rule<V: Vocabulary>(rule: NormalizationRule, raw: &str) -> Option<V> {
    let members = V::members();
    match rule {
        NormalizationRule::Exact => {
            let raw = raw.trim();
            members.iter().copied().find(|m| m.label().eq_ignore_ascii_case(raw))
        }
        NormalizationRule::Compact => {
            let raw = compact(raw);
            members.iter().copied().find(|m| compact(m.label()) == raw)
        }
        NormalizationRule::RomanNumeral => {
            let raw = romanize(raw);
            members.iter().copied().find(|m| compact(m.label()) == raw)
        }
        NormalizationRule::Alias => {
            let raw = compact(raw);
            V::aliases()
                .iter()
                .find(|(alias, _)| compact(alias) == raw)
                .map(|(_, member)| *member)
        }
        NormalizationRule::CloseSpelling => {
            let raw = compact(raw);
            if raw.is_empty() {
                return None;
            }
            // A differing digit is a different member, never a typo
            let raw_digits = digits(&raw);
            members
                .iter()
                .copied()
                .filter(|m| digits(m.label()) == raw_digits)
                .map(|m| (m, strsim::normalized_levenshtein(&compact(m.label()), &raw)))
                .filter(|(_, similarity)| *similarity >= MIN_SIMILARITY)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(m, _)| m)
        }
    }
}

/// Run the ordered rule list; returns the member and the rule that matched
pub fn normalize<V: Vocabulary>(raw: &str) -> Option<(V, NormalizationRule)> {
    RULES
        .iter()
        .find_map(|rule| apply_rule::<V>(*rule, raw).map(|m| (m, *rule)))
}

/// Warning for a value no rule accepted
pub fn rejection_warning<V: Vocabulary>(raw: &str) -> String {
    format!(
        "{}: rejected value \"{}\" (allowed: {}); using \"{}\"",
        V::FIELD,
        raw.trim(),
        V::allowed().join(", "),
        V::sentinel().label()
    )
}

/// Warning for a value accepted only by `CloseSpelling`
pub fn close_spelling_warning<V: Vocabulary>(raw: &str, member: V) -> String {
    format!(
        "{}: \"{}\" interpreted as \"{}\" (close spelling)",
        V::FIELD,
        raw.trim(),
        member.label()
    )
}

/// Normalize one field, substituting the sentinel (with a warning) for a
/// missing or rejected value
pub fn normalize_field<V: Vocabulary>(raw: Option<&str>, warnings: &mut Vec<String>) -> V {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        warnings.push(format!(
            "{}: no value available; using \"{}\"",
            V::FIELD,
            V::sentinel().label()
        ));
        return V::sentinel();
    };

    match normalize::<V>(raw) {
        Some((member, rule)) => {
            if rule == NormalizationRule::CloseSpelling {
                warnings.push(close_spelling_warning(raw, member));
            } else if rule != NormalizationRule::Exact {
                debug!(field = V::FIELD, raw = %raw, value = member.label(), rule = ?rule, "Normalized value");
            }
            member
        }
        None => {
            warnings.push(rejection_warning::<V>(raw));
            V::sentinel()
        }
    }
}

/// Split a multi-phase string on `, / | ; & +` and the word "and"
pub fn split_phases(raw: &str) -> Vec<String> {
    raw.split(|c: char| matches!(c, ',' | '/' | '|' | ';' | '&' | '+'))
        .flat_map(|part| {
            let words: Vec<&str> = part.split_whitespace().collect();
            words
                .split(|w| w.eq_ignore_ascii_case("and"))
                .map(|chunk| chunk.join(" "))
                .collect::<Vec<_>>()
        })
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Bare digits or roman numerals inherit the "PHASE" prefix
fn phase_token(token: &str) -> String {
    let bare_digit = token.chars().all(|c| c.is_ascii_digit());
    if bare_digit || roman_digit(token).is_some() {
        format!("PHASE {}", token)
    } else {
        token.to_string()
    }
}

/// Normalize a (possibly multi-valued) phase string
///
/// The whole string is tried first so single values containing a
/// separator ("N/A") survive. Otherwise every token is validated;
/// rejected tokens are dropped with a warning. Yields `[UNKNOWN]` when
/// nothing valid remains.
pub fn normalize_phases(raw: Option<&str>, warnings: &mut Vec<String>) -> Vec<Phase> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        warnings.push(format!(
            "{}: no value available; using \"{}\"",
            Phase::FIELD,
            Phase::Unknown.label()
        ));
        return vec![Phase::Unknown];
    };

    if let Some((phase, rule)) = normalize::<Phase>(raw) {
        if rule == NormalizationRule::CloseSpelling {
            warnings.push(close_spelling_warning(raw, phase));
        }
        return vec![phase];
    }

    let mut phases = BTreeSet::new();
    for token in split_phases(raw) {
        match normalize::<Phase>(&phase_token(&token)) {
            Some((phase, rule)) => {
                if rule == NormalizationRule::CloseSpelling {
                    warnings.push(close_spelling_warning(&token, phase));
                }
                phases.insert(phase);
            }
            None => warnings.push(rejection_warning::<Phase>(&token)),
        }
    }

    // UNKNOWN alongside real phases carries no information
    if phases.len() > 1 {
        phases.remove(&Phase::Unknown);
    }
    if phases.is_empty() {
        if !warnings.iter().any(|w| w.starts_with(Phase::FIELD)) {
            warnings.push(rejection_warning::<Phase>(raw));
        }
        return vec![Phase::Unknown];
    }
    phases.into_iter().collect()
}

/// Canonical joined form of a phase set
pub fn join_phases(phases: &[Phase]) -> String {
    phases
        .iter()
        .map(|p| p.label())
        .collect::<Vec<_>>()
        .join(PHASE_JOINER)
}
