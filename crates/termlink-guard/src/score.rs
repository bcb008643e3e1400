//! Advisory risk score for UI hints.
//!
//! The score is a heuristic over the raw command text. It is not a gate:
//! only [`CommandSanitizer::sanitize`](crate::CommandSanitizer::sanitize)
//! decides what may be sent.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::rules::{DANGEROUS_PATTERNS, PATH_TRAVERSAL, REDIRECTION, SUBSTITUTION};

/// Extra risk markers with their deductions.
static RISK_MARKERS: Lazy<Vec<(Regex, u8)>> = Lazy::new(|| {
    [
        (r"[;|]|&&", 15),
        (r"(?:^|[^&>])&(?:[^&]|$)", 10),
        (r"(?:^|\s)(?:sudo|su|doas)\s", 20),
        (r"\b(?:curl|wget)\b.*\|\s*(?:ba|z)?sh\b", 30),
        (r"\b(?:chmod|chown)\s", 10),
        (r"/etc/(?:passwd|shadow|sudoers)", 15),
    ]
    .into_iter()
    .map(|(p, w)| (Regex::new(p).expect("valid risk marker"), w))
    .collect()
});

const DANGEROUS_WEIGHT: u8 = 50;
const SUBSTITUTION_WEIGHT: u8 = 25;
const TRAVERSAL_WEIGHT: u8 = 20;
const REDIRECTION_WEIGHT: u8 = 10;
const LENGTH_WEIGHT: u8 = 5;
const LONG_COMMAND: usize = 200;

/// Score `command` from 0 (very risky) to 100 (nothing suspicious found).
///
/// Each matched risk pattern deducts a fixed weight, once.
pub fn safety_score(command: &str) -> u8 {
    let mut deductions: u32 = 0;

    if DANGEROUS_PATTERNS.iter().any(|(_, re)| re.is_match(command)) {
        deductions += u32::from(DANGEROUS_WEIGHT);
    }
    if SUBSTITUTION.is_match(command) {
        deductions += u32::from(SUBSTITUTION_WEIGHT);
    }
    if PATH_TRAVERSAL.is_match(command) {
        deductions += u32::from(TRAVERSAL_WEIGHT);
    }
    if REDIRECTION.is_match(command) {
        deductions += u32::from(REDIRECTION_WEIGHT);
    }
    for (re, weight) in RISK_MARKERS.iter() {
        if re.is_match(command) {
            deductions += u32::from(*weight);
        }
    }
    if command.chars().count() > LONG_COMMAND {
        deductions += u32::from(LENGTH_WEIGHT);
    }

    100u32.saturating_sub(deductions) as u8
}
