//! Free-text command parsing
//!
//! Slot extraction is keyword based: the action comes from verbs and
//! levels, the device reference is whatever words remain.

use std::sync::LazyLock;

use regex::Regex;

use super::device::{Action, Device};

/// Minimum Jaro-Winkler similarity for a fuzzy device-name match
pub const FUZZY_THRESHOLD: f64 = 0.85;

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)").ok());

/// Words that never belong to a device reference
const FILLER: &[&str] = &[
    "a", "an", "the", "my", "please", "can", "could", "you", "would", "turn", "switch", "power",
    "on", "off", "toggle", "set", "change", "make", "dim", "brighten", "brightness", "temperature",
    "to", "at", "percent", "degrees", "degree", "up", "down", "low", "medium", "high", "bright",
    "full", "level", "of", "in", "and",
];

/// A parsed home command
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCommand {
    pub action: Action,
    /// Words naming the device, e.g. "bedroom light"
    pub reference: String,
}

/// Normalize text for matching: lowercase, letters and digits only, single spaces
#[must_use]
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|w| w.trim_matches('.'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn has_word(words: &[&str], word: &str) -> bool {
    words.contains(&word)
}

fn first_number(text: &str) -> Option<f64> {
    NUMBER
        .as_ref()?
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extract the action from a command
#[must_use]
pub fn parse_action(text: &str) -> Option<Action> {
    let normalized = normalize(text);
    let words: Vec<&str> = normalized.split(' ').collect();

    if has_word(&words, "toggle") {
        return Some(Action::Toggle);
    }

    if has_word(&words, "thermostat")
        || has_word(&words, "temperature")
        || has_word(&words, "degrees")
    {
        if let Some(degrees) = first_number(&normalized) {
            return Some(Action::Temperature(degrees));
        }
    }

    let wants_level = has_word(&words, "brightness")
        || has_word(&words, "dim")
        || has_word(&words, "brighten")
        || has_word(&words, "percent");
    if wants_level {
        return brightness_level(&normalized, &words).map(Action::Brightness);
    }

    if has_word(&words, "off") {
        return Some(Action::Off);
    }
    if has_word(&words, "on") {
        return Some(Action::On);
    }
    None
}

/// Brightness from a number or a level word
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn brightness_level(normalized: &str, words: &[&str]) -> Option<u8> {
    if let Some(n) = first_number(normalized) {
        return (0.0..=100.0).contains(&n).then(|| n.round() as u8);
    }
    if has_word(words, "low") || has_word(words, "dim") {
        return Some(30);
    }
    if has_word(words, "medium") {
        return Some(60);
    }
    if has_word(words, "high") || has_word(words, "bright") || has_word(words, "full") {
        return Some(100);
    }
    if has_word(words, "brighten") {
        return Some(100);
    }
    None
}

/// The words left once command words and numbers are removed
#[must_use]
pub fn extract_reference(text: &str) -> String {
    normalize(text)
        .split(' ')
        .filter(|w| !FILLER.contains(w))
        .filter(|w| w.parse::<f64>().is_err())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a full command
#[must_use]
pub fn parse_command(text: &str) -> Option<ParsedCommand> {
    Some(ParsedCommand {
        action: parse_action(text)?,
        reference: extract_reference(text),
    })
}

/// Names a device answers to, normalized
fn aliases(device: &Device) -> Vec<String> {
    let mut names = vec![normalize(&device.id.replace('_', " "))];
    let name = normalize(&device.name);
    if !name.is_empty() && !names.contains(&name) {
        names.push(name);
    }
    names
}

/// Find the device a command refers to
///
/// An alias appearing in the text wins, longest first. Otherwise the
/// reference is compared fuzzily to every alias.
#[must_use]
pub fn resolve<'a>(text: &str, reference: &str, devices: &'a [Device]) -> Option<&'a Device> {
    let haystack = format!(" {} ", normalize(text));

    let exact = devices
        .iter()
        .flat_map(|d| aliases(d).into_iter().map(move |a| (d, a)))
        .filter(|(_, alias)| haystack.contains(&format!(" {alias} ")))
        .max_by_key(|(_, alias)| alias.len());
    if let Some((device, _)) = exact {
        return Some(device);
    }

    let reference = normalize(reference);
    if reference.is_empty() {
        return None;
    }

    devices
        .iter()
        .flat_map(|d| aliases(d).into_iter().map(move |a| (d, a)))
        .map(|(d, alias)| (d, strsim::jaro_winkler(&reference, &alias)))
        .filter(|(_, score)| *score >= FUZZY_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(d, score)| {
            tracing::debug!(device = %d.id, score, reference = %reference, "fuzzy device match");
            d
        })
}
