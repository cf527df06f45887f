use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::DeviceSummary;

const MISSING_PATH_MARKER: &str = "No such file or directory";

pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let mut model = None;
            let mut transport_id = None;
            for token in tokens.iter().skip(2) {
                if let Some(value) = token.strip_prefix("model:") {
                    model = Some(value.to_string());
                } else if let Some(value) = token.strip_prefix("transport_id:") {
                    transport_id = Some(value.to_string());
                }
            }
            Some(DeviceSummary {
                serial: tokens[0].to_string(),
                state: tokens[1].to_string(),
                model,
                transport_id,
            })
        })
        .collect()
}

pub fn parse_getprop_map(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with('[') {
            continue;
        }
        let Some((key_part, value_part)) = trimmed.split_once("]: [") else {
            continue;
        };
        let key = key_part.trim_start_matches('[').trim();
        let value = value_part.trim_end_matches(']').trim();
        if !key.is_empty() {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

pub fn parse_battery_level(output: &str) -> Option<u8> {
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix("level:") {
            if let Ok(level) = value.trim().parse::<u8>() {
                return Some(level);
            }
        }
    }
    None
}

pub fn parse_feature_tokens(output: &str) -> HashSet<String> {
    output
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// The last non-empty line is authoritative for `echo $VAR` style probes.
pub fn last_non_empty_line(output: &str) -> Option<String> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}

pub fn ls_reports_missing(output: &str) -> bool {
    output.trim().ends_with(MISSING_PATH_MARKER)
}

/// Lower-cases and replaces anything that is not a letter or digit with `_`.
pub fn clean_for_display(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() {
                ch.to_lowercase().next().unwrap_or(ch)
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallFailureDetail {
    pub message: String,
    pub code: Option<String>,
}

impl InstallFailureDetail {
    fn unknown(detail: &str) -> Self {
        Self {
            message: format!("Unknown failure: {detail}"),
            code: None,
        }
    }
}

fn failure_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^Failure\s+\[(.*)\]$").ok())
        .as_ref()
}

fn status_code_token(message: &str) -> Option<String> {
    let token = message
        .split(|ch: char| ch == ':' || ch.is_whitespace())
        .next()?;
    let looks_like_code = !token.is_empty()
        && token
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_');
    looks_like_code.then(|| token.to_string())
}

/// Reads package-manager output. `None` means the last status line reported success.
pub fn parse_install_output(output: &str) -> Option<InstallFailureDetail> {
    let mut outcome: Option<Option<InstallFailureDetail>> = None;
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("Success") {
            outcome = Some(None);
            continue;
        }
        if let Some(caps) = failure_pattern().and_then(|re| re.captures(trimmed)) {
            let message = caps[1].trim().to_string();
            let code = status_code_token(&message);
            outcome = Some(Some(InstallFailureDetail { message, code }));
            continue;
        }
        if trimmed.starts_with("Failure") || trimmed.starts_with("Error:") {
            outcome = Some(Some(InstallFailureDetail::unknown(trimmed)));
        }
        // Anything else is progress chatter such as "Performing Streamed Install".
    }
    outcome.unwrap_or_else(|| Some(InstallFailureDetail::unknown("no status reported")))
}
