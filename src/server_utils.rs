use std::collections::BTreeMap;

use crate::constants::{
    MAX_EXTENSION_SECONDS, MAX_NAME_LEN, MAX_QUESTION_COUNT, MAX_TIME_LIMIT_SECONDS,
    MIN_TIME_LIMIT_SECONDS,
};
use crate::types::{ScoreTier, TestConfiguration};

pub fn sanitize_name(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_NAME_LEN).collect())
}

pub fn normalize_question_count(value: usize) -> usize {
    value.clamp(1, MAX_QUESTION_COUNT)
}

pub fn normalize_time_limit_seconds(value: u64) -> u64 {
    value.clamp(MIN_TIME_LIMIT_SECONDS, MAX_TIME_LIMIT_SECONDS)
}

pub fn normalize_extension_seconds(value: u64) -> Option<u64> {
    if value == 0 {
        return None;
    }
    Some(value.min(MAX_EXTENSION_SECONDS))
}

pub fn normalize_configuration(
    mut config: TestConfiguration,
) -> Result<TestConfiguration, String> {
    config.topic = config.topic.trim().to_string();
    if config.topic.is_empty() {
        return Err("topic must not be empty".to_string());
    }
    config.kinds.sort();
    config.kinds.dedup();
    if config.kinds.is_empty() {
        return Err("at least one question kind is required".to_string());
    }
    config.question_count = normalize_question_count(config.question_count);
    config.time_limit_seconds = normalize_time_limit_seconds(config.time_limit_seconds);
    Ok(config)
}

pub fn parse_ranking_limit(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|value| value.parse::<usize>().ok())
}

pub fn format_participants(others: &[String]) -> String {
    let mentions: Vec<String> = others.iter().map(|name| format!("@{name}")).collect();
    match mentions.as_slice() {
        [] => "[•] No other participants are connected.".to_string(),
        [only] => format!("[•] {only} is connected."),
        [rest @ .., last] => format!("[•] {} and {last} are connected.", rest.join(", ")),
    }
}

pub fn format_scoreboard(scores: &BTreeMap<String, ScoreTier>) -> String {
    let entries: Vec<String> = scores
        .iter()
        .map(|(name, tier)| format!("{name}={}", tier.points()))
        .collect();
    format!("Scores: {{{}}}", entries.join(","))
}

pub fn format_results(results: &BTreeMap<String, i64>) -> String {
    let entries: Vec<String> = results
        .iter()
        .map(|(name, points)| format!("{name}={points}"))
        .collect();
    format!("[•] Run results: {{{}}}", entries.join(", "))
}
