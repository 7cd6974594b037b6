use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::constants::{DEFAULT_RANKING_LIMIT, MAX_RANKING_LIMIT};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranking {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub points: BTreeMap<String, i64>,
}

impl Ranking {
    pub fn points_of(&self, name: &str) -> i64 {
        self.points.get(name).copied().unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankingUpdate {
    pub previous: Ranking,
    pub current: Ranking,
}

impl RankingUpdate {
    pub fn earned(&self, name: &str) -> i64 {
        self.current.points_of(name) - self.previous.points_of(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub name: String,
    pub points: i64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingResponse {
    pub generated_at_iso: String,
    pub entries: Vec<RankingEntry>,
}

#[derive(Debug, Default)]
pub struct RankingStore {
    points: BTreeMap<String, i64>,
    started_at: Option<String>,
    ended_at: Option<String>,
}

impl RankingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Ranking {
        Ranking {
            started_at: self.started_at.clone(),
            ended_at: self.ended_at.clone(),
            points: self.points.clone(),
        }
    }

    pub fn apply(
        &mut self,
        results: &BTreeMap<String, i64>,
        connected: &[String],
        started_at: &str,
    ) -> RankingUpdate {
        let previous = self.snapshot();

        for (name, points) in results {
            *self.points.entry(name.clone()).or_insert(0) += points;
        }
        for name in connected {
            self.points.entry(name.clone()).or_insert(0);
        }
        self.started_at = Some(started_at.to_string());
        self.ended_at = Some(now_iso());

        RankingUpdate {
            previous,
            current: self.snapshot(),
        }
    }

    pub fn build_response(&self, requested_limit: Option<usize>) -> RankingResponse {
        RankingResponse {
            generated_at_iso: now_iso(),
            entries: self.get_top(requested_limit),
        }
    }

    fn get_top(&self, requested_limit: Option<usize>) -> Vec<RankingEntry> {
        let normalized_limit = requested_limit
            .unwrap_or(DEFAULT_RANKING_LIMIT)
            .clamp(1, MAX_RANKING_LIMIT);
        let mut sorted: Vec<(&String, &i64)> = self.points.iter().collect();
        sorted.sort_by(|a, b| cmp_points_desc(*a.1, *b.1).then_with(|| a.0.cmp(b.0)));

        sorted
            .into_iter()
            .take(normalized_limit)
            .enumerate()
            .map(|(index, (name, points))| RankingEntry {
                rank: index + 1,
                name: name.clone(),
                points: *points,
            })
            .collect()
    }
}

fn cmp_points_desc(a: i64, b: i64) -> Ordering {
    b.cmp(&a)
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
