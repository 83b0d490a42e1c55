//! Valid observation range resolution and record filtering.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::model::{ActivityDataset, ActivityType, Event, ValidRange, ALL_ACTIVITY_TYPES};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataRangeError {
    #[error("activity source '{}' has no records; valid range is undefined", .activity.as_str())]
    EmptySource { activity: ActivityType },
    #[error(
        "activity sources do not overlap: first {first_ts_ms_utc} is not before last {last_ts_ms_utc}"
    )]
    NonOverlapping {
        first_ts_ms_utc: i64,
        last_ts_ms_utc: i64,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedCounts {
    pub badges: u64,
    pub questions: u64,
    pub answers: u64,
    pub comments: u64,
    pub badge_holders: u64,
}

/// Intersects the timestamp spans of the three activity sources.
///
/// Badge awards do not take part in the intersection.
pub fn resolve_valid_range(dataset: &ActivityDataset) -> Result<ValidRange, DataRangeError> {
    let mut first_ts_ms_utc = i64::MIN;
    let mut last_ts_ms_utc = i64::MAX;

    for activity in ALL_ACTIVITY_TYPES {
        let (min_ts, max_ts) = timestamp_span(dataset.events(activity))
            .ok_or(DataRangeError::EmptySource { activity })?;
        first_ts_ms_utc = first_ts_ms_utc.max(min_ts);
        last_ts_ms_utc = last_ts_ms_utc.min(max_ts);
    }

    if first_ts_ms_utc >= last_ts_ms_utc {
        return Err(DataRangeError::NonOverlapping {
            first_ts_ms_utc,
            last_ts_ms_utc,
        });
    }

    Ok(ValidRange {
        first_ts_ms_utc,
        last_ts_ms_utc,
    })
}

/// Keeps awards strictly inside `range`, then events strictly inside `range`
/// whose user holds at least one kept award.
pub fn filter_to_valid_range(dataset: ActivityDataset, range: &ValidRange) -> ActivityDataset {
    let ActivityDataset {
        questions,
        answers,
        comments,
        badges,
    } = dataset;

    let badges: Vec<_> = badges
        .into_iter()
        .filter(|award| range.contains_strictly(award.ts_ms_utc))
        .collect();
    let holders: HashSet<i64> = badges.iter().map(|award| award.user_id).collect();

    let keep = |events: Vec<Event>| -> Vec<Event> {
        events
            .into_iter()
            .filter(|event| {
                range.contains_strictly(event.ts_ms_utc) && holders.contains(&event.user_id)
            })
            .collect()
    };

    ActivityDataset {
        questions: keep(questions),
        answers: keep(answers),
        comments: keep(comments),
        badges,
    }
}

pub fn resolve_and_filter(
    dataset: ActivityDataset,
) -> Result<(ValidRange, ActivityDataset, RetainedCounts), DataRangeError> {
    let range = match resolve_valid_range(&dataset) {
        Ok(range) => range,
        Err(err) => {
            error!(
                component = "range",
                event = "range.error",
                error = %err
            );
            return Err(err);
        }
    };

    let filtered = filter_to_valid_range(dataset, &range);
    let retained = RetainedCounts {
        badges: filtered.badges.len() as u64,
        questions: filtered.questions.len() as u64,
        answers: filtered.answers.len() as u64,
        comments: filtered.comments.len() as u64,
        badge_holders: filtered
            .badges
            .iter()
            .map(|award| award.user_id)
            .collect::<HashSet<_>>()
            .len() as u64,
    };

    info!(
        component = "range",
        event = "range.resolved",
        first_ts_ms_utc = range.first_ts_ms_utc,
        last_ts_ms_utc = range.last_ts_ms_utc,
        badges = retained.badges,
        badge_holders = retained.badge_holders,
        questions = retained.questions,
        answers = retained.answers,
        comments = retained.comments
    );

    Ok((range, filtered, retained))
}

fn timestamp_span(events: &[Event]) -> Option<(i64, i64)> {
    let min_ts = events.iter().map(|event| event.ts_ms_utc).min()?;
    let max_ts = events.iter().map(|event| event.ts_ms_utc).max()?;
    Some((min_ts, max_ts))
}
