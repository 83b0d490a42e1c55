//! Shared records flowing between the loader, the range resolver and the aggregator.

use serde::{Deserialize, Serialize};

pub const ALL_ACTIVITY_TYPES: [ActivityType; 3] = [
    ActivityType::Question,
    ActivityType::Answer,
    ActivityType::Comment,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Question,
    Answer,
    Comment,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Question => "questions",
            Self::Answer => "answers",
            Self::Comment => "comments",
        }
    }

    /// Single-character code written to the `activity_name` column.
    pub fn code(self) -> &'static str {
        match self {
            Self::Question => "q",
            Self::Answer => "a",
            Self::Comment => "c",
        }
    }

    pub fn from_post_type_id(post_type_id: i64) -> Option<Self> {
        match post_type_id {
            1 => Some(Self::Question),
            2 => Some(Self::Answer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub user_id: i64,
    pub ts_ms_utc: i64,
    pub activity: ActivityType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeAward {
    pub user_id: i64,
    pub badge_name: String,
    pub ts_ms_utc: i64,
}

/// Questions, answers, comments and badge awards of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityDataset {
    pub questions: Vec<Event>,
    pub answers: Vec<Event>,
    pub comments: Vec<Event>,
    pub badges: Vec<BadgeAward>,
}

impl ActivityDataset {
    pub fn events(&self, activity: ActivityType) -> &[Event] {
        match activity {
            ActivityType::Question => &self.questions,
            ActivityType::Answer => &self.answers,
            ActivityType::Comment => &self.comments,
        }
    }

    pub fn events_mut(&mut self, activity: ActivityType) -> &mut Vec<Event> {
        match activity {
            ActivityType::Question => &mut self.questions,
            ActivityType::Answer => &mut self.answers,
            ActivityType::Comment => &mut self.comments,
        }
    }
}

/// Interval in which all three activity sources have coverage.
///
/// Both bounds are exclusive for retained records: every kept event and award
/// satisfies `first_ts_ms_utc < ts < last_ts_ms_utc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidRange {
    pub first_ts_ms_utc: i64,
    pub last_ts_ms_utc: i64,
}

impl ValidRange {
    pub fn contains_strictly(&self, ts_ms_utc: i64) -> bool {
        self.first_ts_ms_utc < ts_ms_utc && ts_ms_utc < self.last_ts_ms_utc
    }

    /// True when the period `(start, end]` lies fully inside the observable range.
    pub fn covers_period(&self, start_ts_ms_utc: i64, end_ts_ms_utc: i64) -> bool {
        start_ts_ms_utc >= self.first_ts_ms_utc && end_ts_ms_utc <= self.last_ts_ms_utc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceOrigin {
    Active,
    Backfilled,
}

/// One fixed-length window of activity around a single badge award.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySequence {
    pub user_id: i64,
    pub activity: ActivityType,
    pub badge_name: String,
    pub badge_ts_ms_utc: i64,
    pub first_offset: i32,
    pub counts: Vec<Option<f64>>,
    pub standardized: Vec<Option<f64>>,
    pub origin: SequenceOrigin,
}

impl ActivitySequence {
    pub fn offsets(&self) -> impl Iterator<Item = i32> + '_ {
        (0..self.counts.len()).map(move |idx| self.first_offset + idx as i32)
    }

    /// Output rows in offset order, badge name lowercased.
    pub fn rows(&self) -> impl Iterator<Item = ActivityProfileRow> + '_ {
        let badge_name = self.badge_name.to_lowercase();
        self.offsets()
            .zip(self.counts.iter().zip(self.standardized.iter()))
            .map(move |(week_offset, (count, standardized))| ActivityProfileRow {
                user_id: self.user_id,
                activity_count: *count,
                activity_count_standardized: *standardized,
                activity_name: self.activity.code(),
                badge_name: badge_name.clone(),
                week_offset,
            })
    }
}

/// One line of the exported table; field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityProfileRow {
    pub user_id: i64,
    pub activity_count: Option<f64>,
    pub activity_count_standardized: Option<f64>,
    pub activity_name: &'static str,
    pub badge_name: String,
    pub week_offset: i32,
}
