//! Windowed activity aggregation around badge awards, plus the backfill of
//! badge holders that never produced a given activity type.
//!
//! Work is flattened into independent partitions, one per
//! `(activity, user)` for active users and one per `(activity, tier, user)` for
//! inactive ones, and mapped on a local rayon pool. Each partition owns its
//! output buffer; buffers are concatenated once in partition order, so the
//! result does not depend on the thread count.

use std::collections::{BTreeMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{
    ActivityDataset, ActivitySequence, ActivityType, BadgeAward, Event, SequenceOrigin,
    ValidRange, ALL_ACTIVITY_TYPES,
};
use crate::window::{z_standardize, WindowConfig};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceBatch {
    pub sequences: Vec<ActivitySequence>,
    pub active_sequences: u64,
    pub backfilled_sequences: u64,
}

#[derive(Debug)]
enum Partition<'a> {
    Active {
        activity: ActivityType,
        user_id: i64,
        sorted_ts: Vec<i64>,
        awards: &'a [&'a BadgeAward],
    },
    Backfill {
        activity: ActivityType,
        awards: Vec<&'a BadgeAward>,
    },
}

impl Partition<'_> {
    fn run(&self, window: &WindowConfig, range: &ValidRange) -> Vec<ActivitySequence> {
        match self {
            Self::Active {
                activity,
                user_id,
                sorted_ts,
                awards,
            } => awards
                .iter()
                .map(|award| {
                    debug_assert_eq!(award.user_id, *user_id);
                    active_sequence(*activity, award, sorted_ts, window, range)
                })
                .collect(),
            Self::Backfill { activity, awards } => awards
                .iter()
                .map(|award| backfill_sequence(*activity, award, window, range))
                .collect(),
        }
    }
}

/// Window of `activity` counts for one award held by a user with events.
///
/// `sorted_ts` holds that user's event timestamps of `activity`, ascending.
pub fn active_sequence(
    activity: ActivityType,
    award: &BadgeAward,
    sorted_ts: &[i64],
    window: &WindowConfig,
    range: &ValidRange,
) -> ActivitySequence {
    let counts = window.count_periods(award.ts_ms_utc, sorted_ts, range);
    let standardized = z_standardize(&counts);

    ActivitySequence {
        user_id: award.user_id,
        activity,
        badge_name: award.badge_name.clone(),
        badge_ts_ms_utc: award.ts_ms_utc,
        first_offset: window.first_offset(),
        counts,
        standardized,
        origin: SequenceOrigin::Active,
    }
}

/// Window for an award whose holder has no events of `activity` at all.
///
/// The standardized sequence is a copy of the counts: zeros on valid periods,
/// missing elsewhere.
pub fn backfill_sequence(
    activity: ActivityType,
    award: &BadgeAward,
    window: &WindowConfig,
    range: &ValidRange,
) -> ActivitySequence {
    let counts = window.zero_periods(award.ts_ms_utc, range);

    ActivitySequence {
        user_id: award.user_id,
        activity,
        badge_name: award.badge_name.clone(),
        badge_ts_ms_utc: award.ts_ms_utc,
        first_offset: window.first_offset(),
        standardized: counts.clone(),
        counts,
        origin: SequenceOrigin::Backfilled,
    }
}

/// Builds every active and backfilled sequence of a filtered dataset.
///
/// `threads == 0` lets rayon pick the pool size.
pub fn build_activity_sequences(
    dataset: &ActivityDataset,
    range: &ValidRange,
    window: &WindowConfig,
    threads: usize,
) -> Result<SequenceBatch, AggregateError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()?;

    let mut awards_by_user: BTreeMap<i64, Vec<&BadgeAward>> = BTreeMap::new();
    let mut awards_by_tier_user: BTreeMap<(&str, i64), Vec<&BadgeAward>> = BTreeMap::new();
    for award in &dataset.badges {
        awards_by_user.entry(award.user_id).or_default().push(award);
        awards_by_tier_user
            .entry((award.badge_name.as_str(), award.user_id))
            .or_default()
            .push(award);
    }

    let mut batch = SequenceBatch::default();

    for activity in ALL_ACTIVITY_TYPES {
        let events = dataset.events(activity);
        let partitions = plan_partitions(activity, events, &awards_by_user, &awards_by_tier_user);
        let active_partitions = partitions
            .iter()
            .filter(|p| matches!(p, Partition::Active { .. }))
            .count();

        debug!(
            component = "aggregate",
            event = "aggregate.activity.planned",
            activity = activity.as_str(),
            active_partitions,
            backfill_partitions = partitions.len() - active_partitions
        );

        let buffers: Vec<Vec<ActivitySequence>> = pool.install(|| {
            partitions
                .par_iter()
                .map(|partition| partition.run(window, range))
                .collect()
        });

        let mut active = 0u64;
        let mut backfilled = 0u64;
        for buffer in buffers {
            for sequence in buffer {
                match sequence.origin {
                    SequenceOrigin::Active => active += 1,
                    SequenceOrigin::Backfilled => backfilled += 1,
                }
                batch.sequences.push(sequence);
            }
        }

        info!(
            component = "aggregate",
            event = "aggregate.activity.finish",
            activity = activity.as_str(),
            events = events.len(),
            active_sequences = active
        );
        info!(
            component = "aggregate",
            event = "backfill.activity.finish",
            activity = activity.as_str(),
            backfilled_sequences = backfilled
        );

        batch.active_sequences += active;
        batch.backfilled_sequences += backfilled;
    }

    Ok(batch)
}

fn plan_partitions<'a>(
    activity: ActivityType,
    events: &[Event],
    awards_by_user: &'a BTreeMap<i64, Vec<&'a BadgeAward>>,
    awards_by_tier_user: &BTreeMap<(&'a str, i64), Vec<&'a BadgeAward>>,
) -> Vec<Partition<'a>> {
    let mut ts_by_user: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for event in events {
        ts_by_user
            .entry(event.user_id)
            .or_default()
            .push(event.ts_ms_utc);
    }

    let mut partitions = Vec::with_capacity(ts_by_user.len());
    let active_users: HashSet<i64> = ts_by_user.keys().copied().collect();

    for (user_id, mut sorted_ts) in ts_by_user {
        // events of users without a retained award never reach the output
        let Some(awards) = awards_by_user.get(&user_id) else {
            continue;
        };
        sorted_ts.sort_unstable();
        partitions.push(Partition::Active {
            activity,
            user_id,
            sorted_ts,
            awards: awards.as_slice(),
        });
    }

    for ((_, user_id), awards) in awards_by_tier_user {
        if active_users.contains(user_id) {
            continue;
        }
        partitions.push(Partition::Backfill {
            activity,
            awards: awards.clone(),
        });
    }

    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::DAY_MS;

    fn daily(max_periods: u32) -> WindowConfig {
        WindowConfig {
            period_ms: DAY_MS,
            max_periods,
        }
    }

    fn range() -> ValidRange {
        ValidRange {
            first_ts_ms_utc: 0,
            last_ts_ms_utc: 10 * DAY_MS,
        }
    }

    fn award(user_id: i64, badge_name: &str, day: i64) -> BadgeAward {
        BadgeAward {
            user_id,
            badge_name: badge_name.to_string(),
            ts_ms_utc: day * DAY_MS,
        }
    }

    fn answer(user_id: i64, ts_ms_utc: i64) -> Event {
        Event {
            user_id,
            ts_ms_utc,
            activity: ActivityType::Answer,
        }
    }

    #[test]
    fn backfill_copies_counts_into_standardized() {
        let seq = backfill_sequence(
            ActivityType::Question,
            &award(3, "Epic", 9),
            &daily(2),
            &range(),
        );
        assert_eq!(seq.counts, vec![Some(0.0), Some(0.0), Some(0.0), None]);
        assert_eq!(seq.standardized, seq.counts);
        assert_eq!(seq.origin, SequenceOrigin::Backfilled);
    }

    #[test]
    fn active_sequence_with_constant_counts_has_missing_standardized() {
        let seq = active_sequence(
            ActivityType::Answer,
            &award(1, "Epic", 5),
            &[],
            &daily(2),
            &range(),
        );
        assert_eq!(seq.counts, vec![Some(0.0); 4]);
        assert_eq!(seq.standardized, vec![None; 4]);
    }

    #[test]
    fn each_award_gets_its_own_sequence_and_inactive_users_are_backfilled() {
        let dataset = ActivityDataset {
            questions: Vec::new(),
            answers: vec![answer(1, 5 * DAY_MS + DAY_MS / 2)],
            comments: Vec::new(),
            badges: vec![
                award(1, "Epic", 5),
                award(1, "Legendary", 6),
                award(2, "Epic", 4),
                award(2, "Epic", 7),
            ],
        };

        let batch =
            build_activity_sequences(&dataset, &range(), &daily(2), 2).expect("pool builds");

        // answers: 2 active for user 1, 2 backfilled for user 2
        // questions and comments: all 4 awards backfilled
        assert_eq!(batch.active_sequences, 2);
        assert_eq!(batch.backfilled_sequences, 10);
        assert_eq!(batch.sequences.len(), 12);

        let answers: Vec<&ActivitySequence> = batch
            .sequences
            .iter()
            .filter(|s| s.activity == ActivityType::Answer)
            .collect();
        assert_eq!(answers.len(), 4);
        assert_eq!(answers[0].user_id, 1);
        assert_eq!(answers[0].badge_name, "Epic");
        assert_eq!(
            answers[0].counts,
            vec![Some(0.0), Some(0.0), Some(1.0), Some(0.0)]
        );
        assert_eq!(answers[1].badge_name, "Legendary");
        assert_eq!(
            answers[1].counts,
            vec![Some(0.0), Some(1.0), Some(0.0), Some(0.0)]
        );
        assert!(answers[2..]
            .iter()
            .all(|s| s.user_id == 2 && s.origin == SequenceOrigin::Backfilled));
    }

    #[test]
    fn output_order_does_not_depend_on_thread_count() {
        let dataset = ActivityDataset {
            questions: (0..40)
                .map(|i| Event {
                    user_id: i % 7,
                    ts_ms_utc: (i * DAY_MS) / 5 + 1,
                    activity: ActivityType::Question,
                })
                .collect(),
            answers: vec![answer(3, 4 * DAY_MS)],
            comments: Vec::new(),
            badges: (0..9).map(|u| award(u, "Mortarboard", 2 + u % 6)).collect(),
        };

        let single = build_activity_sequences(&dataset, &range(), &daily(3), 1).expect("pool");
        let many = build_activity_sequences(&dataset, &range(), &daily(3), 4).expect("pool");
        assert_eq!(single, many);
    }

    #[test]
    fn pool_build_errors_keep_their_source() {
        // a second global init always fails, whoever initialized first
        let err = rayon::ThreadPoolBuilder::new()
            .build_global()
            .and_then(|_| rayon::ThreadPoolBuilder::new().build_global())
            .expect_err("second global init must fail");
        let wrapped = AggregateError::from(err);

        assert!(std::error::Error::source(&wrapped).is_some());
        assert!(wrapped.to_string().starts_with("failed to build worker pool"));
    }
}
