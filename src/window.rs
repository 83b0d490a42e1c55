//! Period windows around a badge award: boundaries, validity mask, counting
//! and per-sequence z-score standardization.

use serde::{Deserialize, Serialize};

use crate::model::ValidRange;

pub const HOUR_MS: i64 = 3_600_000;
pub const DAY_MS: i64 = 24 * HOUR_MS;
pub const WEEK_MS: i64 = 7 * DAY_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Width of one period in milliseconds.
    pub period_ms: i64,
    /// Half-window length in periods; offsets span `[-max_periods, max_periods)`.
    pub max_periods: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            period_ms: WEEK_MS,
            max_periods: 52,
        }
    }
}

impl WindowConfig {
    pub fn first_offset(&self) -> i32 {
        -(self.max_periods as i32)
    }

    pub fn sequence_len(&self) -> usize {
        2 * self.max_periods as usize
    }

    pub fn offsets(&self) -> std::ops::Range<i32> {
        self.first_offset()..self.max_periods as i32
    }

    /// `(start, end]` of period `offset` relative to an award at `anchor_ts_ms_utc`.
    pub fn period_bounds(&self, anchor_ts_ms_utc: i64, offset: i32) -> (i64, i64) {
        let start = anchor_ts_ms_utc.saturating_add((offset as i64).saturating_mul(self.period_ms));
        (start, start.saturating_add(self.period_ms))
    }

    /// Per-offset validity: a period is usable only if it lies inside `range`.
    pub fn validity_mask(&self, anchor_ts_ms_utc: i64, range: &ValidRange) -> Vec<bool> {
        self.offsets()
            .map(|offset| {
                let (start, end) = self.period_bounds(anchor_ts_ms_utc, offset);
                range.covers_period(start, end)
            })
            .collect()
    }

    /// Counts `sorted_ts` into each period, masking invalid periods as missing.
    ///
    /// `sorted_ts` must be ascending. Periods are left-open and right-closed, so a
    /// timestamp equal to `end(k)` lands in `k` and one equal to `start(k)` does not.
    pub fn count_periods(
        &self,
        anchor_ts_ms_utc: i64,
        sorted_ts: &[i64],
        range: &ValidRange,
    ) -> Vec<Option<f64>> {
        self.offsets()
            .map(|offset| {
                let (start, end) = self.period_bounds(anchor_ts_ms_utc, offset);
                if !range.covers_period(start, end) {
                    return None;
                }
                let upto_end = sorted_ts.partition_point(|ts| *ts <= end);
                let upto_start = sorted_ts.partition_point(|ts| *ts <= start);
                Some((upto_end - upto_start) as f64)
            })
            .collect()
    }

    /// Zero counts on valid periods, missing elsewhere.
    pub fn zero_periods(&self, anchor_ts_ms_utc: i64, range: &ValidRange) -> Vec<Option<f64>> {
        self.validity_mask(anchor_ts_ms_utc, range)
            .into_iter()
            .map(|valid| valid.then_some(0.0))
            .collect()
    }
}

/// Z-score over the present entries using the population standard deviation.
///
/// Missing entries stay missing. When nothing is present or the present values
/// have zero variance, every entry is missing.
pub fn z_standardize(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return vec![None; values.len()];
    }

    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let variance = present
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = variance.sqrt();
    if !(std.is_finite() && std > 0.0) {
        return vec![None; values.len()];
    }

    values
        .iter()
        .map(|value| value.map(|v| (v - mean) / std))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day_range(first_day: i64, last_day: i64) -> ValidRange {
        ValidRange {
            first_ts_ms_utc: first_day * DAY_MS,
            last_ts_ms_utc: last_day * DAY_MS,
        }
    }

    fn daily(max_periods: u32) -> WindowConfig {
        WindowConfig {
            period_ms: DAY_MS,
            max_periods,
        }
    }

    #[test]
    fn default_window_is_52_weeks_each_side() {
        let cfg = WindowConfig::default();
        assert_eq!(cfg.period_ms, WEEK_MS);
        assert_eq!(cfg.sequence_len(), 104);
        assert_eq!(cfg.offsets().next(), Some(-52));
        assert_eq!(cfg.offsets().last(), Some(51));
    }

    #[test]
    fn boundary_timestamp_belongs_to_the_earlier_period() {
        let cfg = daily(2);
        let range = day_range(0, 10);
        // exactly end(0) == start(1) == day 6
        let counts = cfg.count_periods(5 * DAY_MS, &[6 * DAY_MS], &range);
        assert_eq!(counts, vec![Some(0.0), Some(0.0), Some(1.0), Some(0.0)]);

        // exactly start(0) == the award instant is counted in k = -1
        let counts = cfg.count_periods(5 * DAY_MS, &[5 * DAY_MS], &range);
        assert_eq!(counts, vec![Some(0.0), Some(1.0), Some(0.0), Some(0.0)]);
    }

    #[test]
    fn periods_outside_the_range_are_missing() {
        let cfg = daily(2);
        let range = day_range(0, 10);
        let counts = cfg.count_periods(DAY_MS, &[DAY_MS / 2], &range);
        // k = -2 covers (day -1, day 0] which starts before first
        assert_eq!(counts, vec![None, Some(1.0), Some(0.0), Some(0.0)]);

        let mask = cfg.validity_mask(9 * DAY_MS, &range);
        // k = 1 covers (day 10, day 11] which ends after last
        assert_eq!(mask, vec![true, true, true, false]);
    }

    #[test]
    fn zero_periods_follow_the_mask() {
        let cfg = daily(2);
        let zeros = cfg.zero_periods(DAY_MS, &day_range(0, 10));
        assert_eq!(zeros, vec![None, Some(0.0), Some(0.0), Some(0.0)]);
    }

    #[test]
    fn z_standardize_matches_population_formula() {
        let out = z_standardize(&[Some(0.0), Some(0.0), Some(1.0), Some(0.0)]);
        let mean = 0.25_f64;
        let std = (0.1875_f64).sqrt();
        let expected = [-mean / std, -mean / std, (1.0 - mean) / std, -mean / std];
        for (got, want) in out.iter().zip(expected) {
            let got = got.expect("present value");
            assert!((got - want).abs() < 1e-12, "got {got}, want {want}");
        }
    }

    #[test]
    fn z_standardize_skips_missing_entries() {
        let out = z_standardize(&[None, Some(2.0), Some(4.0)]);
        assert_eq!(out[0], None);
        assert!((out[1].expect("present") + 1.0).abs() < 1e-12);
        assert!((out[2].expect("present") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn z_standardize_degenerate_inputs_are_all_missing() {
        assert_eq!(
            z_standardize(&[Some(3.0), None, Some(3.0)]),
            vec![None, None, None]
        );
        assert_eq!(z_standardize(&[None, None]), vec![None, None]);
        assert!(z_standardize(&[]).is_empty());
    }
}
