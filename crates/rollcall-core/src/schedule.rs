//! Time-window classification of a first-seen time into present / late / absent.
//!
//! Two fixed tables, one per half of the day. Lower bounds are inclusive,
//! upper bounds exclusive. Lateness is counted in whole minutes from the
//! start of the late window (seconds are ignored).

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::types::AttendanceStatus;

/// Start of the afternoon half, as seconds since midnight (12:00:00).
const MIDDAY_SECS: u32 = 12 * 3600;

/// One half-day schedule, expressed in seconds since midnight.
struct ScheduleTable {
    /// First second classified late.
    late_from: u32,
    /// First second classified absent.
    absent_from: u32,
}

const MORNING: ScheduleTable = ScheduleTable {
    late_from: 8 * 3600 + 5 * 60,
    absent_from: 11 * 3600,
};

const AFTERNOON: ScheduleTable = ScheduleTable {
    late_from: 14 * 3600 + 30 * 60,
    absent_from: 15 * 3600,
};

/// Which half-day table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionHalf {
    Morning,
    Afternoon,
}

impl SessionHalf {
    /// The half of the day `time` falls in (cutoff at 12:00:00).
    pub fn of(time: NaiveTime) -> Self {
        if time.num_seconds_from_midnight() < MIDDAY_SECS {
            Self::Morning
        } else {
            Self::Afternoon
        }
    }

    fn table(self) -> &'static ScheduleTable {
        match self {
            Self::Morning => &MORNING,
            Self::Afternoon => &AFTERNOON,
        }
    }
}

/// How the half-day table is chosen when classifying an observed time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePolicy {
    /// Use the half the observation itself falls in.
    #[default]
    Observed,
    /// Use the half the evaluation clock falls in ("recompute as of now").
    Evaluation,
}

impl SchedulePolicy {
    pub fn half(self, observed: NaiveTime, now: NaiveTime) -> SessionHalf {
        match self {
            Self::Observed => SessionHalf::of(observed),
            Self::Evaluation => SessionHalf::of(now),
        }
    }
}

/// Outcome of classifying one time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: AttendanceStatus,
    /// Non-zero only for [`AttendanceStatus::Late`].
    pub lateness_minutes: u32,
}

/// Classify `time` against the table for `half`.
pub fn classify(time: NaiveTime, half: SessionHalf) -> Classification {
    let table = half.table();
    let secs = time.num_seconds_from_midnight();

    if secs < table.late_from {
        Classification {
            status: AttendanceStatus::Present,
            lateness_minutes: 0,
        }
    } else if secs < table.absent_from {
        let minutes = time.hour() * 60 + time.minute();
        Classification {
            status: AttendanceStatus::Late,
            lateness_minutes: minutes - table.late_from / 60,
        }
    } else {
        Classification {
            status: AttendanceStatus::Absent,
            lateness_minutes: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn check(time: NaiveTime, half: SessionHalf, status: AttendanceStatus, minutes: u32) {
        let c = classify(time, half);
        assert_eq!(c.status, status, "status at {time} ({half:?})");
        assert_eq!(c.lateness_minutes, minutes, "lateness at {time} ({half:?})");
    }

    #[test]
    fn test_morning_boundaries() {
        use AttendanceStatus::*;
        check(t(6, 0, 0), SessionHalf::Morning, Present, 0);
        check(t(8, 4, 59), SessionHalf::Morning, Present, 0);
        check(t(8, 5, 0), SessionHalf::Morning, Late, 0);
        check(t(8, 10, 0), SessionHalf::Morning, Late, 5);
        check(t(10, 59, 59), SessionHalf::Morning, Late, 174);
        check(t(11, 0, 0), SessionHalf::Morning, Absent, 0);
        check(t(11, 59, 59), SessionHalf::Morning, Absent, 0);
    }

    #[test]
    fn test_afternoon_boundaries() {
        use AttendanceStatus::*;
        check(t(13, 0, 0), SessionHalf::Afternoon, Present, 0);
        check(t(14, 29, 59), SessionHalf::Afternoon, Present, 0);
        check(t(14, 30, 0), SessionHalf::Afternoon, Late, 0);
        check(t(14, 59, 59), SessionHalf::Afternoon, Late, 29);
        check(t(15, 0, 0), SessionHalf::Afternoon, Absent, 0);
        check(t(23, 0, 0), SessionHalf::Afternoon, Absent, 0);
    }

    #[test]
    fn test_seconds_do_not_count_towards_lateness() {
        assert_eq!(classify(t(8, 6, 59), SessionHalf::Morning).lateness_minutes, 1);
    }

    #[test]
    fn test_half_cutoff_at_noon() {
        assert_eq!(SessionHalf::of(t(11, 59, 59)), SessionHalf::Morning);
        assert_eq!(SessionHalf::of(t(12, 0, 0)), SessionHalf::Afternoon);
    }

    #[test]
    fn test_policy_selects_table() {
        let observed = t(8, 10, 0);
        let now = t(16, 0, 0);
        assert_eq!(SchedulePolicy::Observed.half(observed, now), SessionHalf::Morning);
        assert_eq!(SchedulePolicy::Evaluation.half(observed, now), SessionHalf::Afternoon);

        // Recomputed after noon, an 08:10 entry falls before the afternoon late window.
        let half = SchedulePolicy::Evaluation.half(observed, now);
        assert_eq!(classify(observed, half).status, AttendanceStatus::Present);
    }

    #[test]
    fn test_forced_absence_time_is_absent_under_both_policies() {
        let forced = t(23, 0, 0);
        for now in [t(9, 0, 0), t(18, 0, 0)] {
            for policy in [SchedulePolicy::Observed, SchedulePolicy::Evaluation] {
                let half = policy.half(forced, now);
                assert_eq!(classify(forced, half).status, AttendanceStatus::Absent);
            }
        }
    }
}
