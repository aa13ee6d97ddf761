//! Field-by-field comparison of two builder base snapshots.

use crate::db::models::BuilderBaseStats;

struct TrackedField {
    name: &'static str,
    get: fn(&BuilderBaseStats) -> Option<i32>,
    /// A decrease of a monotonic field means the stored record is wrong.
    monotonic: bool,
}

const FIELDS: [TrackedField; 10] = [
    TrackedField {
        name: "builder_hall_level",
        get: |s| s.builder_hall_level,
        monotonic: true,
    },
    TrackedField {
        name: "builder_base_trophies",
        get: |s| s.builder_base_trophies,
        monotonic: false,
    },
    TrackedField {
        name: "best_builder_base_trophies",
        get: |s| s.best_builder_base_trophies,
        monotonic: true,
    },
    TrackedField {
        name: "builder_base_league",
        get: |s| s.builder_base_league,
        monotonic: false,
    },
    TrackedField {
        name: "best_builder_base_season_rank",
        get: |s| s.best_builder_base_season_rank,
        monotonic: false,
    },
    TrackedField {
        name: "best_builder_base_season_trophies",
        get: |s| s.best_builder_base_season_trophies,
        monotonic: false,
    },
    TrackedField {
        name: "previous_builder_base_season_rank",
        get: |s| s.previous_builder_base_season_rank,
        monotonic: false,
    },
    TrackedField {
        name: "previous_builder_base_season_trophies",
        get: |s| s.previous_builder_base_season_trophies,
        monotonic: false,
    },
    TrackedField {
        name: "builder_base_trophies_achievement",
        get: |s| s.builder_base_trophies_achievement,
        monotonic: true,
    },
    TrackedField {
        name: "builder_base_halls_destroyed",
        get: |s| s.builder_base_halls_destroyed,
        monotonic: true,
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub diffs: Vec<(&'static str, i32)>,
    pub messed_up_record: bool,
}

impl Delta {
    pub fn is_significant(&self) -> bool {
        self.messed_up_record || self.diffs.iter().any(|(_, diff)| *diff != 0)
    }

    pub fn get(&self, field: &str) -> Option<i32> {
        self.diffs
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, diff)| *diff)
    }
}

/// Compares `new` with the previous snapshot. A missing previous value counts as 0,
/// a missing new value is skipped.
pub fn parse_delta(old: Option<&BuilderBaseStats>, new: &BuilderBaseStats) -> Delta {
    let mut delta = Delta::default();

    for field in &FIELDS {
        let Some(current) = (field.get)(new) else {
            continue;
        };
        let previous = old.and_then(|o| (field.get)(o)).unwrap_or(0);
        let diff = current - previous;
        if diff < 0 && field.monotonic {
            delta.messed_up_record = true;
        }
        delta.diffs.push((field.name, diff));
    }

    if delta.messed_up_record {
        for (_, diff) in &mut delta.diffs {
            *diff = 0;
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(hall: i32, trophies: i32, best: i32) -> BuilderBaseStats {
        BuilderBaseStats {
            builder_hall_level: Some(hall),
            builder_base_trophies: Some(trophies),
            best_builder_base_trophies: Some(best),
            builder_base_halls_destroyed: Some(100),
            ..Default::default()
        }
    }

    #[test]
    fn unchanged_stats_are_not_significant() {
        let old = stats(10, 5000, 5200);
        let delta = parse_delta(Some(&old), &old.clone());
        assert!(!delta.is_significant());
        assert_eq!(delta.get("builder_base_trophies"), Some(0));
    }

    #[test]
    fn first_snapshot_is_significant() {
        let delta = parse_delta(None, &stats(10, 5000, 5200));
        assert!(delta.is_significant());
        assert_eq!(delta.get("builder_hall_level"), Some(10));
    }

    #[test]
    fn trophies_may_drop() {
        let delta = parse_delta(Some(&stats(10, 5000, 5200)), &stats(10, 4970, 5200));
        assert!(!delta.messed_up_record);
        assert_eq!(delta.get("builder_base_trophies"), Some(-30));
        assert!(delta.is_significant());
    }

    #[test]
    fn monotonic_drop_flags_record_and_zeroes_diffs() {
        let delta = parse_delta(Some(&stats(10, 5000, 5200)), &stats(10, 5030, 5100));
        assert!(delta.messed_up_record);
        assert!(delta.diffs.iter().all(|(_, d)| *d == 0));
        assert!(delta.is_significant());
    }

    #[test]
    fn missing_new_values_are_skipped() {
        let new = BuilderBaseStats {
            builder_base_trophies: Some(10),
            ..Default::default()
        };
        let delta = parse_delta(Some(&stats(10, 5000, 5200)), &new);
        assert_eq!(delta.diffs.len(), 1);
        assert!(!delta.messed_up_record);
    }
}
