use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use crate::clash::types::ClanWarDto;
use crate::config::WarFilter;

/// Where a tracked clan stands, as stored in `tracked_clans.state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarState {
    NotInWar,
    Preparation,
    InWar,
    WarEnded,
    PrivateLog,
    ApiError,
}

impl WarState {
    pub fn as_str(self) -> &'static str {
        match self {
            WarState::NotInWar => "notinwar",
            WarState::Preparation => "prepstarted",
            WarState::InWar => "warstarted",
            WarState::WarEnded => "warended",
            WarState::PrivateLog => "privatelog",
            WarState::ApiError => "apierror",
        }
    }

    /// Whether the opponent should be pointed at the same match.
    pub fn is_running(self) -> bool {
        matches!(self, WarState::Preparation | WarState::InWar)
    }

    /// Classifies a war by its timestamps, falling back to the state the API reports.
    pub fn of_war(war: &ClanWarDto, now: DateTime<Utc>) -> Self {
        if war.state == "warEnded" {
            return WarState::WarEnded;
        }
        let Some(times) = WarTimes::from_war(war) else {
            return WarState::NotInWar;
        };
        if times.preparation_start < now && now < times.start {
            WarState::Preparation
        } else if times.start < now && now < times.end {
            WarState::InWar
        } else {
            match war.state.as_str() {
                "preparation" => WarState::Preparation,
                "inWar" => WarState::InWar,
                _ => WarState::NotInWar,
            }
        }
    }
}

impl fmt::Display for WarState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarTimes {
    pub preparation_start: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WarTimes {
    pub fn from_war(war: &ClanWarDto) -> Option<Self> {
        Some(Self {
            preparation_start: war.preparation_start_time?,
            start: war.start_time?,
            end: war.end_time?,
        })
    }
}

const fn minutes(m: i64) -> TimeDelta {
    TimeDelta::minutes(m)
}

/// When a clan should be polled again.
///
/// Wars of interest are polled every few minutes while running so attacks are
/// recorded as they happen. Other wars are only looked at again after they end.
pub fn next_check(
    state: WarState,
    times: Option<&WarTimes>,
    of_interest: bool,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let next = match (state, times) {
        (WarState::PrivateLog, _) => now + minutes(10),
        (WarState::ApiError, _) => now + minutes(2),
        (WarState::NotInWar | WarState::WarEnded, _) => now + minutes(4),
        (WarState::Preparation, Some(t)) if of_interest => t.start + minutes(5),
        (WarState::InWar, Some(_)) if of_interest => now + minutes(5),
        (WarState::Preparation | WarState::InWar, Some(t)) => t.end + minutes(5),
        (WarState::Preparation | WarState::InWar, None) => now + minutes(5),
    };
    next.max(now + minutes(1))
}

/// Whether the war matches the configured filter. An empty town hall list allows every level.
pub fn is_of_interest(war: &ClanWarDto, filter: &WarFilter) -> bool {
    if war.preparation_start_time.is_none() {
        return false;
    }
    if war.war_type() != Some(filter.war_type.as_str()) {
        return false;
    }
    if war.team_size.and_then(|s| u32::try_from(s).ok()) != Some(filter.team_size) {
        return false;
    }
    filter.town_hall_levels.is_empty()
        || war.members().all(|m| {
            u32::try_from(m.town_hall_level).is_ok_and(|th| filter.town_hall_levels.contains(&th))
        })
}
