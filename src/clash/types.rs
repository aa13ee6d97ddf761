use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Error body returned by the API on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: Option<String>,
}

// ==================== Players ====================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDto {
    pub tag: String,
    pub name: String,
    pub town_hall_level: Option<i32>,
    pub builder_hall_level: Option<i32>,
    pub builder_base_trophies: Option<i32>,
    pub best_builder_base_trophies: Option<i32>,
    pub builder_base_league: Option<LeagueDto>,
    pub legend_statistics: Option<LegendStatisticsDto>,
    #[serde(default)]
    pub achievements: Vec<AchievementDto>,
}

impl PlayerDto {
    /// Value of an achievement, matched case-insensitively. Missing ones count as 0.
    pub fn achievement(&self, name: &str) -> i32 {
        self.achievements
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueDto {
    pub id: i32,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegendStatisticsDto {
    pub best_builder_base_season: Option<SeasonDto>,
    pub previous_builder_base_season: Option<SeasonDto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeasonDto {
    pub id: String,
    pub rank: Option<i32>,
    pub trophies: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AchievementDto {
    pub name: String,
    pub value: i32,
}

// ==================== Rankings ====================

#[derive(Debug, Clone, Deserialize)]
pub struct RankingList {
    #[serde(default)]
    pub items: Vec<RankedPlayer>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedPlayer {
    pub tag: String,
    pub name: String,
    pub rank: i32,
    pub previous_rank: Option<i32>,
    pub builder_base_trophies: i32,
}

// ==================== Wars ====================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClanWarDto {
    pub state: String,
    pub team_size: Option<i32>,
    pub attacks_per_member: Option<i32>,
    #[serde(default, deserialize_with = "clash_time")]
    pub preparation_start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "clash_time")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "clash_time")]
    pub end_time: Option<DateTime<Utc>>,
    pub war_tag: Option<String>,
    #[serde(default)]
    pub clan: WarClanDto,
    #[serde(default)]
    pub opponent: WarClanDto,
}

/// Preparation lengths a friendly war can be configured with, in seconds.
const FRIENDLY_PREPARATION_SECS: [i64; 12] = [
    5 * 60,
    15 * 60,
    30 * 60,
    60 * 60,
    2 * 60 * 60,
    4 * 60 * 60,
    6 * 60 * 60,
    8 * 60 * 60,
    12 * 60 * 60,
    16 * 60 * 60,
    20 * 60 * 60,
    24 * 60 * 60,
];

impl ClanWarDto {
    /// `cwl`, `friendly` or `random`. `None` while the clan is not in a war.
    pub fn war_type(&self) -> Option<&'static str> {
        if self.war_tag.is_some() {
            return Some("cwl");
        }
        let (prep, start) = (self.preparation_start_time?, self.start_time?);
        let preparation = (start - prep).num_seconds();
        if FRIENDLY_PREPARATION_SECS.contains(&preparation) {
            Some("friendly")
        } else {
            Some("random")
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &WarMemberDto> {
        self.clan.members.iter().chain(self.opponent.members.iter())
    }

    pub fn member(&self, tag: &str) -> Option<&WarMemberDto> {
        self.members().find(|m| m.tag == tag)
    }

    /// Every attack of both sides ordered by attack order.
    pub fn attacks(&self) -> Vec<&WarAttackDto> {
        let mut attacks: Vec<_> = self
            .members()
            .flat_map(|m| m.attacks.iter())
            .collect();
        attacks.sort_by_key(|a| a.order);
        attacks
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WarClanDto {
    pub tag: String,
    pub name: String,
    pub badge_urls: Option<BadgeUrls>,
    pub clan_level: i32,
    pub attacks: i32,
    pub stars: i32,
    pub destruction_percentage: f64,
    pub members: Vec<WarMemberDto>,
}

impl WarClanDto {
    pub fn member_attacks(&self) -> impl Iterator<Item = &WarAttackDto> {
        self.members.iter().flat_map(|m| m.attacks.iter())
    }

    pub fn average_attack_duration(&self) -> f64 {
        let (count, total) = self
            .member_attacks()
            .fold((0_u32, 0_i64), |(n, sum), a| (n + 1, sum + a.duration as i64));
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BadgeUrls {
    #[serde(default)]
    pub small: String,
    #[serde(default)]
    pub medium: String,
    #[serde(default)]
    pub large: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarMemberDto {
    pub tag: String,
    pub name: String,
    #[serde(rename = "townhallLevel")]
    pub town_hall_level: i32,
    #[serde(default)]
    pub map_position: i32,
    #[serde(default)]
    pub attacks: Vec<WarAttackDto>,
    #[serde(default)]
    pub opponent_attacks: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarAttackDto {
    pub attacker_tag: String,
    pub defender_tag: String,
    pub stars: i32,
    pub destruction_percentage: i32,
    pub order: i32,
    #[serde(default)]
    pub duration: i32,
}

/// Format of every timestamp in the API, e.g. `20240131T180000.000Z`.
const CLASH_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.fZ";

pub fn parse_clash_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, CLASH_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn clash_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(raw) => parse_clash_time(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`"))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    pub(crate) fn war_json() -> serde_json::Value {
        json!({
            "state": "warEnded",
            "teamSize": 5,
            "attacksPerMember": 1,
            "preparationStartTime": "20240131T170000.000Z",
            "startTime": "20240131T171500.000Z",
            "endTime": "20240131T174500.000Z",
            "clan": {
                "tag": "#CLANA",
                "name": "Alpha",
                "badgeUrls": {"small": "https://example.invalid/a.png"},
                "clanLevel": 20,
                "attacks": 2,
                "stars": 5,
                "destructionPercentage": 90.0,
                "members": [
                    {"tag": "#A1", "name": "a1", "townhallLevel": 16, "mapPosition": 1,
                     "attacks": [{"attackerTag": "#A1", "defenderTag": "#B1", "stars": 3,
                                  "destructionPercentage": 100, "order": 1, "duration": 120}]},
                    {"tag": "#A2", "name": "a2", "townhallLevel": 15, "mapPosition": 2,
                     "attacks": [{"attackerTag": "#A2", "defenderTag": "#B1", "stars": 2,
                                  "destructionPercentage": 80, "order": 3, "duration": 180}]}
                ]
            },
            "opponent": {
                "tag": "#CLANB",
                "name": "Bravo",
                "clanLevel": 18,
                "attacks": 1,
                "stars": 3,
                "destructionPercentage": 60.0,
                "members": [
                    {"tag": "#B1", "name": "b1", "townhallLevel": 16, "mapPosition": 1,
                     "attacks": [{"attackerTag": "#B1", "defenderTag": "#A1", "stars": 3,
                                  "destructionPercentage": 100, "order": 2, "duration": 90}]}
                ]
            }
        })
    }

    #[test]
    fn parses_clash_timestamps() {
        assert_eq!(
            parse_clash_time("20240131T170000.000Z"),
            Some(Utc.with_ymd_and_hms(2024, 1, 31, 17, 0, 0).unwrap())
        );
        assert_eq!(parse_clash_time("2024-01-31"), None);
    }

    #[test]
    fn war_deserializes_and_exposes_attacks_in_order() {
        let war: ClanWarDto = serde_json::from_value(war_json()).unwrap();
        assert_eq!(war.state, "warEnded");
        assert_eq!(war.war_type(), Some("friendly"));
        let orders: Vec<_> = war.attacks().iter().map(|a| a.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(war.member("#B1").map(|m| m.town_hall_level), Some(16));
        assert_eq!(war.clan.average_attack_duration(), 150.0);
    }

    #[test]
    fn random_war_has_day_long_preparation() {
        let mut value = war_json();
        value["startTime"] = json!("20240201T160000.000Z");
        let war: ClanWarDto = serde_json::from_value(value).unwrap();
        assert_eq!(war.war_type(), Some("random"));
    }

    #[test]
    fn not_in_war_has_no_type() {
        let war: ClanWarDto = serde_json::from_value(json!({"state": "notInWar"})).unwrap();
        assert_eq!(war.war_type(), None);
        assert!(war.attacks().is_empty());
    }

    #[test]
    fn achievement_lookup_ignores_case() {
        let player: PlayerDto = serde_json::from_value(json!({
            "tag": "#2PP",
            "name": "Someone",
            "achievements": [{"name": "Un-Build It", "value": 42}]
        }))
        .unwrap();
        assert_eq!(player.achievement("un-build it"), 42);
        assert_eq!(player.achievement("Champion Builder"), 0);
    }
}
