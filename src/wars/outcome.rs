use std::cmp::Ordering;
use std::collections::HashSet;

use crate::clash::types::{ClanWarDto, WarClanDto};
use crate::db::models::{AttackRecord, MatchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ongoing,
    Win,
    Loss,
    Tie,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Ongoing => "ongoing",
            Outcome::Win => "win",
            Outcome::Loss => "loss",
            Outcome::Tie => "tie",
        }
    }

    fn from_ordering(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Greater => Outcome::Win,
            Ordering::Less => Outcome::Loss,
            Ordering::Equal => Outcome::Tie,
        }
    }

    fn reverse(self) -> Self {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Loss => Outcome::Win,
            other => other,
        }
    }
}

/// Outcome from the point of view of `war.clan`: stars, then destruction, then
/// the faster average attack.
pub fn clan_outcome(war: &ClanWarDto) -> Outcome {
    if war.state != "warEnded" {
        return Outcome::Ongoing;
    }
    let (clan, opponent) = (&war.clan, &war.opponent);
    let ordering = clan
        .stars
        .cmp(&opponent.stars)
        .then_with(|| {
            clan.destruction_percentage
                .partial_cmp(&opponent.destruction_percentage)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| {
            // Lower duration is better.
            opponent
                .average_attack_duration()
                .partial_cmp(&clan.average_attack_duration())
                .unwrap_or(Ordering::Equal)
        });
    Outcome::from_ordering(ordering)
}

/// Result rows for both sides of the war.
pub fn war_outcome(war: &ClanWarDto) -> [MatchResult; 2] {
    let outcome = clan_outcome(war);
    [
        side_result(&war.clan, outcome),
        side_result(&war.opponent, outcome.reverse()),
    ]
}

fn side_result(clan: &WarClanDto, outcome: Outcome) -> MatchResult {
    MatchResult {
        clan_tag: clan.tag.clone(),
        stars: clan.stars,
        destruction: clan.destruction_percentage,
        duration: clan.average_attack_duration(),
        result: outcome.as_str().to_string(),
        attacks_used: clan.attacks,
    }
}

/// Attacks of both sides in order. The first attack on a defender is its fresh attack.
pub fn attack_records(war: &ClanWarDto) -> Vec<AttackRecord> {
    let mut attacked = HashSet::new();
    let town_hall = |tag: &str| war.member(tag).map_or(0, |m| m.town_hall_level);

    war.attacks()
        .into_iter()
        .map(|attack| AttackRecord {
            attack_order: attack.order,
            attacker_tag: attack.attacker_tag.clone(),
            attacker_th: town_hall(&attack.attacker_tag),
            defender_tag: attack.defender_tag.clone(),
            defender_th: town_hall(&attack.defender_tag),
            stars: attack.stars,
            destruction: attack.destruction_percentage,
            fresh: attacked.insert(attack.defender_tag.as_str()),
            duration: attack.duration,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clash::types::tests::war_json;

    fn war() -> ClanWarDto {
        serde_json::from_value(war_json()).unwrap()
    }

    #[test]
    fn more_stars_win() {
        let [clan, opponent] = war_outcome(&war());
        assert_eq!(clan.result, "win");
        assert_eq!(opponent.result, "loss");
        assert_eq!(clan.stars, 5);
        assert_eq!(clan.attacks_used, 2);
        assert_eq!(clan.duration, 150.0);
    }

    #[test]
    fn destruction_breaks_star_ties() {
        let mut war = war();
        war.opponent.stars = 5;
        war.opponent.destruction_percentage = 95.0;
        assert_eq!(clan_outcome(&war), Outcome::Loss);
    }

    #[test]
    fn faster_attacks_break_full_ties() {
        let mut war = war();
        war.opponent.stars = 5;
        war.opponent.destruction_percentage = 90.0;
        // Clan averages 150s, opponent 90s.
        assert_eq!(clan_outcome(&war), Outcome::Loss);

        war.opponent.members[0].attacks[0].duration = 150;
        assert_eq!(clan_outcome(&war), Outcome::Tie);
        let [clan, opponent] = war_outcome(&war);
        assert_eq!((clan.result.as_str(), opponent.result.as_str()), ("tie", "tie"));
    }

    #[test]
    fn running_war_is_ongoing() {
        let mut war = war();
        war.state = "inWar".into();
        let [clan, opponent] = war_outcome(&war);
        assert_eq!(clan.result, "ongoing");
        assert_eq!(opponent.result, "ongoing");
    }

    #[test]
    fn first_attack_on_a_base_is_fresh() {
        let records = attack_records(&war());
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].defender_tag, "#B1");
        assert!(records[0].fresh);
        assert!(records[1].fresh);
        assert_eq!(records[2].defender_tag, "#B1");
        assert!(!records[2].fresh);
        assert_eq!(records[2].attacker_th, 15);
        assert_eq!(records[2].defender_th, 16);
    }
}
