// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of HaMirror.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use serde::{Deserialize, Serialize};

/// Declarative rule describing how to recognize entities belonging to one
/// physical room.
///
/// Match rule strength, strongest first: exact entity ids, entity id
/// prefixes, friendly-name substrings, alias tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMapping {
    pub room_id: String,
    pub title: String,
    /// Loose lowercase tokens matched as substrings of the id or the name.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Exact entity ids (highest confidence).
    #[serde(default)]
    pub entity_ids: Vec<String>,
    /// Prefixes matched against the lowercased entity id.
    #[serde(default)]
    pub entity_id_prefixes: Vec<String>,
    /// Substrings matched against the lowercased friendly name.
    #[serde(default)]
    pub friendly_name_includes: Vec<String>,
}

/// Resolves an entity to the best-matching room, or `None`.
///
/// The four rule tiers are evaluated in fixed precedence and each tier scans
/// the whole table before the next one is tried, so a deliberate exact-id or
/// prefix rule can never lose to a coincidental substring hit in a record
/// that happens to come earlier in the table. Within a tier, table order
/// breaks ties.
pub fn resolve_room<'a>(
    rooms: &'a [RoomMapping],
    entity_id: Option<&str>,
    friendly_name: Option<&str>,
) -> Option<&'a RoomMapping> {
    let raw_id = entity_id.unwrap_or("");
    let id = raw_id.to_lowercase();
    let name = friendly_name.unwrap_or("").to_lowercase();
    if id.is_empty() && name.is_empty() {
        return None;
    }

    if !raw_id.is_empty()
        && let Some(room) = rooms
            .iter()
            .find(|r| r.entity_ids.iter().any(|e| e == raw_id))
    {
        return Some(room);
    }

    if !id.is_empty()
        && let Some(room) = rooms.iter().find(|r| {
            r.entity_id_prefixes
                .iter()
                .any(|p| id.starts_with(&p.to_lowercase()))
        })
    {
        return Some(room);
    }

    if !name.is_empty()
        && let Some(room) = rooms.iter().find(|r| {
            r.friendly_name_includes
                .iter()
                .any(|n| name.contains(&n.to_lowercase()))
        })
    {
        return Some(room);
    }

    rooms.iter().find(|r| {
        r.aliases.iter().any(|alias| {
            let token = alias.to_lowercase();
            id.contains(&token) || name.contains(&token)
        })
    })
}

/// The built-in campus table. Loaded once at startup; not mutated at runtime.
pub fn default_rooms() -> Vec<RoomMapping> {
    fn room(
        room_id: &str,
        title: &str,
        aliases: &[&str],
        entity_ids: &[&str],
        entity_id_prefixes: &[&str],
        friendly_name_includes: &[&str],
    ) -> RoomMapping {
        let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        RoomMapping {
            room_id: room_id.to_string(),
            title: title.to_string(),
            aliases: owned(aliases),
            entity_ids: owned(entity_ids),
            entity_id_prefixes: owned(entity_id_prefixes),
            friendly_name_includes: owned(friendly_name_includes),
        }
    }

    vec![
        room(
            "a.5",
            "MakerSpace",
            &["makerspace", "maker space", "a5"],
            &[
                "light.generic_zigbee_coordinator_ezsp_makerspace_lights",
                "person.makerspace",
            ],
            &[
                "binary_sensor.makerspace_",
                "sensor.makerspace_",
                "calendar.code_1_makerspace",
            ],
            &["makerspace"],
        ),
        room(
            "desk",
            "Front Desk",
            &["desk", "front desk"],
            &[],
            &["sensor.macbook_pro_21_"],
            &["macbook pro"],
        ),
        room(
            "a.6",
            "A.6",
            &["a6", "a.6"],
            &[],
            &["binary_sensor.a6_", "sensor.a6_", "calendar.code_1_muted_a_6"],
            &["a6"],
        ),
        room(
            "a.11-a.12",
            "A.11–A.12",
            &["a11", "a12", "tet a11", "a11-a12", "a.11", "a.12"],
            &[],
            &["calendar.code_1_tet_a_11"],
            &["a11", "a12", "tet"],
        ),
        room(
            "a.2",
            "A.2",
            &["a2", "jungle", "a.2"],
            &[],
            &["calendar.code_1_jungle_a_2"],
            &["a2", "jungle"],
        ),
        room(
            "b.14",
            "B.14",
            &["b14", "dark matter", "b.14"],
            &[],
            &["calendar.code_1_dark_matter_b_14"],
            &["b14", "dark matter"],
        ),
        room(
            "b.4",
            "B.4",
            &["b4", "b.4"],
            &[],
            &["binary_sensor.b4_", "sensor.b4_"],
            &["b4"],
        ),
        room(
            "b.5",
            "B.5",
            &["b5", "b.5"],
            &[],
            &["binary_sensor.b5_"],
            &["b5"],
        ),
        room(
            "b.6",
            "B.6",
            &["b6", "b.6"],
            &[],
            &["binary_sensor.b6_", "sensor.b6_"],
            &["b6"],
        ),
        room(
            "b.7",
            "B.7",
            &["b7", "b.7"],
            &[],
            &["binary_sensor.b7_", "sensor.b7_"],
            &["b7"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_tier_wins_before_alias_tier() {
        let rooms = default_rooms();
        let room = resolve_room(
            &rooms,
            Some("sensor.a6_occupancy_occupancy_4"),
            Some("A6 Occupancy"),
        )
        .unwrap();
        assert_eq!(room.room_id, "a.6");
    }

    #[test]
    fn exact_id_beats_an_earlier_records_alias() {
        // "first" would hit via its alias, but "second" owns the exact id and
        // exact matches are evaluated across the whole table first.
        let rooms = vec![
            RoomMapping {
                room_id: "first".into(),
                title: "First".into(),
                aliases: vec!["lamp".into()],
                entity_ids: vec![],
                entity_id_prefixes: vec![],
                friendly_name_includes: vec![],
            },
            RoomMapping {
                room_id: "second".into(),
                title: "Second".into(),
                aliases: vec![],
                entity_ids: vec!["light.lamp".into()],
                entity_id_prefixes: vec![],
                friendly_name_includes: vec![],
            },
        ];

        let room = resolve_room(&rooms, Some("light.lamp"), None).unwrap();
        assert_eq!(room.room_id, "second");
    }

    #[test]
    fn friendly_name_substring_matches_case_insensitively() {
        let rooms = default_rooms();
        let room = resolve_room(&rooms, None, Some("Dark Matter Projector")).unwrap();
        assert_eq!(room.room_id, "b.14");
    }

    #[test]
    fn alias_tier_is_the_last_resort() {
        let rooms = default_rooms();
        let room = resolve_room(&rooms, Some("media_player.jungle_speaker"), None).unwrap();
        assert_eq!(room.room_id, "a.2");
    }

    #[test]
    fn no_inputs_short_circuits_without_scanning() {
        let rooms = default_rooms();
        assert!(resolve_room(&rooms, None, None).is_none());
        assert!(resolve_room(&rooms, Some(""), Some("")).is_none());
    }

    #[test]
    fn unmatched_entity_returns_none() {
        let rooms = default_rooms();
        assert!(resolve_room(&rooms, Some("sensor.garage_door"), Some("Garage")).is_none());
    }

    #[test]
    fn exact_id_membership_resolves_from_the_table() {
        let rooms = default_rooms();
        let room = resolve_room(&rooms, Some("person.makerspace"), None).unwrap();
        assert_eq!(room.room_id, "a.5");
    }
}
