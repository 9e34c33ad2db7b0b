//! The durable trainer profile document and its defaults.
//!
//! The shape mirrors what clients expect in the `state` event and what the
//! server persists to disk: a typed core (identity, progress, settings) with
//! dynamic `serde_json::Value` fields where clients own the schema (party
//! creatures, inventory stacks, story flags).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrainerProfile {
    pub trainer: Trainer,
    pub party: Vec<Value>,
    pub inventory: Vec<Value>,
    pub progress: Progress,
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trainer {
    /// Globally unique, immutable once assigned: `slug(name)-<hex8>`.
    pub id: String,
    pub name: String,
    pub sprite: String,
    pub position: Position,
    pub map_id: String,
    pub money: i64,
    /// Cumulative play time in seconds; monotonically non-decreasing.
    pub play_time: u64,
}

impl Default for Trainer {
    fn default() -> Self {
        Trainer {
            id: String::new(),
            name: String::new(),
            sprite: crate::DEFAULT_SPRITE.to_string(),
            position: Position::default(),
            map_id: crate::DEFAULT_MAP_ID.to_string(),
            money: 3000,
            play_time: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Progress {
    /// Onboarding gate: movement and most actions are locked until set.
    pub starter_chosen: Option<String>,
    pub badges: Vec<String>,
    pub story_flags: BTreeMap<String, Value>,
    pub seen_pokemon: Vec<Value>,
    pub caught_pokemon: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub volume: VolumeSettings,
    pub key_bindings: BTreeMap<String, Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            volume: VolumeSettings::default(),
            key_bindings: default_key_bindings(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
    pub master: f32,
    pub music: f32,
    pub sfx: f32,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        VolumeSettings {
            master: 1.0,
            music: 0.8,
            sfx: 0.8,
        }
    }
}

fn default_key_bindings() -> BTreeMap<String, Vec<String>> {
    let bindings = [
        ("move_up", vec!["w", "arrowup"]),
        ("move_down", vec!["s", "arrowdown"]),
        ("move_left", vec!["a", "arrowleft"]),
        ("move_right", vec!["d", "arrowright"]),
        ("menu", vec!["escape"]),
        ("interact", vec!["space", "enter"]),
    ];

    bindings
        .into_iter()
        .map(|(action, keys)| {
            (
                action.to_string(),
                keys.into_iter().map(str::to_string).collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_matches_expected_values() {
        let profile = TrainerProfile::default();

        assert_eq!(profile.trainer.id, "");
        assert_eq!(profile.trainer.sprite, "male_1.png");
        assert_eq!(profile.trainer.map_id, "overworld");
        assert_eq!(profile.trainer.money, 3000);
        assert_eq!(profile.trainer.play_time, 0);
        assert_eq!(profile.trainer.position, Position { x: 0, y: 0 });
        assert!(profile.party.is_empty());
        assert!(profile.inventory.is_empty());
        assert_eq!(profile.progress.starter_chosen, None);
        assert!(profile.progress.badges.is_empty());
        assert!(profile.progress.story_flags.is_empty());
        assert_eq!(profile.settings.volume.master, 1.0);
        assert_eq!(profile.settings.volume.music, 0.8);
        assert_eq!(
            profile.settings.key_bindings.get("move_up"),
            Some(&vec!["w".to_string(), "arrowup".to_string()])
        );
    }

    #[test]
    fn sparse_document_decodes_with_defaults() {
        let profile: TrainerProfile =
            serde_json::from_str(r#"{"trainer":{"name":"Misty"}}"#).unwrap();

        assert_eq!(profile.trainer.name, "Misty");
        assert_eq!(profile.trainer.sprite, "male_1.png");
        assert_eq!(profile.trainer.money, 3000);
        assert_eq!(profile.progress.starter_chosen, None);
        assert_eq!(
            profile.settings.key_bindings.get("interact"),
            Some(&vec!["space".to_string(), "enter".to_string()])
        );
    }

    #[test]
    fn roundtrip_preserves_dynamic_fields() {
        let mut profile = TrainerProfile::default();
        profile.trainer.name = "Brock".to_string();
        profile.party = vec![serde_json::json!({"species": "onix", "level": 12})];
        profile
            .progress
            .story_flags
            .insert("met_rival".to_string(), serde_json::json!(true));

        let encoded = serde_json::to_string(&profile).unwrap();
        let decoded: TrainerProfile = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, profile);
    }
}
