//! Run ids and human-friendly labels

use chrono::Utc;
use rand::seq::IndexedRandom;

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "daring", "eager", "fancy", "gentle", "hollow", "icy", "jolly",
    "keen", "lively", "mellow", "nimble", "odd", "proud", "quiet", "rapid", "silent", "tidy",
    "upbeat", "vivid", "wild", "young", "zesty",
];

const NOUNS: &[&str] = &[
    "anchor", "badger", "canyon", "dolphin", "ember", "falcon", "glacier", "harbor", "island",
    "jungle", "kettle", "lantern", "meadow", "nebula", "orchard", "pepper", "quartz", "river",
    "summit", "tundra", "umbrella", "valley", "walrus", "yonder", "zephyr",
];

const EMOJIS: &[&str] = &[
    "🚀", "🦊", "🐙", "🌵", "🍀", "🔥", "🌈", "🎯", "🧪", "🦉", "🐝", "🍉", "⚡", "🌻", "🐳", "🎲",
];

/// Unique, sortable run id: timestamp plus a random suffix
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
    let random: u32 = rand::random();
    format!("{timestamp}_{random:08x}")
}

/// Dashed adjective-noun title, e.g. `brave-falcon`
pub fn generate_title() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("river");
    format!("{adjective}-{noun}")
}

pub fn random_emoji() -> String {
    EMOJIS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or("🧪")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_run_ids_unique() {
        let ids: HashSet<_> = (0..200).map(|_| generate_run_id()).collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn test_title_shape() {
        let title = generate_title();
        let (adjective, noun) = title.split_once('-').unwrap();
        assert!(ADJECTIVES.contains(&adjective));
        assert!(NOUNS.contains(&noun));
    }

    #[test]
    fn test_emoji() {
        assert!(EMOJIS.contains(&random_emoji().as_str()));
    }
}
