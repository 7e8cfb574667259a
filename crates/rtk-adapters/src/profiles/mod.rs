//! Built-in vendor profiles.
//!
//! Each vendor module embeds its profile as TOML, the same format
//! operators use for site-specific profile files. Code stays out of
//! the vendor definitions on purpose.

pub mod homeassistant;
pub mod tasmota;
pub mod xiaomi;
pub mod zigbee;

use crate::profile::AdapterProfile;

/// All built-in profiles, highest priority first.
pub fn builtin_profiles() -> Vec<AdapterProfile> {
    vec![
        homeassistant::profile(),
        tasmota::profile(),
        xiaomi::profile(),
        zigbee::profile(),
    ]
}

/// Look up one built-in profile by name.
pub fn builtin(name: &str) -> Option<AdapterProfile> {
    builtin_profiles().into_iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtins_load() {
        let profiles = builtin_profiles();
        let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["homeassistant", "tasmota", "xiaomi", "zigbee"]);
        assert!(profiles.iter().all(|p| p.enabled));
    }

    #[test]
    fn priorities_are_distinct_and_ordered() {
        let profiles = builtin_profiles();
        let priorities: Vec<i32> = profiles.iter().map(|p| p.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();
        assert_eq!(priorities, sorted, "priorities must be distinct, descending");
    }

    #[test]
    fn builtin_lookup_by_name() {
        assert!(builtin("tasmota").is_some());
        assert!(builtin("unknown-vendor").is_none());
    }
}
