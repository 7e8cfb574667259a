//! Adapter registry: profile lookup and message resolution.
//!
//! Resolution is an explicit, testable contract: among enabled profiles
//! whose patterns match and whose capability check passes, the highest
//! `(priority, pattern specificity)` wins, with registration order as
//! the stable tie-break.

use std::collections::HashMap;

use thiserror::Error;

use rtk_protocol::{FlexiblePayload, Specificity};

use crate::profile::AdapterProfile;

/// Errors raised by registry mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate profile name '{0}'")]
    Duplicate(String),

    #[error("unknown profile '{0}'")]
    Unknown(String),
}

/// Holds every configured adapter profile, indexed by name.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    profiles: Vec<AdapterProfile>,
    index: HashMap<String, usize>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile. Names are unique; duplicates are rejected.
    pub fn register(&mut self, profile: AdapterProfile) -> Result<(), RegistryError> {
        if self.index.contains_key(&profile.name) {
            return Err(RegistryError::Duplicate(profile.name.clone()));
        }
        self.index.insert(profile.name.clone(), self.profiles.len());
        self.profiles.push(profile);
        Ok(())
    }

    /// Remove a profile by name, returning it.
    pub fn unregister(&mut self, name: &str) -> Result<AdapterProfile, RegistryError> {
        let position = self
            .index
            .remove(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;
        let profile = self.profiles.remove(position);
        // Positions after the removed entry shifted down by one.
        for index in self.index.values_mut() {
            if *index > position {
                *index -= 1;
            }
        }
        Ok(profile)
    }

    pub fn get(&self, name: &str) -> Option<&AdapterProfile> {
        self.index.get(name).map(|&i| &self.profiles[i])
    }

    pub fn list(&self, enabled_only: bool) -> Vec<&AdapterProfile> {
        self.profiles
            .iter()
            .filter(|p| !enabled_only || p.enabled)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Union of every enabled profile's uplink subscription filters.
    pub fn uplink_subscribe_filters(&self) -> Vec<String> {
        let mut filters = Vec::new();
        for profile in self.list(true) {
            for filter in profile.uplink_subscribe_filters() {
                if !filters.contains(&filter) {
                    filters.push(filter);
                }
            }
        }
        filters
    }

    /// Profile owning an uplink message, per the resolution contract.
    pub fn resolve_uplink(
        &self,
        topic: &str,
        payload: &FlexiblePayload,
    ) -> Option<&AdapterProfile> {
        self.resolve_by(|profile| profile.uplink_specificity(topic, payload))
    }

    /// Profile owning a downlink message, per the resolution contract.
    pub fn resolve_downlink(
        &self,
        topic: &str,
        payload: &FlexiblePayload,
    ) -> Option<&AdapterProfile> {
        self.resolve_by(|profile| {
            if profile.can_handle_downlink(topic, payload) {
                profile.downlink_specificity(topic)
            } else {
                None
            }
        })
    }

    /// Shared scoring: max `(priority, specificity)`, first registered
    /// wins ties (strictly-greater comparison keeps the earlier entry).
    fn resolve_by<F>(&self, capability: F) -> Option<&AdapterProfile>
    where
        F: Fn(&AdapterProfile) -> Option<Specificity>,
    {
        let mut best: Option<(&AdapterProfile, (i32, Specificity))> = None;
        for profile in self.profiles.iter().filter(|p| p.enabled) {
            let Some(specificity) = capability(profile) else {
                continue;
            };
            let score = (profile.priority, specificity);
            let better = match &best {
                Some((_, current)) => score > *current,
                None => true,
            };
            if better {
                best = Some((profile, score));
            }
        }
        best.map(|(profile, _)| profile)
    }
}
