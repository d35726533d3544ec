// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runtime-adjustable knobs that live outside [`crate::config::Context`].
//!
//! `Context` is built once and never mutated after `Context::build` returns
//! (see its module docs). A handful of settings are legitimately dynamic
//! even so - most notably log verbosity, which operators reasonably expect
//! to raise on a running driver without a restart. Those knobs live here,
//! behind `ArcSwap` for the single global default and a `DashMap` for
//! per-channel overrides, so an agent can read them lock-free from its hot
//! loop via [`RuntimeKnobs::enabled`] - see the Conductor's per-channel log
//! call sites (`agents/conductor.rs`) for the consulting side.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use log::{Level, LevelFilter};

/// Lock-free, hot-swappable log verbosity: a single default plus optional
/// per-channel overrides, consulted on every log call site that cares.
pub struct RuntimeKnobs {
    default_level: ArcSwap<LevelFilter>,
    channel_overrides: DashMap<String, LevelFilter>,
}

impl RuntimeKnobs {
    #[must_use]
    pub fn new(default_level: LevelFilter) -> Self {
        Self {
            default_level: ArcSwap::from_pointee(default_level),
            channel_overrides: DashMap::new(),
        }
    }

    /// Replace the default level. Readers observe the new value on their
    /// very next check; no coordination with in-flight agents is needed.
    pub fn set_default_level(&self, level: LevelFilter) {
        self.default_level.store(Arc::new(level));
    }

    /// Override the effective level for one canonical channel string.
    pub fn set_channel_override(&self, channel: String, level: LevelFilter) {
        self.channel_overrides.insert(channel, level);
    }

    pub fn clear_channel_override(&self, channel: &str) {
        self.channel_overrides.remove(channel);
    }

    /// The level that should gate a log call concerning `channel`, if any;
    /// falls back to the global default when there is no override.
    #[must_use]
    pub fn level_for(&self, channel: &str) -> LevelFilter {
        self.channel_overrides
            .get(channel)
            .map(|entry| *entry)
            .unwrap_or_else(|| **self.default_level.load())
    }

    /// Whether a log call at `level` concerning `channel` should fire,
    /// per the effective knob for that channel. Call sites that log about
    /// a specific channel guard on this instead of relying solely on the
    /// `log` crate's process-wide static max level.
    #[must_use]
    pub fn enabled(&self, channel: &str, level: Level) -> bool {
        self.level_for(channel) >= level
    }
}

impl Default for RuntimeKnobs {
    fn default() -> Self {
        Self::new(LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_applies_without_overrides() {
        let knobs = RuntimeKnobs::new(LevelFilter::Warn);
        assert_eq!(knobs.level_for("udp://localhost:4000"), LevelFilter::Warn);
    }

    #[test]
    fn channel_override_wins_over_default() {
        let knobs = RuntimeKnobs::new(LevelFilter::Warn);
        knobs.set_channel_override("udp://localhost:4000".into(), LevelFilter::Trace);
        assert_eq!(knobs.level_for("udp://localhost:4000"), LevelFilter::Trace);
        assert_eq!(knobs.level_for("udp://localhost:5000"), LevelFilter::Warn);
    }

    #[test]
    fn clearing_an_override_reverts_to_the_default() {
        let knobs = RuntimeKnobs::new(LevelFilter::Warn);
        knobs.set_channel_override("udp://localhost:4000".into(), LevelFilter::Trace);
        knobs.clear_channel_override("udp://localhost:4000");
        assert_eq!(knobs.level_for("udp://localhost:4000"), LevelFilter::Warn);
    }

    #[test]
    fn set_default_level_is_observed_immediately() {
        let knobs = RuntimeKnobs::new(LevelFilter::Warn);
        knobs.set_default_level(LevelFilter::Debug);
        assert_eq!(knobs.level_for("anything"), LevelFilter::Debug);
    }

    #[test]
    fn enabled_gates_on_the_effective_per_channel_level() {
        let knobs = RuntimeKnobs::new(LevelFilter::Warn);
        assert!(!knobs.enabled("udp://localhost:4000", Level::Debug));

        knobs.set_channel_override("udp://localhost:4000".into(), LevelFilter::Debug);
        assert!(knobs.enabled("udp://localhost:4000", Level::Debug));
        assert!(!knobs.enabled("udp://localhost:5000", Level::Debug));
    }
}
