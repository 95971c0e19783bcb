// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Learning state of protected resources as replicated by the arbitrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LearningConfidence {
    NotReady,
    BadActorsOnly,
    Ready,
}

impl LearningConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningConfidence::NotReady => "NotReady",
            LearningConfidence::BadActorsOnly => "BadActorsOnly",
            LearningConfidence::Ready => "Ready",
        }
    }
}

impl fmt::Display for LearningConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningConfidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NotReady" => Ok(LearningConfidence::NotReady),
            "BadActorsOnly" => Ok(LearningConfidence::BadActorsOnly),
            "Ready" => Ok(LearningConfidence::Ready),
            other => Err(format!("unknown learning confidence '{}'", other)),
        }
    }
}

/// Learning state of one protected resource on one replica
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct LearningState {
    /// `app_protect_dos_name` of the protected resource
    pub protected: String,
    pub learning_confidence: LearningConfidence,
    #[serde(default)]
    pub bad_actors: u32,
    pub unit_hostname: String,
    pub updated_at: DateTime<Utc>,
}

/// Last known good learning state per protected resource
#[derive(Debug, Clone, Default)]
pub struct LearningStateCache {
    states: BTreeMap<String, LearningState>,
}

impl LearningStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `state` unless a newer one is already cached. Returns true when
    /// the cached value changed.
    pub fn update(&mut self, state: LearningState) -> bool {
        match self.states.get(&state.protected) {
            Some(current) if current.updated_at > state.updated_at || *current == state => false,
            _ => {
                self.states.insert(state.protected.clone(), state);
                true
            }
        }
    }

    pub fn get(&self, protected: &str) -> Option<&LearningState> {
        self.states.get(protected)
    }

    pub fn confidence(&self, protected: &str) -> Option<LearningConfidence> {
        self.get(protected).map(|s| s.learning_confidence)
    }

    pub fn is_ready(&self, protected: &str) -> bool {
        self.confidence(protected) == Some(LearningConfidence::Ready)
    }

    /// Drop state of resources that are no longer protected
    pub fn retain(&mut self, protected: &[String]) {
        self.states.retain(|name, _| protected.contains(name));
    }

    pub fn states(&self) -> impl Iterator<Item = &LearningState> {
        self.states.values()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
