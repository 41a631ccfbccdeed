use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// Integer fields an administrator may change, with their inclusive maximum.
pub const ACTIVE_INTEGER_FIELDS: &[(&str, u32)] = &[
    ("games", u32::MAX),
    ("depth", 31),
    ("save_min_ply", 31),
    ("save_max_ply", 511),
    ("random_min_ply", 31),
    ("random_50_ply", 31),
    ("random_10_ply", 255),
    ("random_move_count", 31),
];

/// The boolean active field; emitted to the engine as a bare flag.
pub const SKIP_NOISY_FIELD: &str = "skipnoisy";

/// Parameters every batch is generated with.
///
/// The trailing fields are stored and served but not yet consumed by the
/// engine; administrative updates never touch them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub games: u32,
    pub depth: u32,
    pub save_min_ply: u32,
    pub save_max_ply: u32,
    pub random_min_ply: u32,
    pub random_50_ply: u32,
    pub random_10_ply: u32,
    pub random_move_count: u32,
    pub skipnoisy: bool,

    #[serde(default = "default_standard_prob")]
    pub standard_start_pos_prob: f64,
    #[serde(default = "default_frc_prob")]
    pub frc_start_pos_prob: f64,
    #[serde(default = "default_dfrc_prob")]
    pub dfrc_start_pos_prob: f64,
    #[serde(default = "default_true")]
    pub adjudicate_draws_by_score: bool,
    #[serde(default = "default_true")]
    pub adjudicate_draws_by_insufficient_mating_material: bool,
}

fn default_standard_prob() -> f64 {
    0.40
}

fn default_frc_prob() -> f64 {
    0.33
}

fn default_dfrc_prob() -> f64 {
    0.27
}

fn default_true() -> bool {
    true
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            games: 10,
            depth: 9,
            save_min_ply: 3,
            save_max_ply: 400,
            random_min_ply: 3,
            random_50_ply: 7,
            random_10_ply: 16,
            random_move_count: 6,
            skipnoisy: true,
            standard_start_pos_prob: default_standard_prob(),
            frc_start_pos_prob: default_frc_prob(),
            dfrc_start_pos_prob: default_dfrc_prob(),
            adjudicate_draws_by_score: true,
            adjudicate_draws_by_insufficient_mating_material: true,
        }
    }
}

impl ParameterSet {
    /// Active integer fields in engine argument order.
    pub fn integer_fields(&self) -> [(&'static str, u32); 8] {
        [
            ("games", self.games),
            ("depth", self.depth),
            ("save_min_ply", self.save_min_ply),
            ("save_max_ply", self.save_max_ply),
            ("random_min_ply", self.random_min_ply),
            ("random_50_ply", self.random_50_ply),
            ("random_10_ply", self.random_10_ply),
            ("random_move_count", self.random_move_count),
        ]
    }

    fn integer_field_mut(&mut self, name: &str) -> Option<&mut u32> {
        match name {
            "games" => Some(&mut self.games),
            "depth" => Some(&mut self.depth),
            "save_min_ply" => Some(&mut self.save_min_ply),
            "save_max_ply" => Some(&mut self.save_max_ply),
            "random_min_ply" => Some(&mut self.random_min_ply),
            "random_50_ply" => Some(&mut self.random_50_ply),
            "random_10_ply" => Some(&mut self.random_10_ply),
            "random_move_count" => Some(&mut self.random_move_count),
            _ => None,
        }
    }

    /// Apply submitted form values to a copy of this set.
    ///
    /// Only active fields are read; anything else is ignored. Fails without
    /// modifying anything if a submitted integer does not parse or is out of
    /// range.
    pub fn with_updates(&self, form: &HashMap<String, String>) -> Result<ParameterSet> {
        let mut next = self.clone();

        for &(name, max) in ACTIVE_INTEGER_FIELDS {
            let Some(raw) = form.get(name) else {
                continue;
            };
            let value = coerce_integer(name, raw, max)?;
            if let Some(slot) = next.integer_field_mut(name) {
                *slot = value;
            }
        }

        if let Some(raw) = form.get(SKIP_NOISY_FIELD) {
            next.skipnoisy = coerce_bool(raw);
        }

        for key in form.keys() {
            let active = key == SKIP_NOISY_FIELD
                || ACTIVE_INTEGER_FIELDS.iter().any(|(name, _)| *name == key.as_str());
            if !active {
                tracing::debug!(field = %key, "Ignoring non-active parameter field");
            }
        }

        Ok(next)
    }
}

fn coerce_integer(field: &str, raw: &str, max: u32) -> Result<u32> {
    let invalid = |reason: String| FleetError::InvalidParameter {
        field: field.to_string(),
        reason,
    };
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid(format!("{raw:?} is not an integer")))?;
    if value < 0 || value > i64::from(max) {
        return Err(invalid(format!("{value} is outside 0..={max}")));
    }
    Ok(value as u32)
}

fn coerce_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes"
    )
}

/// What a node receives when it polls for parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub parameters: ParameterSet,
    /// Increments on every accepted update. Nodes compare this against the
    /// version they last applied.
    #[serde(default)]
    pub version: u64,
    /// Set by every update and cleared by the first read after it. With
    /// several pollers only one of them observes `true`.
    pub changed: bool,
}

/// The live parameter set plus its change indicator.
#[derive(Debug)]
pub struct ParameterStore {
    current: ParameterSet,
    version: u64,
    changed: AtomicBool,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(ParameterSet::default())
    }
}

impl ParameterStore {
    /// A fresh store reports `changed` to its first reader.
    pub fn new(initial: ParameterSet) -> Self {
        Self {
            current: initial,
            version: 1,
            changed: AtomicBool::new(true),
        }
    }

    /// Read the parameters, atomically clearing the change indicator.
    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            parameters: self.current.clone(),
            version: self.version,
            changed: self.changed.swap(false, Ordering::SeqCst),
        }
    }

    /// Read the parameters without touching the change indicator.
    pub fn current(&self) -> &ParameterSet {
        &self.current
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Validate and apply an administrative update.
    pub fn update(&mut self, form: &HashMap<String, String>) -> Result<&ParameterSet> {
        let next = self.current.with_updates(form)?;
        self.current = next;
        self.version += 1;
        self.changed.store(true, Ordering::SeqCst);
        tracing::info!(version = self.version, "Parameters updated");
        Ok(&self.current)
    }
}
