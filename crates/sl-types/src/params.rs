//! Typed hyperparameter configuration and its canonical serialization.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::SweepResult;
use crate::{internal_error, validation_error};

/// Inclusive bounds of the boosting-iteration count.
pub const ITERATIONS_RANGE: (i64, i64) = (100, 1000);
/// Inclusive bounds of the tree depth.
pub const DEPTH_RANGE: (i64, i64) = (4, 11);
/// Learning rate bounds, sampled on a linear scale.
pub const LEARNING_RATE_RANGE: (f64, f64) = (0.01, 0.3);
/// L2 leaf regularisation bounds, sampled on a log scale.
pub const L2_LEAF_REG_RANGE: (f64, f64) = (1e-3, 10.0);
/// Random strength bounds, sampled on a log scale.
pub const RANDOM_STRENGTH_RANGE: (f64, f64) = (1e-3, 5.0);

/// Trainer parameters that are not searched but still belong to a
/// configuration's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedParams {
    pub eval_metric: String,
    pub loss_function: String,
    pub task_type: String,
    pub verbose: u32,
}

impl Default for FixedParams {
    fn default() -> Self {
        Self {
            eval_metric: "Accuracy".to_string(),
            loss_function: "MultiClass".to_string(),
            task_type: "GPU".to_string(),
            verbose: 0,
        }
    }
}

/// One complete, trainable model configuration.
///
/// Field names double as the parameter names handed to the trainer, so the
/// serialized form is also the deduplication key (see [`Configuration::canonical_key`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub iterations: u32,
    pub depth: u32,
    pub learning_rate: f64,
    pub l2_leaf_reg: f64,
    pub random_strength: f64,
    pub eval_metric: String,
    pub loss_function: String,
    pub task_type: String,
    pub verbose: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_stopping_rounds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_best_model: Option<bool>,
}

impl Configuration {
    pub fn new(
        iterations: u32,
        depth: u32,
        learning_rate: f64,
        l2_leaf_reg: f64,
        random_strength: f64,
        fixed: &FixedParams,
    ) -> Self {
        Self {
            iterations,
            depth,
            learning_rate,
            l2_leaf_reg,
            random_strength,
            eval_metric: fixed.eval_metric.clone(),
            loss_function: fixed.loss_function.clone(),
            task_type: fixed.task_type.clone(),
            verbose: fixed.verbose,
            early_stopping_rounds: None,
            use_best_model: None,
        }
    }

    /// Canonical serialization: compact JSON with keys sorted.
    ///
    /// Two configurations are the same trial iff their keys are byte-identical.
    pub fn canonical_key(&self) -> SweepResult<String> {
        let sorted: BTreeMap<String, Value> = match serde_json::to_value(self)? {
            Value::Object(map) => map.into_iter().collect(),
            other => return Err(internal_error!("configuration serialized to {other}")),
        };
        Ok(serde_json::to_string(&sorted)?)
    }

    /// Rewrite a stored key in canonical form, so keys written with other
    /// separators or key orders (e.g. `{"depth": 6, "eval_metric": ...}`)
    /// compare equal to freshly generated ones. Unparsable keys are returned
    /// unchanged.
    pub fn normalize_key(raw: &str) -> String {
        if let Ok(key) = Self::from_key(raw).and_then(|config| config.canonical_key()) {
            return key;
        }
        match serde_json::from_str::<BTreeMap<String, Value>>(raw) {
            Ok(sorted) => serde_json::to_string(&sorted).unwrap_or_else(|_| raw.to_string()),
            Err(_) => raw.to_string(),
        }
    }

    /// Rebuild a configuration from a ledger key.
    pub fn from_key(key: &str) -> SweepResult<Self> {
        let config: Self = serde_json::from_str(key)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation: finite, positive numeric parameters.
    pub fn validate(&self) -> SweepResult<()> {
        if self.iterations == 0 {
            return Err(validation_error!("iterations must be positive"));
        }
        if self.depth == 0 {
            return Err(validation_error!("depth must be positive"));
        }
        for (name, value) in [
            ("learning_rate", self.learning_rate),
            ("l2_leaf_reg", self.l2_leaf_reg),
            ("random_strength", self.random_strength),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(validation_error!("{name} must be finite and positive, got {value}"));
            }
        }
        Ok(())
    }

    /// Whether the searched parameters sit inside the sweep's search ranges.
    pub fn within_search_space(&self) -> bool {
        let iterations = i64::from(self.iterations);
        let depth = i64::from(self.depth);
        (ITERATIONS_RANGE.0..=ITERATIONS_RANGE.1).contains(&iterations)
            && (DEPTH_RANGE.0..=DEPTH_RANGE.1).contains(&depth)
            && (LEARNING_RATE_RANGE.0..=LEARNING_RATE_RANGE.1).contains(&self.learning_rate)
            && (L2_LEAF_REG_RANGE.0..=L2_LEAF_REG_RANGE.1).contains(&self.l2_leaf_reg)
            && (RANDOM_STRENGTH_RANGE.0..=RANDOM_STRENGTH_RANGE.1).contains(&self.random_strength)
    }
}
