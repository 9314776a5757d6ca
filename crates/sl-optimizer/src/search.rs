//! Search space definitions and sampling strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use sl_types::{
    DEPTH_RANGE, ITERATIONS_RANGE, L2_LEAF_REG_RANGE, LEARNING_RATE_RANGE, RANDOM_STRENGTH_RANGE,
};

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as understood by the trainer (e.g. "depth").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<String> },
}

/// A concrete parameter value produced by a search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

/// A sampled point: parameter name → value.
pub type ParamMap = HashMap<String, ParameterValue>;

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    /// The gradient-boosting search space swept by default.
    pub fn gradient_boosting() -> Self {
        Self::new()
            .add_int("iterations", ITERATIONS_RANGE.0, ITERATIONS_RANGE.1)
            .add_int("depth", DEPTH_RANGE.0, DEPTH_RANGE.1)
            .add_float("learning_rate", LEARNING_RATE_RANGE.0, LEARNING_RATE_RANGE.1)
            .add_log_uniform("l2_leaf_reg", L2_LEAF_REG_RANGE.0, L2_LEAF_REG_RANGE.1)
            .add_log_uniform(
                "random_strength",
                RANDOM_STRENGTH_RANGE.0,
                RANDOM_STRENGTH_RANGE.1,
            )
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    /// Whether `params` assigns an in-range value to every dimension.
    pub fn contains(&self, params: &ParamMap) -> bool {
        self.parameters.iter().all(|def| match (&def.kind, params.get(&def.name)) {
            (ParameterKind::IntRange { low, high }, Some(ParameterValue::Int(v))) => {
                (*low..=*high).contains(v)
            }
            (ParameterKind::FloatRange { low, high }, Some(ParameterValue::Float(v)))
            | (ParameterKind::LogUniform { low, high }, Some(ParameterValue::Float(v))) => {
                (*low..=*high).contains(v)
            }
            (ParameterKind::Choice { values }, Some(ParameterValue::Text(v))) => values.contains(v),
            _ => false,
        })
    }

    fn sample_uniform<R: Rng>(&self, rng: &mut R) -> ParamMap {
        self.parameters
            .iter()
            .map(|param| (param.name.clone(), sample_dimension(&param.kind, rng)))
            .collect()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_dimension<R: Rng>(kind: &ParameterKind, rng: &mut R) -> ParameterValue {
    match kind {
        ParameterKind::FloatRange { low, high } => {
            ParameterValue::Float(rng.random_range(*low..=*high))
        }
        ParameterKind::IntRange { low, high } => ParameterValue::Int(rng.random_range(*low..=*high)),
        ParameterKind::LogUniform { low, high } => {
            let log_val: f64 = rng.random_range(low.ln()..=high.ln());
            ParameterValue::Float(log_val.exp().clamp(*low, *high))
        }
        ParameterKind::Choice { values } => {
            let idx = rng.random_range(0..values.len().max(1));
            ParameterValue::Text(values.get(idx).cloned().unwrap_or_default())
        }
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of parameter combinations to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<ParamMap>;

    /// Report completed trial results so adaptive strategies can learn.
    fn report(&mut self, _params: &ParamMap, _objective: f64) {}

    /// Number of observations the strategy has learned from.
    fn observations(&self) -> usize {
        0
    }

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: seeded_rng(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParamMap> {
        (0..count)
            .map(|_| self.space.sample_uniform(&mut self.rng))
            .collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Tree-structured Parzen estimator ----

/// Bayesian optimization with a tree-structured Parzen estimator.
///
/// Completed observations are split at the `gamma` quantile into a "good" and
/// a "bad" group (objective maximized). Each dimension is then sampled to
/// maximise the density ratio l(x)/g(x) between the two groups. Until
/// `n_startup` observations exist, sampling is uniform.
#[derive(Debug, Clone)]
pub struct TpeSearch {
    space: SearchSpace,
    observations: Vec<(ParamMap, f64)>,
    gamma: f64,
    n_startup: usize,
    n_candidates: usize,
    bandwidth: f64,
    rng: StdRng,
}

impl TpeSearch {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            observations: Vec::new(),
            gamma: 0.25,
            n_startup: 10,
            n_candidates: 24,
            bandwidth: 1.0,
            rng: seeded_rng(seed),
        }
    }

    /// Quantile separating good from bad observations.
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(0.01, 0.99);
        self
    }

    /// Number of uniformly sampled trials before the estimator kicks in.
    pub fn with_startup(mut self, n: usize) -> Self {
        self.n_startup = n.max(1);
        self
    }

    fn split(&self) -> (Vec<&ParamMap>, Vec<&ParamMap>) {
        let mut ranked: Vec<&(ParamMap, f64)> = self.observations.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let n = ranked.len();
        let n_good = ((n as f64) * self.gamma).ceil() as usize;
        let n_good = n_good.max(1).min(n.saturating_sub(1).max(1));

        let (good, bad) = ranked.split_at(n_good.min(n));
        (
            good.iter().map(|(p, _)| p).collect(),
            bad.iter().map(|(p, _)| p).collect(),
        )
    }

    fn sample_tpe(&mut self) -> ParamMap {
        let (good, bad) = self.split();
        let good: Vec<ParamMap> = good.into_iter().cloned().collect();
        let bad: Vec<ParamMap> = bad.into_iter().cloned().collect();

        let mut params = HashMap::new();
        for param in self.space.parameters.clone() {
            let value = match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    let g = floats(&good, &param.name, false);
                    let b = floats(&bad, &param.name, false);
                    let v = self.sample_continuous(&g, &b, *low, *high);
                    ParameterValue::Float(v.clamp(*low, *high))
                }
                ParameterKind::LogUniform { low, high } => {
                    let g = floats(&good, &param.name, true);
                    let b = floats(&bad, &param.name, true);
                    let v = self.sample_continuous(&g, &b, low.ln(), high.ln());
                    ParameterValue::Float(v.exp().clamp(*low, *high))
                }
                ParameterKind::IntRange { low, high } => {
                    let g = ints(&good, &param.name, *low, *high);
                    let b = ints(&bad, &param.name, *low, *high);
                    ParameterValue::Int(self.sample_discrete(&g, &b, *low, *high))
                }
                ParameterKind::Choice { values } => {
                    let g = choices(&good, &param.name, values);
                    let b = choices(&bad, &param.name, values);
                    let idx = self.sample_discrete(&g, &b, 0, values.len() as i64 - 1);
                    ParameterValue::Text(values.get(idx as usize).cloned().unwrap_or_default())
                }
            };
            params.insert(param.name.clone(), value);
        }
        params
    }

    /// Draw candidates around good points, keep the best l/g ratio.
    fn sample_continuous(&mut self, good: &[f64], bad: &[f64], low: f64, high: f64) -> f64 {
        if good.is_empty() || high <= low {
            return self.rng.random_range(low..=high.max(low));
        }

        let bandwidth = self.bandwidth * (high - low) / 10.0;
        let mut best_value = low;
        let mut best_ratio = f64::NEG_INFINITY;

        for _ in 0..self.n_candidates {
            let base = good[self.rng.random_range(0..good.len())];
            // Box-Muller transform for Gaussian noise
            let u1: f64 = self.rng.random::<f64>().max(1e-10);
            let u2: f64 = self.rng.random();
            let noise =
                (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos() * bandwidth;
            let candidate = (base + noise).clamp(low, high);

            let ratio = kde_score(candidate, good, bandwidth) / (kde_score(candidate, bad, bandwidth) + 1e-10);
            if ratio > best_ratio {
                best_ratio = ratio;
                best_value = candidate;
            }
        }
        best_value
    }

    /// Sample an integer in [low, high] proportionally to smoothed l/g counts.
    fn sample_discrete(&mut self, good: &[i64], bad: &[i64], low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        let range = (high - low + 1) as usize;
        let mut good_counts = vec![1.0; range];
        let mut bad_counts = vec![1.0; range];
        for &v in good {
            good_counts[(v - low) as usize] += 1.0;
        }
        for &v in bad {
            bad_counts[(v - low) as usize] += 1.0;
        }

        let weights: Vec<f64> = good_counts
            .iter()
            .zip(&bad_counts)
            .map(|(l, g)| l / g)
            .collect();
        let total: f64 = weights.iter().sum();

        let r: f64 = self.rng.random::<f64>() * total;
        let mut cumsum = 0.0;
        for (i, w) in weights.iter().enumerate() {
            cumsum += w;
            if r < cumsum {
                return low + i as i64;
            }
        }
        high
    }
}

fn floats(points: &[ParamMap], name: &str, log: bool) -> Vec<f64> {
    points
        .iter()
        .filter_map(|p| p.get(name)?.as_f64())
        .map(|v| if log { v.max(f64::MIN_POSITIVE).ln() } else { v })
        .collect()
}

fn ints(points: &[ParamMap], name: &str, low: i64, high: i64) -> Vec<i64> {
    points
        .iter()
        .filter_map(|p| p.get(name)?.as_i64())
        .filter(|v| (low..=high).contains(v))
        .collect()
}

fn choices(points: &[ParamMap], name: &str, values: &[String]) -> Vec<i64> {
    points
        .iter()
        .filter_map(|p| match p.get(name)? {
            ParameterValue::Text(s) => values.iter().position(|c| c == s),
            _ => None,
        })
        .map(|i| i as i64)
        .collect()
}

/// Gaussian kernel density at `x`.
fn kde_score(x: f64, values: &[f64], bandwidth: f64) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    values
        .iter()
        .map(|&v| (-(x - v).powi(2) / (2.0 * bandwidth.powi(2))).exp())
        .sum::<f64>()
        / values.len() as f64
}

impl SearchStrategy for TpeSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParamMap> {
        (0..count)
            .map(|_| {
                if self.observations.len() < self.n_startup {
                    self.space.sample_uniform(&mut self.rng)
                } else {
                    self.sample_tpe()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &ParamMap, objective: f64) {
        if objective.is_finite() {
            self.observations.push((params.clone(), objective));
        }
    }

    fn observations(&self) -> usize {
        self.observations.len()
    }

    fn name(&self) -> &str {
        "tpe"
    }
}
