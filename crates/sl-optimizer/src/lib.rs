//! # sl-optimizer
//!
//! Hyperparameter search for Sweepline.
//!
//! Provides the gradient-boosting search space, random and tree-structured
//! Parzen estimator strategies, the study-backed [`ConfigSampler`], and the
//! composite trial [`score`].

mod sampler;
mod scoring;
mod search;

pub use sampler::{
    configuration_from_params, params_from_configuration, ConfigSampler, SampledTrial,
};
pub use scoring::{score, EFFICIENCY_EPSILON};
pub use search::{
    ParamMap, ParameterDef, ParameterKind, ParameterValue, RandomSearch, SearchSpace,
    SearchStrategy, TpeSearch,
};
