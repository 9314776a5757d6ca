//! Study-backed configuration sampler.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use sl_data::StudyStore;
use sl_types::{internal_error, Configuration, FixedParams, PruneReason, SweepResult};

use crate::search::{ParamMap, ParameterValue, SearchSpace, SearchStrategy, TpeSearch};

/// A configuration handed out by the sampler, tagged with its study number.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledTrial {
    pub number: u64,
    pub config: Configuration,
}

/// Proposes configurations and learns from reported scores.
///
/// Every suggestion is registered in the study before it is returned, so a
/// restarted sweep resumes with the same history. Only completed trials are
/// replayed into the strategy; pruned and failed ones carry no objective.
/// Trials completed by other sessions sharing the study are picked up before
/// each suggestion.
pub struct ConfigSampler {
    strategy: Box<dyn SearchStrategy>,
    study: StudyStore,
    fixed: FixedParams,
    reported: HashSet<u64>,
}

impl ConfigSampler {
    pub fn new(study: StudyStore, strategy: Box<dyn SearchStrategy>, fixed: FixedParams) -> Self {
        let mut sampler = Self {
            strategy,
            study,
            fixed,
            reported: HashSet::new(),
        };
        let replayed = sampler.absorb_completed();
        info!(
            "Sampler {} resumed study {} with {} observations",
            sampler.strategy.name(),
            sampler.study.study_name(),
            replayed
        );
        sampler
    }

    /// TPE over the default gradient-boosting space.
    pub fn tpe(study: StudyStore, fixed: FixedParams, seed: Option<u64>) -> Self {
        let strategy = TpeSearch::new(SearchSpace::gradient_boosting(), seed);
        Self::new(study, Box::new(strategy), fixed)
    }

    pub fn study(&self) -> &StudyStore {
        &self.study
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn observations(&self) -> usize {
        self.strategy.observations()
    }

    /// Report completed study trials the strategy has not seen yet.
    fn absorb_completed(&mut self) -> usize {
        let mut absorbed = 0;
        for (number, config, value) in self.study.completed() {
            if self.reported.insert(number) {
                self.strategy.report(&params_from_configuration(config), value);
                absorbed += 1;
            }
        }
        absorbed
    }

    /// Sample the next configuration and record it as running.
    pub fn suggest(&mut self) -> SweepResult<SampledTrial> {
        self.study.refresh()?;
        let foreign = self.absorb_completed();
        if foreign > 0 {
            debug!("Absorbed {} trials completed by other sessions", foreign);
        }

        let params = self
            .strategy
            .suggest(1)
            .pop()
            .ok_or_else(|| internal_error!("strategy {} produced no suggestion", self.strategy.name()))?;
        let config = configuration_from_params(&params, &self.fixed)?;
        let number = self.study.begin_trial(config.clone())?;
        debug!("Study trial {} suggested: {:?}", number, config);
        Ok(SampledTrial { number, config })
    }

    /// Record the objective of a completed trial.
    pub fn tell(&mut self, number: u64, value: f64) -> SweepResult<()> {
        self.study.complete(number, value)?;
        self.absorb_completed();
        Ok(())
    }

    pub fn prune(&mut self, number: u64, reason: &PruneReason) -> SweepResult<()> {
        debug!("Study trial {} pruned: {}", number, reason);
        self.study.prune(number)
    }

    pub fn fail(&mut self, number: u64) -> SweepResult<()> {
        self.study.fail(number)
    }
}

/// Map a configuration onto the search-space coordinates.
pub fn params_from_configuration(config: &Configuration) -> ParamMap {
    let mut params = HashMap::new();
    params.insert(
        "iterations".to_string(),
        ParameterValue::Int(config.iterations as i64),
    );
    params.insert("depth".to_string(), ParameterValue::Int(config.depth as i64));
    params.insert(
        "learning_rate".to_string(),
        ParameterValue::Float(config.learning_rate),
    );
    params.insert(
        "l2_leaf_reg".to_string(),
        ParameterValue::Float(config.l2_leaf_reg),
    );
    params.insert(
        "random_strength".to_string(),
        ParameterValue::Float(config.random_strength),
    );
    params
}

/// Build a full configuration from sampled coordinates plus the fixed settings.
pub fn configuration_from_params(
    params: &ParamMap,
    fixed: &FixedParams,
) -> SweepResult<Configuration> {
    let int = |name: &str| -> SweepResult<u32> {
        params
            .get(name)
            .and_then(ParameterValue::as_i64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| internal_error!("sampled value for {} missing or not a positive integer", name))
    };
    let float = |name: &str| -> SweepResult<f64> {
        params
            .get(name)
            .and_then(ParameterValue::as_f64)
            .ok_or_else(|| internal_error!("sampled value for {} missing or not numeric", name))
    };

    let config = Configuration::new(
        int("iterations")?,
        int("depth")?,
        float("learning_rate")?,
        float("l2_leaf_reg")?,
        float("random_strength")?,
        fixed,
    );
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::RandomSearch;
    use tempfile::tempdir;

    #[test]
    fn suggestions_are_registered_and_in_space() {
        let dir = tempdir().unwrap();
        let study = StudyStore::open(dir.path().join("s.study.jsonl"), "s").unwrap();
        let mut sampler = ConfigSampler::tpe(study, FixedParams::default(), Some(9));

        for expected in 0..5 {
            let trial = sampler.suggest().unwrap();
            assert_eq!(trial.number, expected);
            assert!(trial.config.within_search_space());
            assert_eq!(trial.config.task_type, "GPU");
            assert_eq!(trial.config.loss_function, "MultiClass");
            sampler.tell(trial.number, 0.1 * expected as f64).unwrap();
        }
        assert_eq!(sampler.observations(), 5);
        assert_eq!(sampler.study().completed().count(), 5);
    }

    #[test]
    fn pruned_and_failed_trials_are_not_observations() {
        let dir = tempdir().unwrap();
        let study = StudyStore::open(dir.path().join("s.study.jsonl"), "s").unwrap();
        let mut sampler = ConfigSampler::tpe(study, FixedParams::default(), Some(1));

        let a = sampler.suggest().unwrap();
        let b = sampler.suggest().unwrap();
        let c = sampler.suggest().unwrap();
        sampler.prune(a.number, &PruneReason::Duplicate).unwrap();
        sampler.fail(b.number).unwrap();
        sampler.tell(c.number, 0.4).unwrap();
        assert_eq!(sampler.observations(), 1);
    }

    #[test]
    fn completed_history_is_replayed_on_resume() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.study.jsonl");
        {
            let study = StudyStore::open(&path, "s").unwrap();
            let mut sampler = ConfigSampler::tpe(study, FixedParams::default(), Some(2));
            for i in 0..3 {
                let t = sampler.suggest().unwrap();
                sampler.tell(t.number, i as f64).unwrap();
            }
            // Left running by the previous session.
            sampler.suggest().unwrap();
        }

        let study = StudyStore::open(&path, "s").unwrap();
        let space = SearchSpace::gradient_boosting();
        let mut sampler = ConfigSampler::new(
            study,
            Box::new(TpeSearch::new(space, Some(3))),
            FixedParams::default(),
        );
        assert_eq!(sampler.observations(), 3);
        assert_eq!(sampler.suggest().unwrap().number, 4);
    }

    #[test]
    fn trials_completed_elsewhere_become_observations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.study.jsonl");
        let mut ours = ConfigSampler::tpe(
            StudyStore::open(&path, "s").unwrap(),
            FixedParams::default(),
            Some(5),
        );
        let mut theirs = ConfigSampler::tpe(
            StudyStore::open(&path, "s").unwrap(),
            FixedParams::default(),
            Some(6),
        );

        let t = theirs.suggest().unwrap();
        theirs.tell(t.number, 0.9).unwrap();
        assert_eq!(ours.observations(), 0);

        let next = ours.suggest().unwrap();
        assert_eq!(next.number, t.number + 1);
        assert_eq!(ours.observations(), 1);
    }

    #[test]
    fn random_strategy_observations_stay_zero() {
        let dir = tempdir().unwrap();
        let study = StudyStore::open(dir.path().join("s.study.jsonl"), "s").unwrap();
        let strategy = RandomSearch::new(SearchSpace::gradient_boosting(), Some(4));
        let mut sampler = ConfigSampler::new(study, Box::new(strategy), FixedParams::default());
        let t = sampler.suggest().unwrap();
        sampler.tell(t.number, 1.0).unwrap();
        assert_eq!(sampler.strategy_name(), "random");
        assert_eq!(sampler.observations(), 0);
    }

    #[test]
    fn params_roundtrip_through_configuration() {
        let fixed = FixedParams::default();
        let config = Configuration::new(300, 6, 0.05, 2.5, 0.7, &fixed);
        let back = configuration_from_params(&params_from_configuration(&config), &fixed).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn missing_coordinate_is_rejected() {
        let mut params = params_from_configuration(&Configuration::new(
            300,
            6,
            0.05,
            2.5,
            0.7,
            &FixedParams::default(),
        ));
        params.remove("depth");
        assert!(configuration_from_params(&params, &FixedParams::default()).is_err());
    }
}
