//! Mini-batch training loop with validation-driven early stopping.
//!
//! Each epoch shuffles the training triples, walks them in contiguous
//! batches of `batchSize` (the last one may be shorter) and for every batch:
//!
//! 1. clears the gradient accumulators,
//! 2. samples negatives per positive (the positive is appended for softmax),
//! 3. lets the loss drive `score`/`gradient` calls and add the L2 term,
//! 4. runs the updater and subtracts the steps (`model.update()`),
//! 5. runs the post-batch hook (unit-norm renormalization).
//!
//! Every `everyNEpochs` epochs the filtered MRR on a validation sample is
//! compared with the best value so far (initially 0). An improvement
//! checkpoints the model; anything else stops training at once.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::OptimizerConfig;
use crate::error::Result;
use crate::evaluation::RankEvaluator;
use crate::io::{self, STATS_FILE};
use crate::loss::LossFunction;
use crate::models::ScoringModel;
use crate::sampling::NegativeSampler;
use crate::triples::{Triple, TripleStore};

/// Statistics of one finished epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean loss per gradient computation.
    pub loss: f64,
    /// Wall time of the epoch's batches in seconds.
    pub time: f64,
    /// Filtered validation MRR, if this epoch was validated.
    pub mrr: Option<f64>,
}

/// What a finished training run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingOutcome {
    /// One entry per epoch run.
    pub stats: Vec<EpochStats>,
    /// Best filtered validation MRR, 0 if never validated.
    pub best_mrr: f64,
    /// Whether early stopping ended the run.
    pub stopped_early: bool,
    /// Number of epochs run.
    pub epochs_run: usize,
}

/// Drives a model through epochs of mini-batch training.
pub struct TrainingLoop<'a> {
    config: &'a OptimizerConfig,
    train: &'a TripleStore,
    validation: Option<&'a TripleStore>,
    evaluator: RankEvaluator<'a>,
    location: Option<PathBuf>,
    observer: Option<Box<dyn FnMut(&EpochStats) + 'a>>,
}

impl<'a> TrainingLoop<'a> {
    /// Train on `train` with the batching and early stopping of `config`.
    pub fn new(config: &'a OptimizerConfig, train: &'a TripleStore) -> Self {
        Self {
            config,
            train,
            validation: None,
            evaluator: RankEvaluator::default(),
            location: None,
            observer: None,
        }
    }

    /// Validate on `validation`, filtering ranks against `lookup`.
    pub fn with_validation(
        mut self,
        validation: &'a TripleStore,
        lookup: &[&'a TripleStore],
    ) -> Self {
        self.validation = Some(validation);
        self.evaluator = RankEvaluator::new(lookup);
        self
    }

    /// Checkpoint the model and write `stats.csv` under `dir`.
    pub fn with_location(mut self, dir: impl Into<PathBuf>) -> Self {
        self.location = Some(dir.into());
        self
    }

    /// Call `observer` after every epoch.
    pub fn with_observer(mut self, observer: impl FnMut(&EpochStats) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    fn validates(&self, epoch: usize) -> Option<&'a TripleStore> {
        let es = &self.config.early_stopping;
        if !es.use_early_stopping || (epoch + 1) % es.every_n_epochs.max(1) != 0 {
            return None;
        }
        self.validation.filter(|v| !v.is_empty())
    }

    fn checkpoint(&self, model: &dyn ScoringModel) -> Result<bool> {
        match &self.location {
            Some(dir) => {
                model.dump(dir)?;
                info!(location = %dir.display(), "model dumped");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run up to `maxEpochs` epochs.
    ///
    /// On return the model under the location is the best validated one,
    /// or the final one if no checkpoint was written during training.
    pub fn run(
        &mut self,
        model: &mut dyn ScoringModel,
        loss: &mut dyn LossFunction,
        sampler: &dyn NegativeSampler,
        rng: &mut dyn RngCore,
    ) -> Result<TrainingOutcome> {
        let batch_size = self.config.batch_size.max(1);
        let max_epochs = self.config.max_epochs;
        let mut indices: Vec<usize> = (0..self.train.len()).collect();
        let num_batches = indices.len().div_ceil(batch_size);

        let total = Instant::now();
        let mut stats = Vec::with_capacity(max_epochs);
        let mut best_mrr = 0.0;
        let mut dumped = false;
        let mut stopped_early = false;

        for epoch in 0..max_epochs {
            debug!(epoch = epoch + 1, max_epochs, num_batches, "epoch started");
            let start = Instant::now();
            loss.reset();
            indices.shuffle(&mut *rng);

            for batch in indices.chunks(batch_size) {
                self.process_batch(batch, model, loss, sampler, rng);
            }
            model.post_epoch();

            let mut record = EpochStats {
                epoch: epoch + 1,
                loss: loss.mean_loss(),
                time: start.elapsed().as_secs_f64(),
                mrr: None,
            };
            info!(
                epoch = record.epoch,
                loss = record.loss,
                time = record.time,
                "{}",
                loss.summary()
            );

            let mut stop = false;
            if let Some(validation) = self.validates(epoch) {
                let es = &self.config.early_stopping;
                let sample = self
                    .evaluator
                    .mrr_sample(&*model, validation, es.n, &mut *rng);
                let mrr = sample.filtered.mrr;
                record.mrr = Some(mrr);
                if mrr > best_mrr {
                    info!(
                        best = best_mrr,
                        mrr,
                        raw_mrr = sample.raw.mrr,
                        "validation improved"
                    );
                    best_mrr = mrr;
                    dumped |= self.checkpoint(&*model)?;
                } else {
                    info!(
                        best = best_mrr,
                        mrr,
                        raw_mrr = sample.raw.mrr,
                        "validation did not improve, stopping"
                    );
                    stop = true;
                }
            }

            if let Some(observer) = self.observer.as_mut() {
                observer(&record);
            }
            stats.push(record);
            if stop {
                stopped_early = true;
                break;
            }
        }

        if !dumped {
            self.checkpoint(&*model)?;
        }
        if let Some(dir) = &self.location {
            io::write_stats(dir.join(STATS_FILE), &stats)?;
        }
        info!(
            epochs = stats.len(),
            seconds = total.elapsed().as_secs_f64(),
            stopped_early,
            "training finished"
        );

        Ok(TrainingOutcome {
            epochs_run: stats.len(),
            stats,
            best_mrr,
            stopped_early,
        })
    }

    fn process_batch(
        &self,
        batch: &[usize],
        model: &mut dyn ScoringModel,
        loss: &mut dyn LossFunction,
        sampler: &dyn NegativeSampler,
        rng: &mut dyn RngCore,
    ) {
        model.reset_gradients();

        let triples = self.train.triples();
        let positives: Vec<Triple> = batch.iter().map(|&i| triples[i]).collect();
        let negatives: Vec<Vec<Triple>> = positives
            .iter()
            .map(|positive| {
                let mut negatives = sampler.sample_negatives(self.train, positive, &mut *rng);
                if loss.appends_positive() {
                    negatives.push(*positive);
                }
                negatives
            })
            .collect();

        loss.gradient(model, &positives, &negatives);
        model.update();
        model.post_batch();
    }

    /// Directory checkpoints go to, if any.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ModelConfig};
    use crate::loss::{build_loss, BatchShape};
    use crate::models::test_support::model_from;
    use crate::sampling::build_sampler;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn chain() -> TripleStore {
        TripleStore::from_triples((0..4).map(|e| Triple::new(e, 0, e + 1)), 5, 2)
    }

    fn parts(config: &Config) -> (Box<dyn LossFunction>, Box<dyn NegativeSampler>) {
        let optimizer = &config.optimizer;
        let shape = BatchShape {
            batch_size: optimizer.batch_size,
            number_of_negatives: optimizer.sampling.number_of_negatives,
        };
        (
            build_loss(&optimizer.kind, shape, 1.0).unwrap(),
            build_sampler(&optimizer.sampling).unwrap(),
        )
    }

    #[test]
    fn test_runs_all_epochs_without_validation() {
        let config = Config::default().with_loss("logistic").with_schedule(3, 4);
        let (mut loss, sampler) = parts(&config);
        let mut model = model_from(&ModelConfig::new("distmult", 3), 1);
        let train = chain();
        let mut rng = StdRng::seed_from_u64(1);

        let mut epochs_seen = 0;
        let outcome = TrainingLoop::new(&config.optimizer, &train)
            .with_observer(|_| epochs_seen += 1)
            .run(model.as_mut(), loss.as_mut(), sampler.as_ref(), &mut rng)
            .unwrap();

        assert_eq!(epochs_seen, 4);
        assert_eq!(outcome.epochs_run, 4);
        assert!(!outcome.stopped_early);
        assert_eq!(outcome.best_mrr, 0.0);
        assert!(outcome.stats.iter().all(|s| s.mrr.is_none() && s.loss > 0.0));
    }

    #[test]
    fn test_logistic_loss_decreases() {
        let config = Config::default()
            .with_loss("logistic")
            .with_update("adagrad", 0.5)
            .with_schedule(4, 60);
        let (mut loss, sampler) = parts(&config);
        let mut model = model_from(&ModelConfig::new("complex", 4), 2);
        let train = chain();
        let mut rng = StdRng::seed_from_u64(2);

        let outcome = TrainingLoop::new(&config.optimizer, &train)
            .run(model.as_mut(), loss.as_mut(), sampler.as_ref(), &mut rng)
            .unwrap();
        let mean = |stats: &[EpochStats]| stats.iter().map(|s| s.loss).sum::<f64>() / 5.0;
        let first = mean(&outcome.stats[..5]);
        let last = mean(&outcome.stats[55..]);
        assert!(last < first, "loss went from {first} to {last}");
    }

    #[test]
    fn test_early_stopping_writes_checkpoint_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default().with_loss("softmax").with_schedule(2, 50);
        config.optimizer.early_stopping.every_n_epochs = 1;
        config.optimizer.early_stopping.n = None;
        let (mut loss, sampler) = parts(&config);
        let mut model = model_from(&ModelConfig::new("transe", 2), 3);
        let train = chain();
        let mut rng = StdRng::seed_from_u64(3);

        let outcome = TrainingLoop::new(&config.optimizer, &train)
            .with_validation(&train, &[&train])
            .with_location(dir.path())
            .run(model.as_mut(), loss.as_mut(), sampler.as_ref(), &mut rng)
            .unwrap();

        assert!(outcome.stats.iter().all(|s| s.mrr.is_some()));
        assert!(outcome.best_mrr > 0.0);
        if outcome.stopped_early {
            assert!(outcome.epochs_run < 50);
            let last = outcome.stats[outcome.epochs_run - 1].mrr.unwrap();
            assert!(last <= outcome.best_mrr);
        }
        assert!(dir.path().join("parameters").join("E").exists());
        let stats = std::fs::read_to_string(dir.path().join(STATS_FILE)).unwrap();
        assert_eq!(stats.lines().count(), outcome.epochs_run + 1);
    }

    #[test]
    fn test_final_dump_without_validation() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_schedule(10, 1);
        let (mut loss, sampler) = parts(&config);
        let mut model = model_from(&ModelConfig::new("rescal", 2), 4);
        let train = chain();
        let mut rng = StdRng::seed_from_u64(4);

        let mut training = TrainingLoop::new(&config.optimizer, &train).with_location(dir.path());
        assert_eq!(training.location(), Some(dir.path()));
        training
            .run(model.as_mut(), loss.as_mut(), sampler.as_ref(), &mut rng)
            .unwrap();
        assert!(dir.path().join("parameters").join("R").exists());
    }
}
