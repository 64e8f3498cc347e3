//! Rank-based link prediction evaluation.
//!
//! Every evaluated triple is ranked twice: once against all N objects with
//! subject and relation fixed, once against all N subjects with relation and
//! object fixed. Object ranks come first in every pooled list.
//!
//! # Raw vs Filtered
//!
//! | Setting | Competitors | Use Case |
//! |---------|-------------|----------|
//! | Raw | Every substitute scoring strictly higher | Pessimistic estimate |
//! | Filtered | Minus substitutes that are known true triples | Standard benchmark |
//!
//! Ties never inflate a rank, so `1 ≤ filtered ≤ raw ≤ N`.
//!
//! # Metrics
//!
//! | Metric | Range | Description |
//! |--------|-------|-------------|
//! | MR | [1, N] | Mean rank |
//! | Hits@10 | [0, 1] | Fraction with rank ≤ 10 |
//! | Hits@1 | [0, 1] | Fraction with rank = 1 |
//! | MRR | (0, 1] | Mean of 1/rank |
//!
//! Zero entries in a rank list mean "not evaluated" and are skipped. A list
//! with no evaluated entries, such as a relation absent from the evaluated
//! set, reports −1 for every metric.

use std::path::Path;

use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::ScoringModel;
use crate::triples::{Triple, TripleStore, Vocabulary};

/// File name of the aggregate metrics table.
pub const METRICS_FILE: &str = "metrics.csv";
/// File name of the per-relation metrics table.
pub const METRICS_BY_RELATION_FILE: &str = "metrics-by-relation.csv";

/// Aggregate statistics of one rank list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankMetrics {
    /// Mean rank.
    pub mr: f64,
    /// Fraction of ranks ≤ 10.
    pub hits_at_10: f64,
    /// Fraction of ranks equal to 1.
    pub hits_at_1: f64,
    /// Mean reciprocal rank.
    pub mrr: f64,
    /// Number of nonzero ranks.
    pub n: usize,
}

impl RankMetrics {
    /// Value reported when a list has no evaluated entries.
    pub const SENTINEL: Self = Self {
        mr: -1.0,
        hits_at_10: -1.0,
        hits_at_1: -1.0,
        mrr: -1.0,
        n: 0,
    };

    /// Compute metrics over the nonzero entries of `ranks`.
    pub fn from_ranks(ranks: &[usize]) -> Self {
        let valid: Vec<f64> = ranks.iter().filter(|&&r| r > 0).map(|&r| r as f64).collect();
        if valid.is_empty() {
            return Self::SENTINEL;
        }

        let n = valid.len() as f64;
        Self {
            mr: valid.iter().sum::<f64>() / n,
            hits_at_10: valid.iter().filter(|&&r| r <= 10.0).count() as f64 / n,
            hits_at_1: valid.iter().filter(|&&r| r == 1.0).count() as f64 / n,
            mrr: valid.iter().map(|r| 1.0 / r).sum::<f64>() / n,
            n: valid.len(),
        }
    }

    /// Format as summary string.
    pub fn summary(&self) -> String {
        format!(
            "MRR: {:.4} | MR: {:.1} | H@1: {:.3} | H@10: {:.3} (n={})",
            self.mrr, self.mr, self.hits_at_1, self.hits_at_10, self.n
        )
    }
}

/// Raw and filtered metrics of the same rank lists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricPair {
    /// Metrics without filtering.
    pub raw: RankMetrics,
    /// Metrics with known triples removed from the competitors.
    pub filtered: RankMetrics,
}

impl MetricPair {
    fn from_ranks(ranks: &RankLists) -> Self {
        Self {
            raw: RankMetrics::from_ranks(&ranks.raw),
            filtered: RankMetrics::from_ranks(&ranks.filtered),
        }
    }
}

/// Metrics for both directions pooled and each direction alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetMetrics {
    /// Object ranks followed by subject ranks.
    pub both: MetricPair,
    /// Subject replacement only.
    pub subject: MetricPair,
    /// Object replacement only.
    pub object: MetricPair,
}

/// Raw and filtered rank of one triple in one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rank {
    /// 1 + substitutes scoring strictly higher.
    pub raw: usize,
    /// Raw rank minus higher-scoring substitutes that are known triples.
    pub filtered: usize,
}

#[derive(Debug, Clone, Default)]
struct RankLists {
    raw: Vec<usize>,
    filtered: Vec<usize>,
}

impl RankLists {
    fn push(&mut self, rank: Rank) {
        self.raw.push(rank.raw);
        self.filtered.push(rank.filtered);
    }

    fn chain(&self, other: &Self) -> Self {
        Self {
            raw: self.raw.iter().chain(&other.raw).copied().collect(),
            filtered: self.filtered.iter().chain(&other.filtered).copied().collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct DirectionLists {
    object: RankLists,
    subject: RankLists,
}

impl DirectionLists {
    fn push(&mut self, object: Rank, subject: Rank) {
        self.object.push(object);
        self.subject.push(subject);
    }

    fn metrics(&self) -> TargetMetrics {
        TargetMetrics {
            both: MetricPair::from_ranks(&self.object.chain(&self.subject)),
            subject: MetricPair::from_ranks(&self.subject),
            object: MetricPair::from_ranks(&self.object),
        }
    }
}

/// Result of ranking a whole triple set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Metrics over every triple.
    pub overall: TargetMetrics,
    /// Metrics per relation id; relations without triples carry sentinels.
    pub by_relation: Vec<TargetMetrics>,
    /// Number of triples ranked.
    pub num_triples: usize,
}

impl EvaluationReport {
    /// One-line digest of the filtered combined metrics.
    pub fn summary(&self) -> String {
        format!(
            "filtered {} | raw MRR: {:.4}",
            self.overall.both.filtered.summary(),
            self.overall.both.raw.mrr
        )
    }

    /// Write `metrics.csv` and `metrics-by-relation.csv` into `dir`.
    ///
    /// Relation names come from `vocabulary` when it knows the id.
    pub fn write_csv(&self, dir: &Path, vocabulary: &Vocabulary) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let mut writer = csv::Writer::from_path(dir.join(METRICS_FILE))?;
        writer.write_record(["MR", "hits@10", "hits@1", "MRR", "filtered", "target"])?;
        let overall = &self.overall;
        for filtered in [false, true] {
            for (target, pair) in [
                ("both", &overall.both),
                ("object", &overall.object),
                ("subject", &overall.subject),
            ] {
                let m = if filtered { &pair.filtered } else { &pair.raw };
                writer.write_record(metric_fields(m, filtered, target))?;
            }
        }
        writer.flush()?;

        let mut writer = csv::Writer::from_path(dir.join(METRICS_BY_RELATION_FILE))?;
        writer.write_record([
            "relation", "MR", "hits@10", "hits@1", "MRR", "filtered", "target", "n",
        ])?;
        for (relation, metrics) in self.by_relation.iter().enumerate() {
            let name = vocabulary
                .relation_name(relation)
                .map_or_else(|| relation.to_string(), str::to_string);
            for (target, pair) in [
                ("both", &metrics.both),
                ("subject", &metrics.subject),
                ("object", &metrics.object),
            ] {
                for (filtered, m) in [(false, &pair.raw), (true, &pair.filtered)] {
                    let mut record = vec![name.clone()];
                    record.extend(metric_fields(m, filtered, target));
                    record.push(m.n.to_string());
                    writer.write_record(&record)?;
                }
            }
        }
        writer.flush()?;
        Ok(())
    }
}

fn metric_fields(m: &RankMetrics, filtered: bool, target: &str) -> Vec<String> {
    vec![
        m.mr.to_string(),
        m.hits_at_10.to_string(),
        m.hits_at_1.to_string(),
        m.mrr.to_string(),
        filtered.to_string(),
        target.to_string(),
    ]
}

/// Ranks triples against all entity substitutes.
///
/// The lookup stores define which substitutes count as known true triples
/// in the filtered setting; usually train, validation and test together.
#[derive(Debug, Clone, Default)]
pub struct RankEvaluator<'a> {
    lookup: Vec<&'a TripleStore>,
}

impl<'a> RankEvaluator<'a> {
    /// Evaluator filtering against every store in `lookup`.
    pub fn new(lookup: &[&'a TripleStore]) -> Self {
        Self {
            lookup: lookup.to_vec(),
        }
    }

    /// Whether `triple` appears in any lookup store.
    pub fn is_known(&self, triple: &Triple) -> bool {
        self.lookup.iter().any(|store| store.contains(triple))
    }

    /// Rank the true object among all objects for (subject, relation, ?).
    pub fn rank_object(&self, model: &dyn ScoringModel, triple: &Triple) -> Rank {
        let scores = model.score_all_objects(triple.subject, triple.relation);
        self.rank(&scores, triple.object, |e| triple.with_object(e))
    }

    /// Rank the true subject among all subjects for (?, relation, object).
    pub fn rank_subject(&self, model: &dyn ScoringModel, triple: &Triple) -> Rank {
        let scores = model.score_all_subjects(triple.relation, triple.object);
        self.rank(&scores, triple.subject, |e| triple.with_subject(e))
    }

    fn rank(&self, scores: &Array1<f64>, truth: usize, substitute: impl Fn(usize) -> Triple) -> Rank {
        let positive = scores[truth];
        let mut rank = Rank {
            raw: 1,
            filtered: 1,
        };
        for (entity, &score) in scores.iter().enumerate() {
            if score > positive {
                rank.raw += 1;
                if !self.is_known(&substitute(entity)) {
                    rank.filtered += 1;
                }
            }
        }
        rank
    }

    /// Rank every triple of `data` in both directions.
    pub fn evaluate(&self, model: &dyn ScoringModel, data: &TripleStore) -> EvaluationReport {
        let m = data.len();
        let mut overall = DirectionLists::default();
        let mut by_relation = vec![DirectionLists::default(); data.num_relations()];

        for (i, triple) in data.iter().enumerate() {
            let object = self.rank_object(model, triple);
            let subject = self.rank_subject(model, triple);
            overall.push(object, subject);
            if let Some(lists) = by_relation.get_mut(triple.relation) {
                lists.push(object, subject);
            }

            if (i + 1) % 1000 == 0 {
                debug!(ranked = i + 1, total = m, "evaluation progress");
            }
        }

        let report = EvaluationReport {
            overall: overall.metrics(),
            by_relation: by_relation.iter().map(DirectionLists::metrics).collect(),
            num_triples: m,
        };
        info!(
            triples = m,
            mrr = report.overall.both.filtered.mrr,
            raw_mrr = report.overall.both.raw.mrr,
            hits_at_10 = report.overall.both.filtered.hits_at_10,
            "evaluation finished"
        );
        report
    }

    /// Raw and filtered metrics over at most `limit` triples of `data`.
    ///
    /// With a limit the triples are drawn by shuffling; `None` ranks the
    /// whole set in order.
    pub fn mrr_sample(
        &self,
        model: &dyn ScoringModel,
        data: &TripleStore,
        limit: Option<usize>,
        rng: &mut dyn RngCore,
    ) -> MetricPair {
        let mut indices: Vec<usize> = (0..data.len()).collect();
        if let Some(limit) = limit {
            indices.shuffle(rng);
            indices.truncate(limit);
        }

        let mut lists = DirectionLists::default();
        for &i in &indices {
            let triple = &data.triples()[i];
            lists.push(self.rank_object(model, triple), self.rank_subject(model, triple));
        }
        lists.metrics().both
    }
}
