//! End-to-end runs over a small synthetic graph written to a scratch directory.

use std::fs;
use std::path::Path;

use kgfit::config::{InitializerConfig, ModelConfig};
use kgfit::evaluation::{METRICS_BY_RELATION_FILE, METRICS_FILE};
use kgfit::io::{load_matrix, CONFIG_FILE, STATS_FILE};
use kgfit::triples::{ENTITY_MAPPINGS_FILE, RELATION_MAPPINGS_FILE};
use kgfit::{run, Config, Error, Vocabulary};

/// Two relations over a ring of 12 entities: `next` (i → i+1) and `prev`
/// (i+1 → i). Two `next` edges are held out for validation and two for test.
fn write_ring(dir: &Path) {
    let n = 12;
    let (mut train, mut valid, mut test) = (String::new(), String::new(), String::new());
    for i in 0..n {
        let j = (i + 1) % n;
        let next = format!("e{i}\tnext\te{j}\n");
        match i % 6 {
            3 => valid.push_str(&next),
            5 => test.push_str(&next),
            _ => train.push_str(&next),
        }
        train.push_str(&format!("e{j} prev e{i}\n"));
    }
    // unseen entity in a held-out split
    test.push_str("e0 next ghost\n");
    fs::write(dir.join("train.txt"), train).unwrap();
    fs::write(dir.join("valid.txt"), valid).unwrap();
    fs::write(dir.join("test.txt"), test).unwrap();
}

fn config_for(data: &Path, out: &Path, model: ModelConfig) -> Config {
    let mut config = Config::default()
        .with_data_dir(data)
        .with_dump_directory(out)
        .with_model(model)
        .with_loss("logistic")
        .with_update("adagrad", 0.1)
        .with_schedule(8, 6);
    config.optimizer.early_stopping.every_n_epochs = 2;
    config.optimizer.sampling.number_of_negatives = 2;
    config
}

#[test]
fn test_full_run_writes_artifacts() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_ring(data.path());

    let config = config_for(data.path(), out.path(), ModelConfig::new("distmult", 4));
    let summary = run(&config).unwrap();

    assert!(summary.location.starts_with(out.path()));
    assert!(summary.dump_name.starts_with("distmult-4"));
    assert_eq!(summary.num_entities, 12);
    assert_eq!(summary.num_relations, 2);
    assert!(summary.training.epochs_run >= 2 && summary.training.epochs_run <= 6);

    for file in [
        CONFIG_FILE,
        STATS_FILE,
        METRICS_FILE,
        METRICS_BY_RELATION_FILE,
        ENTITY_MAPPINGS_FILE,
        RELATION_MAPPINGS_FILE,
    ] {
        assert!(summary.location.join(file).is_file(), "missing {file}");
    }

    let entities = load_matrix(summary.location.join("parameters").join("E")).unwrap();
    assert_eq!(entities.dim(), (12, 4));

    // the ghost triple is skipped, leaving the two `next` test edges
    assert_eq!(summary.report.num_triples, 2);
    let both = &summary.report.overall.both;
    assert!(both.filtered.mr >= 1.0 && both.filtered.mr <= 12.0);
    assert!(both.filtered.mrr >= both.raw.mrr);

    let echoed = Config::from_file(summary.location.join(CONFIG_FILE)).unwrap();
    assert_eq!(echoed, config);

    let vocab = Vocabulary::load_mappings(&summary.location).unwrap();
    assert_eq!(vocab.num_entities(), 12);
    assert_eq!(vocab.relation_name(0), Some("next"));
    assert_eq!(vocab.relation_name(1), Some("prev"));
}

#[test]
fn test_runs_are_reproducible_from_seed() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_ring(data.path());

    let mut config = config_for(data.path(), out.path(), ModelConfig::new("complex", 3));
    config.optimizer.early_stopping.use_early_stopping = false;
    config.serialization.dump_location = "first".into();
    let first = run(&config).unwrap();
    config.serialization.dump_location = "second".into();
    let second = run(&config).unwrap();

    let losses = |s: &kgfit::RunSummary| s.training.stats.iter().map(|e| e.loss).collect::<Vec<_>>();
    assert_eq!(losses(&first), losses(&second));
    assert_eq!(first.report.overall, second.report.overall);
    assert_eq!(
        load_matrix(first.location.join("parameters").join("Er")).unwrap(),
        load_matrix(second.location.join("parameters").join("Er")).unwrap()
    );
}

#[test]
fn test_pretrained_member_in_ensemble() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_ring(data.path());

    let mut config = config_for(data.path(), out.path(), ModelConfig::new("transe", 3));
    config.optimizer.early_stopping.use_early_stopping = false;
    let base = run(&config).unwrap();
    let trained = load_matrix(base.location.join("parameters").join("E")).unwrap();

    let ensemble = ModelConfig::ensemble(vec![
        ModelConfig::new("transe", 3)
            .with_trainable(false)
            .with_initializer(InitializerConfig::pretrained(&base.location)),
        ModelConfig::new("distmult", 3),
    ]);
    let mut config = config_for(data.path(), out.path(), ensemble);
    config.optimizer.early_stopping.use_early_stopping = false;
    config.data.load_mappings = true;
    config.data.location = Some(base.location.clone());
    let summary = run(&config).unwrap();

    let members = summary.location.join("models");
    let frozen = load_matrix(members.join(&base.dump_name).join("parameters").join("E")).unwrap();
    assert_eq!(frozen, trained);
    assert!(summary.location.join("parameters").join("weights").is_file());
}

#[test]
fn test_unknown_component_fails_before_training() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_ring(data.path());

    let config = config_for(data.path(), out.path(), ModelConfig::new("transe", 2))
        .with_loss("hinge-squared");
    match run(&config) {
        Err(Error::UnknownVariant { component, value }) => {
            assert_eq!(component, "loss");
            assert_eq!(value, "hinge-squared");
        }
        other => panic!("expected unknown loss, got {other:?}"),
    }
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn test_unknown_model_fails_before_reading_data() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    // no triple files at all: the model name must be rejected first
    let config = config_for(data.path(), out.path(), ModelConfig::new("holographic", 2));
    match run(&config) {
        Err(Error::UnknownVariant { component, value }) => {
            assert_eq!(component, "model");
            assert_eq!(value, "holographic");
        }
        other => panic!("expected unknown model, got {other:?}"),
    }
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn test_missing_split_is_fatal() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_ring(data.path());
    fs::remove_file(data.path().join("valid.txt")).unwrap();

    let config = config_for(data.path(), out.path(), ModelConfig::new("transe", 2));
    assert!(matches!(run(&config), Err(Error::Io(_))));
}
