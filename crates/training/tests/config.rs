use seg_models::ModelKind;
use std::path::PathBuf;
use training::config::ConfigError;
use training::{Overrides, TrainConfig};

#[test]
fn empty_file_yields_defaults() {
    let cfg = TrainConfig::from_yaml_str("").unwrap();
    assert_eq!(cfg, TrainConfig::default());
    assert_eq!(cfg.model, ModelKind::Fcn);
    assert_eq!(cfg.num_classes, 21);
    assert!(cfg.lr_schedule);
    assert_eq!(cfg.run_dir(), PathBuf::from("results/default"));
}

#[test]
fn yaml_keys_override_defaults() {
    let cfg = TrainConfig::from_yaml_str(
        r#"
run_id: unet_a
model: unet
epochs: 12
batch_size: 4
learning_rate: 0.0005
lr_schedule: false
class_weights: false
image_size: [256, 192]
early_stopping:
  patience: 3
scheduler:
  t0: 4
  t_mult: 2
"#,
    )
    .unwrap();
    assert_eq!(cfg.model, ModelKind::Unet);
    assert_eq!(cfg.epochs, 12);
    assert_eq!(cfg.batch_size, 4);
    assert!(!cfg.lr_schedule);
    assert!(!cfg.class_weights);
    assert_eq!(cfg.target_size(), (256, 192));
    assert_eq!(cfg.early_stopping.patience, 3);
    assert_eq!(cfg.early_stopping.min_delta, 0.0);
    assert_eq!(cfg.scheduler.t0, 4.0);
    assert_eq!(cfg.scheduler.eta_min, 0.0);
    assert_eq!(cfg.run_dir(), PathBuf::from("results/unet_a"));
}

#[test]
fn model_names_accept_new_arch() {
    let cfg = TrainConfig::from_yaml_str("model: new_arch").unwrap();
    assert_eq!(cfg.model, ModelKind::NewArch);
    let cfg = TrainConfig::from_yaml_str("model: resnet\nresnet_depth: 34").unwrap();
    assert_eq!(cfg.model, ModelKind::Resnet);
    assert_eq!(cfg.resnet_depth, 34);
}

#[test]
fn invalid_values_are_rejected() {
    for raw in [
        "epochs: 0",
        "batch_size: 0",
        "image_size: [100, 224]",
        "num_classes: 1",
        "learning_rate: 0",
        "run_id: a/b",
        "model: resnet\nresnet_depth: 50",
        "scheduler:\n  t_mult: 0.5",
        "augment:\n  prob: 1.5",
    ] {
        match TrainConfig::from_yaml_str(raw) {
            Err(ConfigError::Invalid(_)) => {}
            other => panic!("{raw:?} should be invalid, got {other:?}"),
        }
    }
}

#[test]
fn unknown_keys_and_bad_models_fail_to_parse() {
    assert!(matches!(
        TrainConfig::from_yaml_str("epoch: 3"),
        Err(ConfigError::Parse { .. })
    ));
    assert!(matches!(
        TrainConfig::from_yaml_str("model: vgg"),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn overrides_apply_and_revalidate() {
    let mut cfg = TrainConfig::default();
    cfg.apply_overrides(&Overrides {
        epochs: Some(3),
        batch_size: Some(2),
        run_id: Some("quick".into()),
        data_root: Some("/data/voc".into()),
    })
    .unwrap();
    assert_eq!(cfg.epochs, 3);
    assert_eq!(cfg.batch_size, 2);
    assert_eq!(cfg.data_root, PathBuf::from("/data/voc"));
    assert_eq!(cfg.run_dir(), PathBuf::from("results/quick"));

    let err = cfg.apply_overrides(&Overrides {
        epochs: Some(0),
        ..Default::default()
    });
    assert!(err.is_err());
}

#[test]
fn from_path_reports_missing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nope.yaml");
    assert!(matches!(
        TrainConfig::from_path(&missing),
        Err(ConfigError::Read { .. })
    ));

    let path = tmp.path().join("run.yaml");
    std::fs::write(&path, "model: [").unwrap();
    match TrainConfig::from_path(&path) {
        Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn eval_loader_disables_augmentation() {
    let cfg = TrainConfig::from_yaml_str("augment:\n  prob: 0.5").unwrap();
    let train = cfg.train_dataset_config();
    assert_eq!(train.augment.hflip_prob, 0.5);
    assert_eq!(train.augment.color.prob, 0.5);
    assert!(train.shuffle);
    let eval = cfg.eval_dataset_config();
    assert!(eval.augment.is_identity());
    assert!(!eval.shuffle);
    assert_eq!(eval.target_size, Some((224, 224)));
}
