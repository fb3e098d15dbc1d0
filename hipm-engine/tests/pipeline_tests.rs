//! End-to-end tests: dataset on disk → manual segmentations → records → SQLite

mod helpers;

use std::path::Path;
use std::sync::Arc;

use helpers::{sweep, us_frame};
use hipm_engine::batch::scan_dataset;
use hipm_engine::db::{init_database_pool, jobs};
use hipm_engine::geometry::Point2D;
use hipm_engine::output::write_result;
use hipm_engine::provider::SegmentationFile;
use hipm_engine::segmentation::{FrameSegmentation, HipLabel, SegmentationInstance};
use hipm_engine::{
    AnalysisConfig, BatchOrchestrator, JobError, JobRegistry, JobState, JsonSegmentationProvider,
    MetricRecord, Modality, ProviderRegistry,
};
use tempfile::TempDir;

fn write_case(dir: &Path, name: &str, frames: Vec<FrameSegmentation>) {
    let input = dir.join(name);
    std::fs::write(&input, b"image bytes").unwrap();
    let doc = SegmentationFile { frames };
    std::fs::write(
        JsonSegmentationProvider::sidecar_path(&input),
        serde_json::to_string(&doc).unwrap(),
    )
    .unwrap();
}

fn xray_frame() -> FrameSegmentation {
    let left = vec![
        Point2D::new(0.0, 0.0),
        Point2D::new(60.0, 10.0),
        Point2D::new(100.0, 30.0),
        Point2D::new(40.0, 40.0),
    ];
    let right: Vec<Point2D> = left.iter().map(|p| Point2D::new(400.0 - p.x, p.y)).collect();
    vec![
        SegmentationInstance::detected(HipLabel::IlliumAndAcetabulum, left),
        SegmentationInstance::detected(HipLabel::IlliumAndAcetabulum, right),
        SegmentationInstance::empty(HipLabel::FemoralHead),
    ]
}

#[tokio::test]
async fn test_manual_dataset_end_to_end() {
    let dataset = TempDir::new().unwrap();
    write_case(dataset.path(), "a.dcm", sweep(4, true));
    write_case(dataset.path(), "b.dcm", vec![us_frame(false)]);
    // No sidecar: the provider fails on every attempt
    std::fs::write(dataset.path().join("c.dcm"), b"image bytes").unwrap();

    let config = Arc::new(AnalysisConfig::default());
    let mut providers = ProviderRegistry::new();
    providers.register("manual", Arc::new(JsonSegmentationProvider::new(Modality::Ultrasound)));
    let provider = providers.get(&config.provider).unwrap();

    let registry = Arc::new(JobRegistry::new());
    let orch = BatchOrchestrator::new(Arc::clone(&registry), provider, Arc::clone(&config));

    let files = scan_dataset(dataset.path(), &config).unwrap();
    assert_eq!(files.len(), 3);
    for file in &files {
        orch.enqueue(file.to_str().unwrap(), false).await;
    }
    let summary = orch.run_until_idle().await;
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.dead, 1);

    let jobs = orch.list(None).await;
    assert_eq!(jobs.len(), 3);
    assert!(jobs[0].input_id.ends_with("a.dcm"));

    let a = jobs[0].record.as_ref().unwrap();
    assert!(a.volume().is_some());
    assert!(a.centering_ratio().is_some());

    let b = jobs[1].record.as_ref().unwrap();
    assert!(b.volume().is_none());
    assert!(b.frames()[0].alpha.is_some());
    assert!(b.frames()[0].coverage.is_none());

    assert_eq!(jobs[2].state, JobState::Dead);
    assert!(matches!(jobs[2].last_error, Some(JobError::PluginError(_))));
}

#[tokio::test]
async fn test_same_named_inputs_get_separate_results() {
    let dataset = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    for sub in ["a", "b"] {
        std::fs::create_dir_all(dataset.path().join(sub)).unwrap();
    }
    write_case(dataset.path(), "a/x.dcm", vec![us_frame(true)]);
    write_case(dataset.path(), "b/x.dcm", vec![us_frame(false)]);

    let config = Arc::new(AnalysisConfig::default());
    let registry = Arc::new(JobRegistry::new());
    let orch = BatchOrchestrator::new(
        Arc::clone(&registry),
        Arc::new(JsonSegmentationProvider::new(Modality::Ultrasound)),
        Arc::clone(&config),
    );
    for file in scan_dataset(dataset.path(), &config).unwrap() {
        orch.enqueue(file.to_str().unwrap(), false).await;
    }
    assert_eq!(orch.run_until_idle().await.completed, 2);

    let mut written = Vec::new();
    for job in registry.list(None).await {
        written.push(write_result(results.path(), &job, &config).unwrap().unwrap());
    }
    assert_ne!(written[0], written[1]);
    for (path, sub) in written.iter().zip(["a", "b"]) {
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        let input_id = value["input_id"].as_str().unwrap();
        assert!(input_id.ends_with(&format!("{}/x.dcm", sub)));
        assert!(path.starts_with(results.path()));
    }
}

#[tokio::test]
async fn test_xray_input() {
    let dataset = TempDir::new().unwrap();
    write_case(dataset.path(), "pelvis.png", vec![xray_frame()]);

    let config = Arc::new(AnalysisConfig {
        modality: Modality::Xray,
        ..Default::default()
    });
    let registry = Arc::new(JobRegistry::new());
    let orch = BatchOrchestrator::new(
        Arc::clone(&registry),
        Arc::new(JsonSegmentationProvider::new(Modality::Xray)),
        Arc::clone(&config),
    );

    let input = dataset.path().join("pelvis.png");
    orch.enqueue(input.to_str().unwrap(), false).await;
    orch.run_until_idle().await;

    let job = registry.status(input.to_str().unwrap()).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    let record = job.record.unwrap();
    assert_eq!(record.modality(), Modality::Xray);
    assert!(record.volume().is_none());

    let expected = 0.3f64.atan().to_degrees();
    let frame = &record.frames()[0];
    assert!((frame.acetabular_index_left.unwrap() - expected).abs() < 1e-9);
    assert!((frame.acetabular_index_right.unwrap() - expected).abs() < 1e-9);
    assert!(frame.alpha.is_none());
    // No femoral heads detected: no centre-edge angle
    assert!(frame.wiberg_left.is_none());

    let json = record.serialize(&config, None).unwrap();
    assert_eq!(json["modality"], "xray");
    assert!(json["frames"][0]["alpha"].is_null());
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let dataset = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();
    write_case(dataset.path(), "a.dcm", sweep(3, true));
    let input = dataset.path().join("a.dcm");
    let input_id = input.to_str().unwrap().to_string();

    let config = Arc::new(AnalysisConfig::default());
    let pool = init_database_pool(&data_dir.path().join("jobs.db")).await.unwrap();

    let original = {
        let registry = Arc::new(JobRegistry::new());
        let orch = BatchOrchestrator::new(
            Arc::clone(&registry),
            Arc::new(JsonSegmentationProvider::new(Modality::Ultrasound)),
            Arc::clone(&config),
        );
        orch.enqueue(&input_id, false).await;
        orch.enqueue("pending.dcm", false).await;
        orch.process_job(&input_id).await.unwrap();
        jobs::persist_registry(&pool, &registry).await.unwrap();
        registry.status(&input_id).await.unwrap()
    };

    let restored = JobRegistry::new();
    assert_eq!(jobs::restore_registry(&pool, &restored).await.unwrap(), 2);

    let job = restored.status(&input_id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.history.len(), original.history.len());
    assert_eq!(job.record, original.record);
    assert_eq!(restored.pending_ids().await, vec!["pending.dcm".to_string()]);

    // Serialized form survives the round trip through the database
    let value = job.record.unwrap().serialize(&config, None).unwrap();
    let back = MetricRecord::from_value(&value).unwrap();
    assert_eq!(Some(back), original.record);
}

#[tokio::test]
async fn test_interrupted_job_is_recovered() {
    let data_dir = TempDir::new().unwrap();
    let pool = init_database_pool(&data_dir.path().join("jobs.db")).await.unwrap();

    let mut job = hipm_engine::BatchJob::new("stuck.dcm", 0);
    job.start().unwrap();
    jobs::save_job(&pool, &job).await.unwrap();

    let registry = Arc::new(JobRegistry::new());
    jobs::restore_registry(&pool, &registry).await.unwrap();
    let orch = BatchOrchestrator::new(
        Arc::clone(&registry),
        Arc::new(helpers::ScriptedProvider::fixed(sweep(1, true))),
        Arc::new(AnalysisConfig::default()),
    );

    assert_eq!(orch.recover_interrupted().await.unwrap(), 1);
    assert_eq!(registry.state("stuck.dcm").await, Some(JobState::Pending));

    orch.run_until_idle().await;
    let job = registry.status("stuck.dcm").await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);
}
