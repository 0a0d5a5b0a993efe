use taxi_pipeline::{
    build_feature_artifacts, init_logging, log_app_start, log_pipeline_config,
    logging_config_from_env, pipeline_config_from_env, LocalObjectStore,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("build_features", &logging_cfg);

    let cfg = pipeline_config_from_env();
    cfg.validate()?;
    log_pipeline_config(&cfg);

    let store = LocalObjectStore::new(&cfg.store_root);
    let report = build_feature_artifacts(&store, &cfg)?;
    println!(
        "features built | input={} dropped={} output={} train={} test={}",
        report.input_rows,
        report.dropped_invalid_timestamps,
        report.output_rows,
        report.train_rows,
        report.test_rows
    );
    if !report.failed_uploads.is_empty() {
        return Err(format!("uploads failed: {}", report.failed_uploads.join(", ")).into());
    }

    Ok(())
}
