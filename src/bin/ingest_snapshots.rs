use taxi_pipeline::{
    init_logging, log_app_start, log_pipeline_config, logging_config_from_env,
    pipeline_config_from_env, HttpSnapshotSource, LocalObjectStore, PeriodOutcome, Pipeline,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("ingest_snapshots", &logging_cfg);

    let cfg = pipeline_config_from_env();
    cfg.validate()?;
    log_pipeline_config(&cfg);

    let store = LocalObjectStore::new(&cfg.store_root);
    let source = HttpSnapshotSource::from_config(&cfg)?;
    let pipeline = Pipeline::new(cfg, &store, &source)?;

    let today = chrono::Local::now().date_naive();
    let report = pipeline.run_ingestion(today);

    for period in &report.periods {
        match &period.outcome {
            PeriodOutcome::Consolidated {
                sampled_rows,
                retained_rows,
                pruned_rows,
            } => println!(
                "{} consolidated | sampled={} retained={} pruned={}",
                period.period, sampled_rows, retained_rows, pruned_rows
            ),
            PeriodOutcome::FetchFailed { reason } => {
                println!("{} skipped | fetch failed: {}", period.period, reason)
            }
            PeriodOutcome::ConsolidationFailed { reason } => {
                println!("{} skipped | consolidation failed: {}", period.period, reason)
            }
        }
    }
    println!("bucket versioning: {:?}", report.versioning);

    Ok(())
}
