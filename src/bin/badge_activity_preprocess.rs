use badge_activity::{
    init_logging, log_app_start, log_pipeline_config, logging_config_from_env,
    pipeline_config_from_env, run_pipeline,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let config = pipeline_config_from_env()?;
    log_pipeline_config(&config);

    let report = run_pipeline(&config)?;

    println!(
        "Exported {} rows ({} active, {} backfilled sequences) to {}",
        report.output_rows,
        report.active_sequences,
        report.backfilled_sequences,
        config.output_path.display()
    );
    Ok(())
}
