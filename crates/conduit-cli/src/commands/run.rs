use std::path::Path;

use anyhow::{Context, Result};

use conduit_engine::config::{parser, validator};
use conduit_engine::report::format_bytes;
use conduit_engine::{ConnectorRegistry, JobContainer, JobOutcome, JobResult};

/// Execute the `run` command: parse, validate, and run a job.
///
/// Returns the process exit status for the finished job.
pub fn execute(job_path: &Path, dry_run: bool) -> Result<i32> {
    // 1. Parse job YAML
    let config = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;

    // 2. Validate
    validator::validate_job(&config)?;

    tracing::info!(
        job = config.job,
        reader = config.reader.use_ref,
        writer = config.writer.use_ref,
        channel = config.settings.channel,
        "Job validated"
    );

    let registry = ConnectorRegistry::with_builtins();
    let name = config.job.clone();
    let container = JobContainer::new(config, &registry);

    // 3. Dry run stops after connector pre-checks
    if dry_run {
        if let Err(err) = container.pre_check() {
            eprintln!("Job '{}' failed pre-check: {}", name, err);
            return Ok(err.exit_code());
        }
        println!("Job '{}' passed pre-check (dry run, no data moved).", name);
        return Ok(0);
    }

    // 4. Run
    let result = match container.run() {
        Ok(result) => result,
        Err(err) => {
            eprintln!("Job '{}' failed: {}", name, err);
            return Ok(err.exit_code());
        }
    };

    print_summary(&result);

    // Machine-readable JSON for wrapping tools
    println!("@@JOB_JSON@@{}", result.to_json());

    Ok(result.exit_code())
}

fn print_summary(result: &JobResult) {
    match result.outcome() {
        JobOutcome::Succeeded => println!("Job '{}' completed successfully.", result.job),
        JobOutcome::Failed(failure) => println!("Job '{}' failed: {}", result.job, failure),
        JobOutcome::Killed => println!("Job '{}' was killed.", result.job),
    }

    let counts = result.counts();
    let wait = &result.communication.counters;
    println!("  Records read:    {}", counts.records_read);
    println!("  Records written: {}", counts.records_written);
    println!("  Bytes read:      {}", format_bytes(counts.bytes_read));
    println!("  Bytes written:   {}", format_bytes(counts.bytes_written));
    if counts.error_records > 0 {
        println!(
            "  Dirty records:   {} ({})",
            counts.error_records,
            format_bytes(counts.error_bytes)
        );
    }
    println!("  Duration:        {:.2}s", result.duration_secs);
    if result.duration_secs > 0.0 {
        println!(
            "  Throughput:      {:.0} rows/sec, {:.2} MB/s",
            counts.records_read as f64 / result.duration_secs,
            counts.bytes_read as f64 / result.duration_secs / 1_048_576.0,
        );
    }
    println!("  Writer wait:     {:.3}s", wait.wait_writer_nanos as f64 / 1e9);
    println!("  Reader wait:     {:.3}s", wait.wait_reader_nanos as f64 / 1e9);
    println!(
        "  Tasks:           {} in {} group(s)",
        result.task_count, result.task_group_count
    );
}
