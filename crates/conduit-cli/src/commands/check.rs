use std::path::Path;

use anyhow::{Context, Result};

use conduit_engine::config::{parser, validator};
use conduit_engine::{ConnectorRegistry, JobContainer};

/// Execute the `check` command: validate job config and connector pre-checks.
pub fn execute(job_path: &Path) -> Result<()> {
    // 1. Parse job YAML
    let config = parser::parse_job(job_path)
        .with_context(|| format!("Failed to parse job: {}", job_path.display()))?;

    // 2. Validate job structure
    validator::validate_job(&config)?;
    println!("Job structure: OK");

    // 3. Initialize and pre-check both connectors
    let registry = ConnectorRegistry::with_builtins();
    let reader = config.reader.use_ref.clone();
    let writer = config.writer.use_ref.clone();
    let container = JobContainer::new(config, &registry);
    if let Err(err) = container.pre_check() {
        println!("{:18} FAILED", "Connectors:");
        println!("  {}", err);
        anyhow::bail!("One or more checks failed");
    }
    println!("{:18} OK", format!("Reader ({}):", reader));
    println!("{:18} OK", format!("Writer ({}):", writer));

    println!("\nAll checks passed.");
    Ok(())
}
