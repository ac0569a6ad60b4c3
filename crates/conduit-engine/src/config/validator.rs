//! Semantic validation for parsed job configuration values.

use anyhow::{bail, Result};

use crate::config::types::{parse_byte_size, JobConfig};

/// Validate a parsed job configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the job config.
pub fn validate_job(config: &JobConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported job version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.job.trim().is_empty() {
        errors.push("Job name must not be empty".to_string());
    }
    if config.reader.use_ref.trim().is_empty() {
        errors.push("Reader connector reference (use) must not be empty".to_string());
    }
    if config.writer.use_ref.trim().is_empty() {
        errors.push("Writer connector reference (use) must not be empty".to_string());
    }

    for (label, handler) in [
        ("pre_handler", &config.pre_handler),
        ("post_handler", &config.post_handler),
    ] {
        if handler.as_ref().is_some_and(|h| h.use_ref.trim().is_empty()) {
            errors.push(format!("{label} reference (use) must not be empty"));
        }
    }

    let settings = &config.settings;
    if settings.channel == 0 {
        errors.push("settings.channel must be at least 1".to_string());
    }
    if settings.channels_per_group == 0 {
        errors.push("settings.channels_per_group must be at least 1".to_string());
    }
    if let Some(p) = settings.error_limit.percentage {
        if !(0.0..=1.0).contains(&p) {
            errors.push(format!(
                "settings.error_limit.percentage must be within 0..=1, got {p}"
            ));
        }
    }
    if settings.speed.byte == Some(0) || settings.speed.record == Some(0) {
        errors.push("settings.speed limits must be greater than 0".to_string());
    }
    if settings.speed.byte.is_some() && config.transport.byte_speed.is_none() {
        errors.push(
            "settings.speed.byte requires transport.byte_speed to derive the channel count"
                .to_string(),
        );
    }
    if settings.speed.record.is_some() && config.transport.record_speed.is_none() {
        errors.push(
            "settings.speed.record requires transport.record_speed to derive the channel count"
                .to_string(),
        );
    }

    let transport = &config.transport;
    if transport.capacity == 0 {
        errors.push("transport.capacity must be at least 1".to_string());
    }
    if transport.buffer_size == 0 {
        errors.push("transport.buffer_size must be at least 1".to_string());
    } else if transport.buffer_size > transport.capacity {
        errors.push(format!(
            "transport.buffer_size ({}) must not exceed transport.capacity ({})",
            transport.buffer_size, transport.capacity
        ));
    }
    match parse_byte_size(&transport.byte_capacity) {
        Ok(0) => errors.push("transport.byte_capacity must be greater than 0".to_string()),
        Ok(_) => {}
        Err(_) => errors.push(format!(
            "transport.byte_capacity '{}' is not a valid byte size",
            transport.byte_capacity
        )),
    }
    if transport.byte_speed == Some(0) || transport.record_speed == Some(0) {
        errors.push("transport speed limits must be greater than 0".to_string());
    }

    let intervals = [
        ("transport.flow_control_interval_ms", transport.flow_control_interval_ms),
        ("transport.wait_tick_ms", transport.wait_tick_ms),
        ("task_group.sleep_interval_ms", config.task_group.sleep_interval_ms),
        ("task_group.report_interval_ms", config.task_group.report_interval_ms),
        ("scheduler.sleep_interval_ms", config.scheduler.sleep_interval_ms),
        ("scheduler.report_interval_ms", config.scheduler.report_interval_ms),
        ("monitor.hang_expiry_secs", config.monitor.hang_expiry_secs),
    ];
    for (name, value) in intervals {
        if value == 0 {
            errors.push(format!("{name} must be greater than 0"));
        }
    }
    if config.task_group.fail_over.max_attempts == 0 {
        errors.push("task_group.fail_over.max_attempts must be at least 1".to_string());
    }

    if !errors.is_empty() {
        bail!("Job validation failed:\n  - {}", errors.join("\n  - "));
    }

    Ok(())
}
