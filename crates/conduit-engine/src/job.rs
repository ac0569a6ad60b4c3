//! Job container: drives one job through pre-handle, init, prepare, split,
//! schedule, post, post-handle, and destroy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_sdk::{JobHandler, SinkConnector, SourceConnector};
use conduit_types::{Communication, ErrorCategory, Failure, State, TaskId};

use crate::assign::{adjust_channel_number, assign_fairly, TaskConfig};
use crate::channel::ChannelConfig;
use crate::config::types::{mask_sensitive, ConnectorRef, JobConfig};
use crate::config::validator::validate_job;
use crate::error_limit::ErrorRecordChecker;
use crate::errors::EngineError;
use crate::registry::ConnectorRegistry;
use crate::report::JobReport;
use crate::result::JobResult;
use crate::scheduler::{JobScheduler, KillHandle};
use crate::task_group::TaskGroupOptions;

struct Connectors {
    reader: Arc<dyn SourceConnector>,
    writer: Arc<dyn SinkConnector>,
}

impl Connectors {
    fn destroy(&self, job: &str) {
        if let Err(e) = self.reader.destroy() {
            tracing::warn!(job, error = %e, "Reader destroy failed");
        }
        if let Err(e) = self.writer.destroy() {
            tracing::warn!(job, error = %e, "Writer destroy failed");
        }
    }
}

/// Runs one job against the connectors of a [`ConnectorRegistry`].
pub struct JobContainer<'r> {
    config: JobConfig,
    registry: &'r ConnectorRegistry,
    kill: KillHandle,
}

impl<'r> JobContainer<'r> {
    pub fn new(config: JobConfig, registry: &'r ConnectorRegistry) -> Self {
        Self {
            config,
            registry,
            kill: KillHandle::new(),
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Handle that kills this job from another thread.
    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    /// Validate the config, build both connectors, and run their
    /// `pre_check` hooks without moving any data.
    ///
    /// # Errors
    ///
    /// Returns the first validation, lookup, or pre-check failure.
    pub fn pre_check(&self) -> Result<(), EngineError> {
        self.validate()?;
        let connectors = self.init()?;
        let result = connectors
            .reader
            .pre_check()
            .and_then(|()| connectors.writer.pre_check())
            .map_err(EngineError::from);
        connectors.destroy(&self.config.job);
        result?;
        tracing::info!(job = self.config.job, "Pre-check passed");
        Ok(())
    }

    /// Run the job to completion.
    ///
    /// Errors before scheduling (invalid config, unknown connector, failed
    /// prepare or split) are returned as `Err`. Once tasks are scheduled the
    /// outcome, including failure and kill, is carried by the returned
    /// [`JobResult`].
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if the job cannot be scheduled.
    pub fn run(&self) -> Result<JobResult, EngineError> {
        let start = Instant::now();
        self.validate()?;
        tracing::info!(
            job = self.config.job,
            reader = self.config.reader.use_ref,
            writer = self.config.writer.use_ref,
            "Starting job"
        );
        tracing::debug!(
            reader_config = %mask_sensitive(&self.config.reader.config),
            writer_config = %mask_sensitive(&self.config.writer.config),
            "Job connector configuration"
        );

        let pre_handler = self.handler(self.config.pre_handler.as_ref())?;
        let post_handler = self.handler(self.config.post_handler.as_ref())?;
        if let Some(handler) = &pre_handler {
            handler.pre_handle(&self.config.job)?;
            tracing::info!(job = self.config.job, "Job pre-handler finished");
        }

        let connectors = self.init()?;
        let result = self.run_connectors(&connectors, post_handler.as_deref(), start);
        connectors.destroy(&self.config.job);

        if let Err(ref e) = result {
            tracing::error!(job = self.config.job, error = %e, "Job failed before completion");
        }
        result
    }

    fn validate(&self) -> Result<(), EngineError> {
        validate_job(&self.config).map_err(|e| {
            EngineError::Failed(Failure::new(ErrorCategory::Config, format!("{e:#}")))
        })
    }

    fn handler(
        &self,
        handler: Option<&ConnectorRef>,
    ) -> Result<Option<Box<dyn JobHandler>>, EngineError> {
        handler
            .map(|h| self.registry.handler(&h.use_ref, &h.config))
            .transpose()
    }

    fn init(&self) -> Result<Connectors, EngineError> {
        let reader = self
            .registry
            .source(&self.config.reader.use_ref, &self.config.reader.config)?;
        let writer = self
            .registry
            .sink(&self.config.writer.use_ref, &self.config.writer.config)?;
        Ok(Connectors {
            reader: Arc::from(reader),
            writer: Arc::from(writer),
        })
    }

    fn run_connectors(
        &self,
        connectors: &Connectors,
        post_handler: Option<&dyn JobHandler>,
        start: Instant,
    ) -> Result<JobResult, EngineError> {
        connectors.reader.prepare()?;
        connectors.writer.prepare()?;

        let (tasks, channels) = self.split(connectors)?;
        let task_count = tasks.len();
        let total_stage = task_count as u64 * 2;
        let plans = assign_fairly(tasks, channels, self.config.settings.channels_per_group);
        let task_group_count = plans.len();
        tracing::info!(
            job = self.config.job,
            tasks = task_count,
            channels = channels.min(task_count),
            task_groups = task_group_count,
            "Tasks assigned"
        );

        let options = TaskGroupOptions {
            channel: ChannelConfig::from_transport(&self.config.transport)?,
            task_group: self.config.task_group.clone(),
            hang_expiry: Duration::from_secs(self.config.monitor.hang_expiry_secs),
            max_dirty_logged: self.config.collector.max_dirty_logged,
        };
        let checker = ErrorRecordChecker::new(&self.config.settings.error_limit);
        let mut scheduler =
            JobScheduler::new(self.config.scheduler, checker, self.kill.clone());
        let mut communication = scheduler.run(
            &self.config.job,
            plans,
            &connectors.reader,
            &connectors.writer,
            &options,
        );

        if communication.state() == State::Succeeded {
            self.post(connectors, &mut communication);
        }
        if communication.state() == State::Succeeded {
            let checked = checker
                .check_record_limit(&communication)
                .and_then(|()| checker.check_percentage_limit(&communication));
            if let Err(e) = checked {
                tracing::error!(job = self.config.job, error = %e, "Dirty record limit exceeded");
                communication.mark_failed(e.to_failure());
            }
        }
        if let Some(handler) = post_handler {
            if communication.state() == State::Succeeded {
                if let Err(e) = handler.post_handle(&self.config.job, &communication) {
                    tracing::error!(job = self.config.job, error = %e, "Job post-handler failed");
                    communication.mark_failed(EngineError::from(e).to_failure());
                }
            }
        }

        let duration = start.elapsed();
        self.log_statistics(&communication, duration, total_stage);
        Ok(JobResult {
            job: self.config.job.clone(),
            communication,
            duration_secs: duration.as_secs_f64(),
            task_count,
            task_group_count,
        })
    }

    /// Split the reader, then the writer to the same count, and pair them
    /// into tasks with sequential ids. Also returns the channel count the
    /// split was advised with.
    fn split(&self, connectors: &Connectors) -> Result<(Vec<TaskConfig>, usize), EngineError> {
        let channels = adjust_channel_number(&self.config.settings, &self.config.transport);
        let reader_slices = connectors.reader.split(channels)?;
        if reader_slices.is_empty() {
            return Err(EngineError::PluginSplit(format!(
                "reader '{}' produced no tasks",
                self.config.reader.use_ref
            )));
        }
        let writer_slices = connectors.writer.split(reader_slices.len())?;
        if writer_slices.len() != reader_slices.len() {
            return Err(EngineError::PluginSplit(format!(
                "reader split into {} tasks but writer split into {}",
                reader_slices.len(),
                writer_slices.len()
            )));
        }
        tracing::debug!(
            job = self.config.job,
            advice = channels,
            tasks = reader_slices.len(),
            "Split complete"
        );

        let tasks = reader_slices
            .into_iter()
            .zip(writer_slices)
            .enumerate()
            .map(|(i, (reader, writer))| TaskConfig {
                task_id: TaskId::new(i as u32),
                reader,
                writer,
            })
            .collect();
        Ok((tasks, channels))
    }

    fn post(&self, connectors: &Connectors, communication: &mut Communication) {
        let result = connectors
            .writer
            .post()
            .and_then(|()| connectors.reader.post());
        if let Err(e) = result {
            tracing::error!(job = self.config.job, error = %e, "Connector post failed");
            communication.mark_failed(EngineError::from(e).to_failure());
        }
    }

    fn log_statistics(&self, communication: &Communication, duration: Duration, total_stage: u64) {
        let mut baseline = Communication::succeeded();
        baseline.set_timestamp_ms(
            communication
                .timestamp_ms()
                .saturating_sub(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)),
        );
        let report = JobReport::from_delta(communication, &baseline, total_stage);
        let counters = &communication.counters;
        tracing::info!(
            job = self.config.job,
            state = %communication.state(),
            records_read = counters.total_read_records(),
            records_written = counters.write_succeed_records(),
            error_records = counters.total_error_records(),
            duration_secs = duration.as_secs_f64(),
            "Job finished"
        );
        tracing::info!("{}", report);
        if let Some(failure) = communication.failure() {
            tracing::error!(job = self.config.job, cause = %failure, "Job failure cause");
        }
    }
}
