//! Mergeable run statistics and state.
//!
//! One [`Communication`] exists per task; groups and the job obtain theirs
//! by merging snapshots. [`Communication::merge`] is pure: it never mutates
//! its inputs, so a reporter holding an older snapshot never observes a
//! partially combined value.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Serialize};

use crate::error::Failure;

/// Run state of a task, task group, or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Running,
    Succeeded,
    Failed,
    Killed,
}

impl State {
    /// Merge precedence: FAILED > KILLED > RUNNING > SUCCEEDED.
    fn precedence(self) -> u8 {
        match self {
            Self::Succeeded => 0,
            Self::Running => 1,
            Self::Killed => 2,
            Self::Failed => 3,
        }
    }

    pub fn is_finished(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// The higher-precedence of two states.
    pub fn merge(self, other: Self) -> Self {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Killed => "KILLED",
        };
        f.write_str(s)
    }
}

/// Additive counters tracked per task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub read_succeed_records: u64,
    pub read_succeed_bytes: u64,
    pub read_failed_records: u64,
    pub read_failed_bytes: u64,
    pub write_received_records: u64,
    pub write_received_bytes: u64,
    pub write_failed_records: u64,
    pub write_failed_bytes: u64,
    /// Time the reader side spent blocked waiting for channel space.
    pub wait_writer_nanos: u64,
    /// Time the writer side spent blocked waiting for channel data.
    pub wait_reader_nanos: u64,
    /// Completed lifecycle stages, used for progress percentage.
    pub stage: u64,
}

impl Counters {
    pub fn total_read_records(&self) -> u64 {
        self.read_succeed_records + self.read_failed_records
    }

    pub fn total_read_bytes(&self) -> u64 {
        self.read_succeed_bytes + self.read_failed_bytes
    }

    pub fn total_error_records(&self) -> u64 {
        self.read_failed_records + self.write_failed_records
    }

    pub fn total_error_bytes(&self) -> u64 {
        self.read_failed_bytes + self.write_failed_bytes
    }

    pub fn write_succeed_records(&self) -> u64 {
        self.write_received_records
            .saturating_sub(self.write_failed_records)
    }

    pub fn write_succeed_bytes(&self) -> u64 {
        self.write_received_bytes.saturating_sub(self.write_failed_bytes)
    }
}

impl Add for Counters {
    type Output = Counters;

    fn add(self, rhs: Counters) -> Counters {
        Counters {
            read_succeed_records: self.read_succeed_records + rhs.read_succeed_records,
            read_succeed_bytes: self.read_succeed_bytes + rhs.read_succeed_bytes,
            read_failed_records: self.read_failed_records + rhs.read_failed_records,
            read_failed_bytes: self.read_failed_bytes + rhs.read_failed_bytes,
            write_received_records: self.write_received_records + rhs.write_received_records,
            write_received_bytes: self.write_received_bytes + rhs.write_received_bytes,
            write_failed_records: self.write_failed_records + rhs.write_failed_records,
            write_failed_bytes: self.write_failed_bytes + rhs.write_failed_bytes,
            wait_writer_nanos: self.wait_writer_nanos + rhs.wait_writer_nanos,
            wait_reader_nanos: self.wait_reader_nanos + rhs.wait_reader_nanos,
            stage: self.stage + rhs.stage,
        }
    }
}

/// Counters, messages, state, and failure cause of one run unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Communication {
    pub counters: Counters,
    messages: BTreeMap<String, Vec<String>>,
    state: State,
    failure: Option<Failure>,
    timestamp_ms: i64,
}

impl Default for Communication {
    fn default() -> Self {
        Self::new()
    }
}

impl Communication {
    /// A fresh, running communication stamped with the current time.
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            messages: BTreeMap::new(),
            state: State::Running,
            failure: None,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// The merge identity: zero counters, SUCCEEDED, no cause.
    pub fn succeeded() -> Self {
        Self {
            counters: Counters::default(),
            messages: BTreeMap::new(),
            state: State::Succeeded,
            failure: None,
            timestamp_ms: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Set the state unless it is already FAILED.
    pub fn set_state(&mut self, state: State) {
        if self.state == State::Failed {
            return;
        }
        self.state = state;
    }

    /// Set the state unconditionally.
    pub fn force_state(&mut self, state: State) {
        self.state = state;
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Record a failure cause. The first cause set is kept.
    pub fn set_failure(&mut self, failure: Failure) {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    /// Transition to FAILED with `failure` as the cause.
    pub fn mark_failed(&mut self, failure: Failure) {
        self.set_failure(failure);
        self.state = State::Failed;
    }

    pub fn add_message(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.messages.entry(key.into()).or_default().push(value.into());
    }

    pub fn messages(&self) -> &BTreeMap<String, Vec<String>> {
        &self.messages
    }

    pub fn message(&self, key: &str) -> &[String] {
        self.messages.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn set_timestamp_ms(&mut self, timestamp_ms: i64) {
        self.timestamp_ms = timestamp_ms;
    }

    pub fn touch(&mut self) {
        self.timestamp_ms = chrono::Utc::now().timestamp_millis();
    }

    /// Clear counters, messages, and cause and return to RUNNING.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Combine two snapshots into a new one.
    ///
    /// Counters sum, states merge by precedence, messages concatenate per
    /// key, and `self`'s cause wins over `other`'s.
    #[must_use]
    pub fn merge(&self, other: &Communication) -> Communication {
        let mut messages = self.messages.clone();
        for (key, values) in &other.messages {
            messages
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        Communication {
            counters: self.counters + other.counters,
            messages,
            state: self.state.merge(other.state),
            failure: self.failure.clone().or_else(|| other.failure.clone()),
            timestamp_ms: self.timestamp_ms.max(other.timestamp_ms),
        }
    }

    /// Fold any number of snapshots, starting from the SUCCEEDED identity.
    pub fn merge_all<'a, I>(items: I) -> Communication
    where
        I: IntoIterator<Item = &'a Communication>,
    {
        items
            .into_iter()
            .fold(Self::succeeded(), |acc, item| acc.merge(item))
    }

    pub fn total_read_records(&self) -> u64 {
        self.counters.total_read_records()
    }

    pub fn total_error_records(&self) -> u64 {
        self.counters.total_error_records()
    }
}
