//! Split results and their deterministic packing into task groups.

use conduit_types::{TaskGroupId, TaskId};
use serde::Serialize;

use crate::config::types::{JobSettings, TransportConfig};

/// Reader and writer parameters for one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskConfig {
    pub task_id: TaskId,
    pub reader: serde_json::Value,
    pub writer: serde_json::Value,
}

/// Tasks and channel budget assigned to one task group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskGroupPlan {
    pub group_id: TaskGroupId,
    pub channel_number: usize,
    pub tasks: Vec<TaskConfig>,
}

/// Number of channels the job should run with.
///
/// Job-level speed targets divided by per-channel speed limits win over the
/// configured channel count; when both byte and record targets are set the
/// smaller result is used.
pub fn adjust_channel_number(settings: &JobSettings, transport: &TransportConfig) -> usize {
    let by_speed = |job: Option<u64>, channel: Option<u64>| -> Option<usize> {
        match (job, channel) {
            (Some(job), Some(channel)) if channel > 0 => {
                Some(usize::try_from(job / channel).unwrap_or(usize::MAX).max(1))
            }
            _ => None,
        }
    };
    let by_byte = by_speed(settings.speed.byte, transport.byte_speed);
    let by_record = by_speed(settings.speed.record, transport.record_speed);

    match (by_byte, by_record) {
        (Some(b), Some(r)) => b.min(r),
        (Some(n), None) | (None, Some(n)) => n,
        (None, None) => settings.channel.max(1),
    }
}

/// Pack `tasks` into groups of at most `channels_per_group` channels.
///
/// Tasks are dealt round-robin in task order; `channels` is spread across
/// groups with the remainder going to the first groups. Pure and
/// deterministic.
pub fn assign_fairly(
    tasks: Vec<TaskConfig>,
    channels: usize,
    channels_per_group: usize,
) -> Vec<TaskGroupPlan> {
    if tasks.is_empty() {
        return Vec::new();
    }
    let per_group = channels_per_group.max(1);
    let channels = channels.clamp(1, tasks.len());
    let group_count = channels.div_ceil(per_group);

    let mut plans: Vec<TaskGroupPlan> = (0..group_count)
        .map(|i| TaskGroupPlan {
            group_id: TaskGroupId::new(i as u32),
            channel_number: 0,
            tasks: Vec::new(),
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        plans[i % group_count].tasks.push(task);
    }

    let base = channels / group_count;
    let remainder = channels % group_count;
    for (i, plan) in plans.iter_mut().enumerate() {
        plan.channel_number = base + usize::from(i < remainder);
    }
    plans
}
