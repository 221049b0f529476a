//! Task Queue
//!
//! Deferred loader work with a virtual clock for retry timers.

use std::collections::VecDeque;

use crate::events::ObjectEvent;
use crate::target::{InstanceHandle, TargetId};
use crate::NodeId;

/// Identity of a posted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskToken(pub u64);

/// Deferred loader work
#[derive(Debug, Clone)]
pub enum TaskKind {
    AsyncInstantiate(TargetId),
    /// Unload or stop a module that lost its document or frame
    CheckModuleStop(TargetId),
    DelayedStop {
        target: TargetId,
        instance: InstanceHandle,
    },
    FireEvent {
        node: NodeId,
        event: ObjectEvent,
    },
}

#[derive(Debug, Clone)]
pub struct Task {
    pub token: TaskToken,
    pub kind: TaskKind,
}

/// Timer task
#[derive(Debug, Clone)]
struct Timer {
    task: Task,
    delay_ms: u64,
    scheduled_at: u64,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    /// Runnable tasks in posting order
    tasks: VecDeque<Task>,
    /// Pending timers
    timers: Vec<Timer>,
    next_token: u64,
    /// Current timestamp (ms)
    current_time: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&mut self) -> TaskToken {
        self.next_token += 1;
        TaskToken(self.next_token)
    }

    /// Queue a task for the next turn
    pub fn post(&mut self, kind: TaskKind) -> TaskToken {
        let token = self.token();
        self.tasks.push_back(Task { token, kind });
        token
    }

    /// Queue a task once `delay_ms` have passed
    pub fn post_delayed(&mut self, kind: TaskKind, delay_ms: u64) -> TaskToken {
        let token = self.token();
        self.timers.push(Timer {
            task: Task { token, kind },
            delay_ms,
            scheduled_at: self.current_time,
        });
        token
    }

    /// Advance time and queue due timers
    pub fn tick(&mut self, delta_ms: u64) {
        self.current_time += delta_ms;

        let now = self.current_time;
        let (due, pending): (Vec<Timer>, Vec<Timer>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|t| now >= t.scheduled_at + t.delay_ms);
        self.timers = pending;

        for timer in due {
            self.tasks.push_back(timer.task);
        }
    }

    /// Get next runnable task (if any)
    pub fn next(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn has_pending_work(&self) -> bool {
        !self.tasks.is_empty() || !self.timers.is_empty()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn current_time(&self) -> u64 {
        self.current_time
    }
}
