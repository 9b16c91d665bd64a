//! Time-ordered schedule of deferred work.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::executor::{Action, Payload};
use crate::incident::{Incident, IncidentCode};
use crate::responder::Responder;
use crate::strategy::StrategyId;

/// Identifier given to tasks scheduled without one.
pub const SCHEDULED_ID: &str = "chrono";

/// Starts with the maximum code point so background tasks sort after every
/// other task with the same timestamp.
const BACKGROUND_PREFIX: &str = "\u{ffff}\u{ffff}";
const BACKGROUND_ID: &str = "\u{ffff}\u{ffff}BackgroundTask";

/// Token for one scheduled task. Survives rescheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub handle: TaskHandle,
    pub incident: Incident,
    pub payload: Payload,
    background: bool,
}

impl ScheduledTask {
    pub fn timestamp(&self) -> i64 {
        self.incident.timestamp()
    }

    pub fn is_background(&self) -> bool {
        self.background
            || self
                .incident
                .identifier()
                .is_some_and(|id| id.starts_with(BACKGROUND_PREFIX))
    }
}

/// How a caller picks out a scheduled task for removal or rescheduling.
#[derive(Clone)]
pub enum ScheduleTarget {
    Task(TaskHandle),
    Trigger(IncidentCode),
    Named(String),
    /// Matches both chain starts and delayed-step resumptions of the node.
    Strategy(StrategyId),
    Action(Action),
    Responder(Responder),
}

impl ScheduleTarget {
    pub fn matches(&self, task: &ScheduledTask) -> bool {
        match (self, &task.payload) {
            (Self::Task(handle), _) => *handle == task.handle,
            (Self::Trigger(a), Payload::Trigger(b)) => a == b,
            (Self::Named(a), Payload::Named(b)) => a == b,
            (Self::Strategy(a), Payload::Strategy(b) | Payload::Resume(b)) => a == b,
            (Self::Action(a), Payload::Action(b)) => Rc::ptr_eq(a, b),
            (Self::Responder(a), Payload::Responder(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Payload to schedule when rescheduling a target that was not found.
    pub(crate) fn into_payload(self) -> Option<Payload> {
        match self {
            Self::Task(_) => None,
            Self::Trigger(code) => Some(Payload::Trigger(code)),
            Self::Named(name) => Some(Payload::Named(name)),
            Self::Strategy(id) => Some(Payload::Strategy(id)),
            Self::Action(action) => Some(Payload::Action(action)),
            Self::Responder(responder) => Some(Payload::Responder(responder)),
        }
    }
}

impl From<TaskHandle> for ScheduleTarget {
    fn from(handle: TaskHandle) -> Self {
        Self::Task(handle)
    }
}

impl From<IncidentCode> for ScheduleTarget {
    fn from(code: IncidentCode) -> Self {
        Self::Trigger(code)
    }
}

impl From<&str> for ScheduleTarget {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<StrategyId> for ScheduleTarget {
    fn from(id: StrategyId) -> Self {
        Self::Strategy(id)
    }
}

/// Sorted schedule plus the buffer of tasks that are due but not yet run.
///
/// Tasks move into the due buffer when a tick observes them as due. A tick
/// that runs out of budget leaves the rest there, and the next tick resumes
/// them before pulling anything new.
pub struct TimeKeeper {
    schedule: Vec<ScheduledTask>,
    due: VecDeque<ScheduledTask>,
    next_handle: u64,
    /// How many milliseconds of scheduled work a single tick may spend.
    max_time_processing: i64,
    last_tick: i64,
}

impl TimeKeeper {
    pub const DEFAULT_MAX_TIME_PROCESSING: i64 = 10;

    pub fn new(max_time_processing: i64) -> Self {
        Self {
            schedule: Vec::new(),
            due: VecDeque::new(),
            next_handle: 1,
            max_time_processing,
            last_tick: 0,
        }
    }

    pub fn max_time_processing(&self) -> i64 {
        self.max_time_processing
    }

    pub fn set_max_time_processing(&mut self, ms: i64) {
        self.max_time_processing = ms;
    }

    /// `now` as captured by the most recent tick.
    pub fn last_tick(&self) -> i64 {
        self.last_tick
    }

    /// Tasks waiting for their time, in execution order.
    pub fn scheduled(&self) -> &[ScheduledTask] {
        &self.schedule
    }

    pub fn len(&self) -> usize {
        self.schedule.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_empty() && self.due.is_empty()
    }

    /// Tasks already due but deferred by the processing budget.
    pub fn due_len(&self) -> usize {
        self.due.len()
    }

    pub(crate) fn allocate(&mut self, incident: Incident, payload: Payload) -> ScheduledTask {
        let handle = TaskHandle(self.next_handle);
        self.next_handle += 1;
        ScheduledTask {
            handle,
            incident,
            payload,
            background: false,
        }
    }

    /// Insert keeping the schedule sorted. Equal keys stay in insertion order.
    pub(crate) fn insert(&mut self, task: ScheduledTask) -> TaskHandle {
        let index = self
            .schedule
            .partition_point(|t| t.incident.schedule_cmp(&task.incident).is_le());
        let handle = task.handle;
        self.schedule.insert(index, task);
        handle
    }

    /// Move everything strictly before `now` into the due buffer.
    pub(crate) fn pull_due(&mut self, now: i64) {
        self.last_tick = now;
        let count = self.schedule.partition_point(|t| t.timestamp() < now);
        self.due.extend(self.schedule.drain(..count));
    }

    pub(crate) fn pop_due(&mut self) -> Option<ScheduledTask> {
        self.due.pop_front()
    }

    /// Remove the first task matching `target`, looking at the schedule first
    /// and then at the due buffer.
    pub fn remove(&mut self, target: &ScheduleTarget) -> Option<ScheduledTask> {
        if let Some(index) = self.schedule.iter().position(|t| target.matches(t)) {
            return Some(self.schedule.remove(index));
        }
        let index = self.due.iter().position(|t| target.matches(t))?;
        self.due.remove(index)
    }

    /// Re-key a task so it sorts last among its timestamp and is skipped by
    /// [`TimeKeeper::next_needing_service`] while foreground work is due.
    pub fn mark_as_background(&mut self, handle: TaskHandle) -> bool {
        let Some(index) = self.schedule.iter().position(|t| t.handle == handle) else {
            return false;
        };
        let mut task = self.schedule.remove(index);
        task.background = true;
        task.incident.identifier = Some(BACKGROUND_ID.to_string());
        self.insert(task);
        true
    }

    /// The next due foreground task, or a due background task when nothing
    /// in the foreground is due.
    pub fn next_needing_service(&self, now: i64) -> Option<&ScheduledTask> {
        let first = self.schedule.first()?;
        if first.timestamp() > now {
            return None;
        }
        self.schedule
            .iter()
            .take_while(|t| t.timestamp() <= now)
            .find(|t| !t.is_background())
            .or(Some(first))
    }
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_TIME_PROCESSING)
    }
}
