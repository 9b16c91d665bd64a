//! The processor: owns the registry, schedule and strategies, and drives ticks.

use std::rc::Rc;

use anyhow::Result;
use tracing::{debug, error, warn};

use crate::clock::{MonotonicClock, TimeSource, UtcClock};
use crate::config::{ClockKind, ProcessorConfig};
use crate::error::ProcessError;
use crate::executor::{Executor, ExecutorTable, Payload, PayloadKind};
use crate::incident::{Incident, IncidentCode, IncidentKind};
use crate::registry::IncidentRegistry;
use crate::responder::{Outcome, ResponderAliasTable, ResponderHandle};
use crate::schedule::{ScheduleTarget, ScheduledTask, TaskHandle, TimeKeeper, SCHEDULED_ID};
use crate::strategy::Strategies;

type ErrorSink = Box<dyn FnMut(&ProcessError)>;

/// What one call to [`Processor::update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// Time captured at the start of the tick.
    pub now: i64,
    /// Tasks run this tick, including a failed one.
    pub executed: usize,
    /// Due tasks left for the next tick.
    pub deferred: usize,
    /// The task whose error stopped this tick.
    pub failed: Option<TaskHandle>,
}

/// Single-threaded incident and time scheduler.
///
/// Pass it by `&mut` to whatever needs to schedule or dispatch. Every
/// callback it runs receives it back, so responders can register, notify
/// and schedule from inside a dispatch.
pub struct Processor {
    pub(crate) registry: IncidentRegistry,
    pub(crate) aliases: ResponderAliasTable,
    pub(crate) clock: TimeKeeper,
    pub(crate) strategies: Strategies,
    executors: ExecutorTable,
    time_source: Box<dyn TimeSource>,
    error_sink: ErrorSink,
    next_responder: u64,
    update_counter: u64,
}

impl Processor {
    pub fn new(time_source: impl TimeSource + 'static) -> Self {
        Self::with_config(&ProcessorConfig::default(), time_source)
    }

    pub fn with_config(config: &ProcessorConfig, time_source: impl TimeSource + 'static) -> Self {
        Self {
            registry: IncidentRegistry::new(),
            aliases: ResponderAliasTable::default(),
            clock: TimeKeeper::new(config.max_time_processing_ms),
            strategies: Strategies::default(),
            executors: ExecutorTable::default(),
            time_source: Box::new(time_source),
            error_sink: Box::new(log_error),
            next_responder: 1,
            update_counter: 0,
        }
    }

    /// Build with the clock named by the config.
    pub fn from_config(config: &ProcessorConfig) -> Self {
        match config.clock {
            ClockKind::Monotonic => Self::with_config(config, MonotonicClock::new()),
            ClockKind::Utc => Self::with_config(config, UtcClock),
        }
    }

    /// Replace where tick errors are reported. The default logs them.
    pub fn set_error_sink<F>(&mut self, sink: F)
    where
        F: FnMut(&ProcessError) + 'static,
    {
        self.error_sink = Box::new(sink);
    }

    pub fn set_max_time_processing(&mut self, ms: i64) {
        self.clock.set_max_time_processing(ms);
    }

    pub fn register_executor(&mut self, kind: PayloadKind, executor: Executor) -> Option<Executor> {
        self.executors.register(kind, executor)
    }

    pub fn now(&self) -> i64 {
        self.time_source.now_ms()
    }

    /// Number of completed [`Processor::update`] calls.
    pub fn update_counter(&self) -> u64 {
        self.update_counter
    }

    pub fn registry(&self) -> &IncidentRegistry {
        &self.registry
    }

    pub fn time_keeper(&self) -> &TimeKeeper {
        &self.clock
    }

    pub(crate) fn next_responder_handle(&mut self) -> ResponderHandle {
        let handle = ResponderHandle::new(self.next_responder);
        self.next_responder += 1;
        handle
    }

    // -----------------------------------------------------------------------
    // Incident codes
    // -----------------------------------------------------------------------

    /// Code for `name`, created if needed.
    pub fn code(&mut self, name: &str) -> IncidentCode {
        self.registry.code_of(name, true)
    }

    pub fn code_of(&mut self, name: &str, create_if_absent: bool) -> IncidentCode {
        self.registry.code_of(name, create_if_absent)
    }

    pub fn incident_kinds(&self) -> &[IncidentKind] {
        self.registry.kinds()
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Process one tick: pull everything due before now and run it until an
    /// error occurs or the processing budget is spent.
    pub fn update(&mut self) -> TickSummary {
        let now = self.now();
        self.clock.pull_due(now);
        let deadline = now + self.clock.max_time_processing();

        let mut executed = 0;
        let mut failure = None;
        while let Some(task) = self.clock.pop_due() {
            executed += 1;
            let handle = task.handle;
            if let Err(source) = self.execute(&task) {
                failure = Some(ProcessError::Task { handle, source });
                break;
            }
            if self.now() >= deadline {
                break;
            }
        }

        let deferred = self.clock.due_len();
        if deferred > 0 && failure.is_none() {
            warn!(deferred, executed, "Tick budget spent, deferring due tasks");
        }
        let failed = match &failure {
            Some(ProcessError::Task { handle, .. }) => Some(*handle),
            _ => None,
        };
        if let Some(err) = &failure {
            (self.error_sink)(err);
        }
        self.update_counter += 1;

        TickSummary {
            now,
            executed,
            deferred,
            failed,
        }
    }

    /// Run a task's payload through the executor table.
    fn execute(&mut self, task: &ScheduledTask) -> Result<Outcome> {
        let kind = task.payload.kind();
        let executor = self
            .executors
            .get(kind)
            .cloned()
            .ok_or(ProcessError::NoExecutor(kind))?;
        executor(self, &task.payload, &task.incident)
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Schedule `payload` at an absolute time.
    pub fn schedule_at(&mut self, when: i64, payload: impl Into<Payload>) -> TaskHandle {
        self.add_to_schedule(Incident::new(when).with_identifier(SCHEDULED_ID), payload)
    }

    /// Schedule with a caller-built incident. Its timestamp and identifier
    /// decide where the task sorts.
    pub fn add_to_schedule(&mut self, incident: Incident, payload: impl Into<Payload>) -> TaskHandle {
        let task = self.clock.allocate(incident, payload.into());
        debug!(
            task = %task.handle,
            at = task.timestamp(),
            kind = task.payload.kind(),
            "Scheduled task"
        );
        self.clock.insert(task)
    }

    pub fn delay(&mut self, ms: i64, payload: impl Into<Payload>) -> TaskHandle {
        let when = self.now() + ms;
        self.schedule_at(when, payload)
    }

    /// Run on the next tick.
    pub fn enqueue(&mut self, payload: impl Into<Payload>) -> TaskHandle {
        self.delay(0, payload)
    }

    pub fn remove_scheduled(&mut self, target: impl Into<ScheduleTarget>) -> Option<ScheduledTask> {
        self.clock.remove(&target.into())
    }

    /// Move a task to `when`, keeping its handle. A target that is not
    /// scheduled but names a payload is scheduled fresh.
    pub fn reschedule(&mut self, target: impl Into<ScheduleTarget>, when: i64) -> Option<TaskHandle> {
        let target = target.into();
        match self.clock.remove(&target) {
            Some(mut task) => {
                task.incident = task.incident.retimed(when);
                Some(self.clock.insert(task))
            }
            None => target.into_payload().map(|p| self.schedule_at(when, p)),
        }
    }

    pub fn mark_as_background(&mut self, handle: TaskHandle) -> bool {
        self.clock.mark_as_background(handle)
    }

    pub fn next_needing_service(&self) -> Option<&ScheduledTask> {
        self.clock.next_needing_service(self.now())
    }

    /// Call `action` with values from `start` to `end` spread over
    /// `duration_ms`: once now, then `steps` more times.
    pub fn lerp<F>(&mut self, action: F, duration_ms: i64, steps: u32, start: f32, end: f32)
    where
        F: Fn(&mut Processor, f32) + 'static,
    {
        let lerp = Rc::new(Lerp {
            action: Box::new(action),
            started: self.now(),
            duration_ms,
            steps: steps.max(1),
            start,
            end,
        });
        lerp_step(self, lerp, 0);
    }
}

struct Lerp {
    action: Box<dyn Fn(&mut Processor, f32)>,
    started: i64,
    duration_ms: i64,
    steps: u32,
    start: f32,
    end: f32,
}

fn lerp_step(processor: &mut Processor, lerp: Rc<Lerp>, iteration: u32) {
    let progress = lerp.start + (lerp.end - lerp.start) * iteration as f32 / lerp.steps as f32;
    (lerp.action)(processor, progress);
    if iteration < lerp.steps {
        let next = iteration + 1;
        let when = lerp.started + lerp.duration_ms * i64::from(next) / i64::from(lerp.steps);
        processor.schedule_at(
            when,
            Payload::action(move |p| {
                lerp_step(p, lerp.clone(), next);
                Ok(())
            }),
        );
    }
}

fn log_error(err: &ProcessError) {
    match err {
        ProcessError::Task { handle, source } => {
            error!(task = %handle, error = %format!("{source:#}"), "Scheduled task failed");
        }
        other => warn!(error = %other, "Processor error"),
    }
}
