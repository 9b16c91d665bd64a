//! Cooperative incident and time scheduling.
//!
//! A [`Processor`] owns three things: a registry of named incidents with
//! ordered responder lists, a time-ordered schedule of deferred work, and an
//! arena of strategy chains that sequence steps across incidents and ticks.
//! The host supplies a [`TimeSource`] and calls [`Processor::update`] once
//! per cycle; nothing else advances time.
//!
//! Everything is single-threaded. Callbacks receive `&mut Processor` so they
//! can register, notify and schedule from inside a dispatch.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod incident;
pub mod processor;
pub mod registry;
pub mod responder;
pub mod schedule;
pub mod strategy;

pub use clock::{ManualClock, MonotonicClock, TimeSource, UtcClock};
pub use config::{ClockKind, ProcessorConfig};
pub use error::ProcessError;
pub use executor::{Action, CustomPayload, Executor, ExecutorTable, Payload, PayloadKind};
pub use incident::{Incident, IncidentCode, IncidentKind};
pub use processor::{Processor, TickSummary};
pub use registry::IncidentRegistry;
pub use responder::{
    from_action, from_consumer, responder, Outcome, Responder, ResponderAliasTable,
    ResponderHandle, ResponderKey,
};
pub use schedule::{ScheduleTarget, ScheduledTask, TaskHandle, TimeKeeper};
pub use strategy::{ChainBuilder, ErrorMatcher, MeritHeuristic, StrategyId, StrategyNode};
