//! Schedulable payloads and the table that knows how to run each kind.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use anyhow::Result;

use crate::incident::{Incident, IncidentCode};
use crate::processor::Processor;
use crate::responder::{Outcome, Responder};
use crate::strategy::StrategyId;

/// Stable discriminant of a payload, used as the executor table key.
pub type PayloadKind = &'static str;

/// Zero-argument scheduled callback.
pub type Action = Rc<dyn Fn(&mut Processor) -> Result<()>>;

/// Runs one payload. Receives the payload's own scheduled incident.
pub type Executor = Rc<dyn Fn(&mut Processor, &Payload, &Incident) -> Result<Outcome>>;

/// Work the schedule can hold.
#[derive(Clone)]
pub enum Payload {
    /// Fire an incident by code.
    Trigger(IncidentCode),
    /// Fire an incident by name, creating the code if needed.
    Named(String),
    Action(Action),
    Responder(Responder),
    /// Run a strategy chain from this node.
    Strategy(StrategyId),
    /// Finish a strategy node that was waiting on a delay.
    Resume(StrategyId),
    /// Host-defined payload; needs an executor registered for its kind.
    Custom(CustomPayload),
}

impl Payload {
    pub const TRIGGER: PayloadKind = "trigger";
    pub const NAMED: PayloadKind = "named";
    pub const ACTION: PayloadKind = "action";
    pub const RESPONDER: PayloadKind = "responder";
    pub const STRATEGY: PayloadKind = "strategy";
    pub const RESUME: PayloadKind = "resume";

    pub fn action<F>(f: F) -> Self
    where
        F: Fn(&mut Processor) -> Result<()> + 'static,
    {
        Self::Action(Rc::new(f))
    }

    pub fn responder<F>(f: F) -> Self
    where
        F: Fn(&mut Processor, &Incident) -> Result<Outcome> + 'static,
    {
        Self::Responder(Rc::new(f))
    }

    pub fn custom<T: Any>(kind: PayloadKind, value: T) -> Self {
        Self::Custom(CustomPayload {
            kind,
            value: Rc::new(value),
        })
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Trigger(_) => Self::TRIGGER,
            Self::Named(_) => Self::NAMED,
            Self::Action(_) => Self::ACTION,
            Self::Responder(_) => Self::RESPONDER,
            Self::Strategy(_) => Self::STRATEGY,
            Self::Resume(_) => Self::RESUME,
            Self::Custom(c) => c.kind,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trigger(code) => f.debug_tuple("Trigger").field(code).finish(),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Action(_) => f.write_str("Action(..)"),
            Self::Responder(_) => f.write_str("Responder(..)"),
            Self::Strategy(id) => f.debug_tuple("Strategy").field(id).finish(),
            Self::Resume(id) => f.debug_tuple("Resume").field(id).finish(),
            Self::Custom(c) => f.debug_tuple("Custom").field(&c.kind).finish(),
        }
    }
}

impl From<IncidentCode> for Payload {
    fn from(code: IncidentCode) -> Self {
        Self::Trigger(code)
    }
}

impl From<&str> for Payload {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for Payload {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<StrategyId> for Payload {
    fn from(id: StrategyId) -> Self {
        Self::Strategy(id)
    }
}

impl From<Responder> for Payload {
    fn from(responder: Responder) -> Self {
        Self::Responder(responder)
    }
}

impl From<Action> for Payload {
    fn from(action: Action) -> Self {
        Self::Action(action)
    }
}

/// Opaque host value tagged with the kind its executor is registered under.
#[derive(Clone)]
pub struct CustomPayload {
    kind: PayloadKind,
    value: Rc<dyn Any>,
}

impl CustomPayload {
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

/// Payload kind → executor. Built-in kinds are registered on construction;
/// hosts add their own with [`ExecutorTable::register`].
pub struct ExecutorTable {
    executors: HashMap<PayloadKind, Executor>,
}

impl ExecutorTable {
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: PayloadKind, executor: Executor) -> Option<Executor> {
        self.executors.insert(kind, executor)
    }

    pub fn get(&self, kind: PayloadKind) -> Option<&Executor> {
        self.executors.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = PayloadKind> + '_ {
        self.executors.keys().copied()
    }
}

impl Default for ExecutorTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.register(Payload::TRIGGER, Rc::new(run_trigger));
        table.register(Payload::NAMED, Rc::new(run_named));
        table.register(Payload::ACTION, Rc::new(run_action));
        table.register(Payload::RESPONDER, Rc::new(run_responder));
        table.register(Payload::STRATEGY, Rc::new(run_strategy));
        table.register(Payload::RESUME, Rc::new(run_resume));
        table
    }
}

// ---------------------------------------------------------------------------
// Built-in executors
// ---------------------------------------------------------------------------

fn run_trigger(processor: &mut Processor, payload: &Payload, incident: &Incident) -> Result<Outcome> {
    if let Payload::Trigger(code) = payload {
        processor.notify(*code, incident)?;
    }
    Ok(Outcome::Success)
}

fn run_named(processor: &mut Processor, payload: &Payload, incident: &Incident) -> Result<Outcome> {
    if let Payload::Named(name) = payload {
        processor.notify_named(name, incident)?;
    }
    Ok(Outcome::Success)
}

fn run_action(processor: &mut Processor, payload: &Payload, _incident: &Incident) -> Result<Outcome> {
    if let Payload::Action(action) = payload {
        action(processor)?;
    }
    Ok(Outcome::Success)
}

fn run_responder(processor: &mut Processor, payload: &Payload, incident: &Incident) -> Result<Outcome> {
    match payload {
        Payload::Responder(responder) => responder(processor, incident),
        _ => Ok(Outcome::Success),
    }
}

fn run_strategy(processor: &mut Processor, payload: &Payload, incident: &Incident) -> Result<Outcome> {
    match payload {
        Payload::Strategy(id) => Ok(processor.invoke_chain(*id, incident)),
        _ => Ok(Outcome::Success),
    }
}

fn run_resume(processor: &mut Processor, payload: &Payload, incident: &Incident) -> Result<Outcome> {
    match payload {
        Payload::Resume(id) => Ok(processor.resume(*id, incident)),
        _ => Ok(Outcome::Success),
    }
}
