//! Responders, their handles, and the alias table used to remove them.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::incident::{Incident, IncidentCode};
use crate::processor::Processor;
use crate::strategy::StrategyId;

/// What a responder or strategy step reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Execution ended successfully.
    Success,
    /// Execution did not end successfully.
    Failure,
    /// Execution halted; do not continue the current strategy.
    Halt,
}

/// Canonical callback form. An `Err` plays the role of a thrown exception.
pub type Responder = Rc<dyn Fn(&mut Processor, &Incident) -> Result<Outcome>>;

/// Wrap a closure into a [`Responder`].
pub fn responder<F>(f: F) -> Responder
where
    F: Fn(&mut Processor, &Incident) -> Result<Outcome> + 'static,
{
    Rc::new(f)
}

/// Normalise a callback that ignores the incident. Always reports success.
pub fn from_action<F>(f: F) -> Responder
where
    F: Fn(&mut Processor) + 'static,
{
    Rc::new(move |processor: &mut Processor, _incident: &Incident| {
        f(processor);
        Ok(Outcome::Success)
    })
}

/// Normalise a callback that consumes the incident. Always reports success.
pub fn from_consumer<F>(f: F) -> Responder
where
    F: Fn(&mut Processor, &Incident) + 'static,
{
    Rc::new(move |processor: &mut Processor, incident: &Incident| {
        f(processor, incident);
        Ok(Outcome::Success)
    })
}

/// Token returned by every responder registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResponderHandle(u64);

impl ResponderHandle {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ResponderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "responder#{}", self.0)
    }
}

/// One slot in a code's responder list.
#[derive(Clone)]
pub(crate) struct ResponderEntry {
    pub(crate) handle: ResponderHandle,
    pub(crate) responder: Responder,
}

/// What a caller presents to remove a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponderKey {
    Handle(ResponderHandle),
    Strategy(StrategyId),
}

impl From<ResponderHandle> for ResponderKey {
    fn from(handle: ResponderHandle) -> Self {
        Self::Handle(handle)
    }
}

impl From<StrategyId> for ResponderKey {
    fn from(id: StrategyId) -> Self {
        Self::Strategy(id)
    }
}

/// Registrations made on behalf of something else.
///
/// A strategy that waits on an incident registers a wrapper responder; the
/// wrapper's handle is recorded here under the strategy so it can later be
/// removed by presenting the strategy instead of the handle.
#[derive(Debug, Default)]
pub struct ResponderAliasTable {
    aliases: HashMap<ResponderKey, Vec<(IncidentCode, ResponderHandle)>>,
}

impl ResponderAliasTable {
    pub fn alias(&mut self, key: ResponderKey, code: IncidentCode, handle: ResponderHandle) {
        self.aliases.entry(key).or_default().push((code, handle));
    }

    pub fn lookup(&self, key: ResponderKey) -> &[(IncidentCode, ResponderHandle)] {
        self.aliases.get(&key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Remove and return the handles aliased under `key` for one code.
    pub fn take(&mut self, key: ResponderKey, code: IncidentCode) -> Vec<ResponderHandle> {
        let Some(entries) = self.aliases.get_mut(&key) else {
            return Vec::new();
        };
        let mut taken = Vec::new();
        entries.retain(|(c, h)| {
            if *c == code {
                taken.push(*h);
                false
            } else {
                true
            }
        });
        if entries.is_empty() {
            self.aliases.remove(&key);
        }
        taken
    }

    /// Remove and return every registration aliased under `key`.
    pub fn take_all(&mut self, key: ResponderKey) -> Vec<(IncidentCode, ResponderHandle)> {
        self.aliases.remove(&key).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.aliases.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
