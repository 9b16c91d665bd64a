//! Firing incidents and (de)registering responders.

use std::cell::Cell;
use std::rc::Rc;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ProcessError, ProcessResult};
use crate::incident::{Incident, IncidentCode};
use crate::processor::Processor;
use crate::responder::{Outcome, Responder, ResponderEntry, ResponderHandle, ResponderKey};
use crate::strategy::StrategyId;

impl Processor {
    /// Fire `code`: every responder registered right now runs, in
    /// registration order. Registrations made or removed by those responders
    /// only affect later fires. An invalid code has no responders.
    ///
    /// The first responder error stops the dispatch and is returned.
    pub fn notify(&mut self, code: IncidentCode, incident: &Incident) -> Result<()> {
        let responders = self.registry.snapshot(code);
        self.registry.record_fire(code);
        for responder in responders {
            responder(self, incident)?;
        }
        Ok(())
    }

    /// Fire `code` with a fresh incident stamped now.
    pub fn notify_now(&mut self, code: IncidentCode, source: Value, detail: Value) -> Result<()> {
        let incident = Incident::new(self.now())
            .with_source(source)
            .with_detail(detail);
        self.notify(code, &incident)
    }

    /// Fire by name, creating the code if needed.
    pub fn notify_named(&mut self, name: &str, incident: &Incident) -> Result<()> {
        let code = self.code(name);
        self.notify(code, incident)
    }

    /// Register `responder` on `code`.
    ///
    /// A negative `count` registers it permanently; zero does nothing. A
    /// positive `count` lets it run that many times, then removes it. After
    /// the last permitted run, `on_last` runs too if that run succeeded.
    pub fn on_incident(
        &mut self,
        code: IncidentCode,
        responder: Responder,
        count: i32,
        on_last: Option<Responder>,
    ) -> ProcessResult<ResponderHandle> {
        if !self.registry.is_valid(code) {
            return Err(ProcessError::UnknownIncident(code));
        }
        let handle = self.next_responder_handle();
        if count == 0 {
            return Ok(handle);
        }
        let responder = if count < 0 {
            responder
        } else {
            counted(code, handle, responder, count, on_last)
        };
        self.registry.push(code, ResponderEntry { handle, responder });
        debug!(code = code.value(), %handle, count, "Registered responder");
        Ok(handle)
    }

    /// Register `responder` on `code` for as long as it returns
    /// [`Outcome::Halt`]. The first other result removes it and runs
    /// `on_finish` once.
    pub fn while_incident(
        &mut self,
        code: IncidentCode,
        responder: Responder,
        on_finish: Responder,
    ) -> ProcessResult<ResponderHandle> {
        if !self.registry.is_valid(code) {
            return Err(ProcessError::UnknownIncident(code));
        }
        let handle = self.next_responder_handle();
        let finished = Cell::new(false);
        let wrapped: Responder = Rc::new(move |p: &mut Processor, incident: &Incident| {
            if finished.get() {
                return Ok(Outcome::Halt);
            }
            match responder(p, incident)? {
                Outcome::Halt => Ok(Outcome::Halt),
                Outcome::Success | Outcome::Failure => {
                    finished.set(true);
                    p.registry.remove(code, handle);
                    on_finish(p, incident)?;
                    Ok(Outcome::Success)
                }
            }
        });
        self.registry.push(
            code,
            ResponderEntry {
                handle,
                responder: wrapped,
            },
        );
        debug!(code = code.value(), %handle, "Registered while-responder");
        Ok(handle)
    }

    /// Register a responder that runs `strategy` as a chain. Removable with
    /// [`Processor::remove_incident`] by presenting the strategy.
    pub fn on_incident_strategy(
        &mut self,
        code: IncidentCode,
        strategy: StrategyId,
        count: i32,
    ) -> ProcessResult<ResponderHandle> {
        let run: Responder = Rc::new(move |p: &mut Processor, incident: &Incident| {
            Ok(p.invoke_chain(strategy, incident))
        });
        let handle = self.on_incident(code, run, count, None)?;
        self.aliases.alias(ResponderKey::Strategy(strategy), code, handle);
        Ok(handle)
    }

    /// Remove a registration. Tries the key as a handle first, then whatever
    /// is aliased under it. Returns whether anything was removed.
    ///
    /// # Panics
    ///
    /// Panics if `code` is out of range for this processor.
    pub fn remove_incident(&mut self, code: IncidentCode, key: impl Into<ResponderKey>) -> bool {
        let key = key.into();
        let mut removed = match key {
            ResponderKey::Handle(handle) => self.registry.remove(code, handle),
            ResponderKey::Strategy(_) => false,
        };
        if !removed {
            for alias in self.aliases.take(key, code) {
                removed |= self.registry.remove(code, alias);
            }
        }
        removed
    }

    /// Registration-order index of `handle`, if still registered.
    pub fn response_index(&self, code: IncidentCode, handle: ResponderHandle) -> Option<usize> {
        self.registry.position(code, handle)
    }
}

/// Wrap `responder` so it runs `count` times and then removes itself.
fn counted(
    code: IncidentCode,
    handle: ResponderHandle,
    responder: Responder,
    count: i32,
    on_last: Option<Responder>,
) -> Responder {
    let remaining = Cell::new(count);
    Rc::new(move |p: &mut Processor, incident: &Incident| {
        let left = remaining.get();
        if left <= 0 {
            warn!(code = code.value(), %handle, "Counted responder invoked after its last run");
            return Ok(Outcome::Halt);
        }
        let result = responder(p, incident)?;
        remaining.set(left - 1);
        if left > 1 {
            return Ok(result);
        }
        let finished = match (&on_last, result) {
            (Some(on_last), Outcome::Success) => on_last(p, incident),
            _ => Ok(result),
        };
        p.registry.remove(code, handle);
        finished
    })
}
