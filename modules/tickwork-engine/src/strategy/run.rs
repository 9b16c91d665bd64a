//! Running strategy chains on a processor.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, error};

use super::{Candidate, MeritHeuristic, Step, StrategyId, StrategyNode, EXCEPTION_ID};
use crate::executor::Payload;
use crate::incident::{Incident, IncidentCode};
use crate::processor::Processor;
use crate::responder::{Outcome, Responder, ResponderHandle, ResponderKey};
use crate::schedule::ScheduleTarget;

impl Processor {
    /// Run `id`, then keep going down the chain while steps succeed.
    pub fn invoke_chain(&mut self, id: StrategyId, incident: &Incident) -> Outcome {
        let result = self.invoke(id, incident);
        if result != Outcome::Success || self.strategies.get(id).next.is_none() {
            return result;
        }
        self.continue_chain(id, incident)
    }

    /// Move on to the node after `id` without running `id` itself. A next
    /// node that waits for an update is scheduled for the following tick.
    pub fn continue_chain(&mut self, id: StrategyId, incident: &Incident) -> Outcome {
        let Some(next) = self.strategies.get(id).next else {
            return Outcome::Success;
        };
        if !self.strategies.get(next).wait_for_update {
            return self.invoke_chain(next, incident);
        }
        let resumed = incident.retimed(self.now());
        self.add_to_schedule(resumed, Payload::Strategy(next));
        Outcome::Success
    }

    /// Run `id` alone, without continuing.
    ///
    /// Catch nodes never run here, and merit-gated nodes with no positive
    /// merit are skipped; both report success so the chain moves on.
    /// Waiting nodes register their wait and report [`Outcome::Halt`].
    pub fn invoke(&mut self, id: StrategyId, incident: &Incident) -> Outcome {
        let node = self.strategies.get(id);
        if node.is_exception_handler() || !node.allowed_on_merit() {
            return Outcome::Success;
        }
        match node.step.clone() {
            Step::Immediate | Step::Finally | Step::Catch(_) => self.invoke_internal(id, incident),
            step => match self.suspend(id, step, incident) {
                Ok(outcome) => outcome,
                Err(err) => self.fail(id, err, incident),
            },
        }
    }

    /// Second half of a delayed node: run its procedure, then continue.
    pub(crate) fn resume(&mut self, id: StrategyId, incident: &Incident) -> Outcome {
        let result = self.run_deferred(id, incident);
        if result != Outcome::Success || self.strategies.get(id).next.is_none() {
            return result;
        }
        self.continue_chain(id, incident)
    }

    /// The procedure of a waiting node, run when its event arrives.
    fn run_deferred(&mut self, id: StrategyId, incident: &Incident) -> Outcome {
        if !self.strategies.get(id).allowed_on_merit() {
            return Outcome::Success;
        }
        self.invoke_internal(id, incident)
    }

    fn invoke_internal(&mut self, id: StrategyId, incident: &Incident) -> Outcome {
        let Some(procedure) = self.strategies.get(id).procedure.clone() else {
            return Outcome::Success;
        };
        match procedure(self, incident) {
            Ok(outcome) => outcome,
            Err(err) => self.fail(id, err, incident),
        }
    }

    fn fail(&mut self, id: StrategyId, err: anyhow::Error, incident: &Incident) -> Outcome {
        error!(
            strategy = self.strategies.get(id).identifier.as_str(),
            error = %format!("{err:#}"),
            "Strategy step failed"
        );
        self.handle_exception(id, err, incident);
        Outcome::Halt
    }

    /// Route an error raised at `id` to the chain's handlers.
    ///
    /// The incident handed to the handlers carries the matching catch node's
    /// declared type name as its identifier, or [`EXCEPTION_ID`] when no catch
    /// node matched. A [`catch_any`](super::ChainBuilder::catch_any) node
    /// reports `"Error"`: the concrete type behind an [`anyhow::Error`] is not
    /// recoverable there, and only the incident detail holds its text.
    ///
    /// A finally node that comes before the matching catch node runs first,
    /// then the catch node, then the next finally node after the catch node
    /// (or after `id` when nothing matched).
    pub fn handle_exception(&mut self, id: StrategyId, err: anyhow::Error, incident: &Incident) {
        let handler = self.strategies.next_exception_handler(id, &err);
        let type_name = handler
            .and_then(|h| self.strategies.get(h).error_matcher().map(|m| m.type_name()))
            .unwrap_or(EXCEPTION_ID);
        let node = self.strategies.get(id);
        let source = match incident.identifier() {
            Some(name) => format!("{}: {name}", node.identifier),
            None => node.identifier.clone(),
        };
        let exception = Incident::new(self.now())
            .with_identifier(type_name)
            .with_source(json!(source))
            .with_detail(json!(format!("{err:#}")));

        if let Some(finally) = self.strategies.next_finally_handler(id) {
            if self.strategies.has_future(finally, handler) {
                self.invoke_internal(finally, &exception);
            }
        }
        if let Some(handler) = handler {
            self.invoke_internal(handler, &exception);
        }
        let from = handler.unwrap_or(id);
        if let Some(finally) = self.strategies.next_finally_handler(from) {
            self.invoke_internal(finally, &exception);
        }
    }

    fn suspend(&mut self, id: StrategyId, step: Step, incident: &Incident) -> Result<Outcome> {
        match step {
            Step::OnIncident { code, count } => {
                self.prune_aliases(id);
                let handle =
                    self.on_incident(code, deferred(id), count, Some(continuation(id)))?;
                self.aliases.alias(ResponderKey::Strategy(id), code, handle);
                Ok(Outcome::Halt)
            }
            Step::WhileIncident { code } => {
                self.prune_aliases(id);
                let handle = self.while_incident(code, deferred(id), continuation(id))?;
                self.aliases.alias(ResponderKey::Strategy(id), code, handle);
                Ok(Outcome::Halt)
            }
            Step::Delay { ms } => {
                self.delay(ms, Payload::Resume(id));
                Ok(Outcome::Halt)
            }
            Step::DecideBest { candidates } => {
                let choice = self.strategies.pick_best(&Candidate::roots(&candidates));
                Ok(self.splice_and_run(id, &candidates, choice, incident))
            }
            Step::DecideFirst { candidates } => {
                let choice = self.strategies.pick_first_positive(&Candidate::roots(&candidates));
                Ok(self.splice_and_run(id, &candidates, choice, incident))
            }
            Step::FirstIncident { options } => {
                self.prune_aliases(id);
                self.race(id, options)?;
                Ok(Outcome::Halt)
            }
            Step::Immediate | Step::Finally | Step::Catch(_) => Ok(self.invoke_internal(id, incident)),
        }
    }

    /// Attach the chosen candidate's tail to whatever followed `id` and run it.
    fn splice_and_run(
        &mut self,
        id: StrategyId,
        candidates: &[Candidate],
        choice: Option<StrategyId>,
        incident: &Incident,
    ) -> Outcome {
        let Some(candidate) = choice.and_then(|root| candidates.iter().find(|c| c.root == root)) else {
            debug!(strategy = self.strategies.get(id).identifier.as_str(), "No candidate with positive merit");
            return Outcome::Failure;
        };
        let (choice, tail) = (candidate.root, candidate.tail);
        let continuation = self.strategies.get(id).next;
        self.strategies.get_mut(tail).next = continuation;
        debug!(
            strategy = self.strategies.get(id).identifier.as_str(),
            choice = self.strategies.get(choice).identifier.as_str(),
            "Decided"
        );
        self.invoke_chain(choice, incident);
        Outcome::Halt
    }

    /// Register every option once; the first that succeeds removes the rest
    /// and continues the chain.
    fn race(&mut self, id: StrategyId, options: Vec<(IncidentCode, Responder)>) -> Result<()> {
        let finished = Rc::new(Cell::new(false));
        let registered: Rc<RefCell<Vec<(IncidentCode, ResponderHandle)>>> = Rc::default();
        let done: Responder = {
            let registered = registered.clone();
            Rc::new(move |p: &mut Processor, incident: &Incident| {
                if finished.replace(true) {
                    return Ok(Outcome::Halt);
                }
                let competitors = registered.borrow().clone();
                for (code, handle) in competitors {
                    p.remove_incident(code, handle);
                }
                Ok(p.continue_chain(id, incident))
            })
        };
        for (code, option) in options {
            let handle = self.on_incident(code, option, 1, Some(done.clone()))?;
            registered.borrow_mut().push((code, handle));
            self.aliases.alias(ResponderKey::Strategy(id), code, handle);
        }
        Ok(())
    }

    /// Forget aliases of `id` whose registrations already removed themselves.
    fn prune_aliases(&mut self, id: StrategyId) {
        let key = ResponderKey::Strategy(id);
        let live: Vec<_> = self
            .aliases
            .take_all(key)
            .into_iter()
            .filter(|(code, handle)| self.registry.position(*code, *handle).is_some())
            .collect();
        for (code, handle) in live {
            self.aliases.alias(key, code, handle);
        }
    }

    /// Drop pending registrations and scheduled runs made for `id`.
    /// Returns how many were removed.
    pub fn clear_events(&mut self, id: StrategyId) -> usize {
        let mut cleared = 0;
        for (code, handle) in self.aliases.take_all(ResponderKey::Strategy(id)) {
            if self.registry.remove(code, handle) {
                cleared += 1;
            }
        }
        let target = ScheduleTarget::Strategy(id);
        while self.clock.remove(&target).is_some() {
            cleared += 1;
        }
        cleared
    }

    /// [`Processor::clear_events`] for `id` and every node after it.
    pub fn clear_all_events(&mut self, id: StrategyId) -> usize {
        self.strategies
            .list(id)
            .into_iter()
            .map(|node| self.clear_events(node))
            .sum()
    }

    // -----------------------------------------------------------------------
    // Inspection and tuning
    // -----------------------------------------------------------------------

    pub fn strategy_node(&self, id: StrategyId) -> &StrategyNode {
        self.strategies.get(id)
    }

    pub fn strategy_root(&self, id: StrategyId) -> StrategyId {
        self.strategies.root(id)
    }

    pub fn strategy_last(&self, id: StrategyId) -> StrategyId {
        self.strategies.last(id)
    }

    pub fn list_strategies(&self, id: StrategyId) -> Vec<StrategyId> {
        self.strategies.list(id)
    }

    pub fn next_finally_handler(&self, id: StrategyId) -> Option<StrategyId> {
        self.strategies.next_finally_handler(id)
    }

    pub fn next_exception_handler(&self, id: StrategyId, err: &anyhow::Error) -> Option<StrategyId> {
        self.strategies.next_exception_handler(id, err)
    }

    pub fn has_future_strategy(&self, id: StrategyId, target: StrategyId) -> bool {
        self.strategies.has_future(id, Some(target))
    }

    pub fn set_merit_heuristic(&mut self, id: StrategyId, heuristic: MeritHeuristic) {
        self.strategies.get_mut(id).merit_heuristic = Some(heuristic);
    }

    pub fn set_only_execute_on_positive_merit(&mut self, id: StrategyId, only: bool) {
        self.strategies.get_mut(id).only_execute_on_positive_merit = only;
    }
}

fn deferred(id: StrategyId) -> Responder {
    Rc::new(move |p: &mut Processor, incident: &Incident| Ok(p.run_deferred(id, incident)))
}

fn continuation(id: StrategyId) -> Responder {
    Rc::new(move |p: &mut Processor, incident: &Incident| Ok(p.continue_chain(id, incident)))
}
