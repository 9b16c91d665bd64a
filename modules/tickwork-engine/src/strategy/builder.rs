//! Fluent construction of strategy chains.

use std::rc::Rc;

use super::{Candidate, ErrorMatcher, Step, StrategyId, StrategyNode, INCIDENT_CODE_ID};
use crate::incident::{Incident, IncidentCode};
use crate::processor::Processor;
use crate::responder::{Outcome, Responder};

impl Processor {
    /// Create a node on its own, not linked to anything.
    pub fn strategy(&mut self, identifier: impl Into<String>, procedure: Option<Responder>) -> StrategyId {
        self.strategies
            .push(StrategyNode::new(identifier, procedure, Step::Immediate))
    }

    /// Start a new chain whose first node runs `procedure`.
    pub fn chain(&mut self, identifier: impl Into<String>, procedure: Responder) -> ChainBuilder<'_> {
        let root = self.strategy(identifier, Some(procedure));
        ChainBuilder {
            processor: self,
            root,
            cursor: root,
        }
    }

    /// Keep appending to the chain that contains `id`.
    pub fn extend(&mut self, id: StrategyId) -> ChainBuilder<'_> {
        let root = self.strategies.root(id);
        let cursor = self.strategies.last(id);
        ChainBuilder {
            processor: self,
            root,
            cursor,
        }
    }

    /// A node that fires `code` with the incident it is invoked with.
    pub fn strategy_for_incident(&mut self, code: IncidentCode) -> StrategyId {
        let fire: Responder = Rc::new(move |p: &mut Processor, incident: &Incident| {
            p.notify(code, incident)?;
            Ok(Outcome::Success)
        });
        self.strategy(INCIDENT_CODE_ID, Some(fire))
    }
}

/// Fluent construction of a strategy chain.
///
/// Each `then_*` call appends a node at the end of the chain and moves the
/// cursor onto it; [`ChainBuilder::with_merit`] and
/// [`ChainBuilder::only_on_positive_merit`] tune the node under the cursor.
pub struct ChainBuilder<'p> {
    processor: &'p mut Processor,
    root: StrategyId,
    cursor: StrategyId,
}

impl<'p> ChainBuilder<'p> {
    fn append(mut self, node: StrategyNode) -> Self {
        let strategies = &mut self.processor.strategies;
        let tail = strategies.last(self.cursor);
        let id = strategies.push(node);
        strategies.link(tail, id);
        self.cursor = id;
        self
    }

    pub fn then_immediately(self, identifier: impl Into<String>, procedure: Responder) -> Self {
        self.append(StrategyNode::new(identifier, Some(procedure), Step::Immediate))
    }

    /// Like [`ChainBuilder::then_immediately`], but the node runs on the tick
    /// after the previous one finishes.
    pub fn and_then(self, identifier: impl Into<String>, procedure: Responder) -> Self {
        let mut node = StrategyNode::new(identifier, Some(procedure), Step::Immediate);
        node.wait_for_update = true;
        self.append(node)
    }

    /// Wait for `count` fires of `code`, running `procedure` on each. The
    /// chain continues after the last one succeeds.
    pub fn then_on_incident(self, code: IncidentCode, procedure: Option<Responder>, count: i32) -> Self {
        let identifier = format!("(defer){}", self.code_name(code));
        self.append(StrategyNode::new(identifier, procedure, Step::OnIncident { code, count }))
    }

    /// Run `procedure` on every fire of `code` while it returns
    /// [`Outcome::Halt`]; continue once it returns anything else.
    pub fn then_while_incident(self, code: IncidentCode, procedure: Responder) -> Self {
        let identifier = format!("(while){}", self.code_name(code));
        self.append(StrategyNode::new(identifier, Some(procedure), Step::WhileIncident { code }))
    }

    pub fn then_delay(self, identifier: &str, ms: i64, procedure: Option<Responder>) -> Self {
        let identifier = format!("(wait){identifier}");
        self.append(StrategyNode::new(identifier, procedure, Step::Delay { ms }))
    }

    /// Run whichever candidate chain has the greatest merit, then carry on
    /// with the rest of this chain. Candidates are taken by their roots.
    pub fn then_decide_best_choice(self, identifier: &str, candidates: &[StrategyId]) -> Self {
        let candidates = self.candidates(candidates);
        let identifier = format!("(auto decide){identifier}");
        self.append(StrategyNode::new(identifier, None, Step::DecideBest { candidates }))
    }

    /// Run the first candidate chain with positive merit.
    pub fn then_decide_first_choice(self, identifier: &str, candidates: &[StrategyId]) -> Self {
        let candidates = self.candidates(candidates);
        let identifier = format!("(first decide){identifier}");
        self.append(StrategyNode::new(identifier, None, Step::DecideFirst { candidates }))
    }

    /// Race `options`: whichever incident arrives first with a successful
    /// responder wins, and the others are dropped.
    pub fn then_do_first_incident(self, identifier: &str, options: Vec<(IncidentCode, Responder)>) -> Self {
        let identifier = format!("(incident decide){identifier}");
        self.append(StrategyNode::new(identifier, None, Step::FirstIncident { options }))
    }

    /// Handle errors of type `E` raised earlier in the chain.
    pub fn catch<E>(self, procedure: Responder) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.catch_matching(ErrorMatcher::of::<E>(), procedure)
    }

    pub fn catch_any(self, procedure: Responder) -> Self {
        self.catch_matching(ErrorMatcher::any(), procedure)
    }

    pub fn catch_matching(self, matcher: ErrorMatcher, procedure: Responder) -> Self {
        let identifier = format!("catch {}", matcher.type_name());
        self.append(StrategyNode::new(identifier, Some(procedure), Step::Catch(matcher)))
    }

    /// Runs in normal flow and after any error raised before it.
    pub fn finally(self, procedure: Responder) -> Self {
        self.append(StrategyNode::new("finally", Some(procedure), Step::Finally))
    }

    pub fn with_merit<F>(self, heuristic: F) -> Self
    where
        F: Fn() -> f32 + 'static,
    {
        self.processor.set_merit_heuristic(self.cursor, Rc::new(heuristic));
        self
    }

    /// Skip the node under the cursor unless its merit is positive.
    pub fn only_on_positive_merit(self) -> Self {
        self.processor
            .set_only_execute_on_positive_merit(self.cursor, true);
        self
    }

    pub fn cursor(&self) -> StrategyId {
        self.cursor
    }

    pub fn root(&self) -> StrategyId {
        self.root
    }

    /// Finish building and return the chain's root.
    pub fn build(self) -> StrategyId {
        self.root
    }

    fn code_name(&self, code: IncidentCode) -> String {
        self.processor
            .registry
            .name_of(code)
            .map(str::to_string)
            .unwrap_or_else(|| code.to_string())
    }

    fn candidates(&self, ids: &[StrategyId]) -> Vec<Candidate> {
        let strategies = &self.processor.strategies;
        ids.iter()
            .map(|&id| Candidate {
                root: strategies.root(id),
                tail: strategies.last(id),
            })
            .collect()
    }
}
