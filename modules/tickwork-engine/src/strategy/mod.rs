//! Strategy chains: linked steps with immediate, deferred and
//! incident-driven continuation, merit-based choice and error handlers.
//!
//! Nodes live in an arena owned by the [`Processor`](crate::Processor) and
//! link to each other by [`StrategyId`]. Build chains with
//! [`ChainBuilder`]; run them with
//! [`Processor::invoke_chain`](crate::Processor::invoke_chain).

mod builder;
mod run;

pub use builder::ChainBuilder;

use std::fmt;
use std::rc::Rc;

use crate::incident::IncidentCode;
use crate::responder::Responder;

/// Index of a node in the processor's strategy arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrategyId(usize);

impl StrategyId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strategy#{}", self.0)
    }
}

/// Desirability score. Zero or less means "do not run".
pub type MeritHeuristic = Rc<dyn Fn() -> f32>;

/// Merit of a node without a heuristic: positive, but loses to any real score.
pub const MINIMUM_MERIT: f32 = f32::MIN_POSITIVE;

/// Identifier carried by the incident handed to handlers when no catch node
/// matched the error.
pub const EXCEPTION_ID: &str = "Exception";

/// Identifier of nodes that fire an incident code.
pub const INCIDENT_CODE_ID: &str = "IncidentCode";

/// Decides whether a catch node handles an error.
#[derive(Clone, Copy)]
pub struct ErrorMatcher {
    type_name: &'static str,
    matches: fn(&anyhow::Error) -> bool,
}

impl ErrorMatcher {
    /// Matches errors that downcast to `E`.
    pub fn of<E>() -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            type_name: short_type_name::<E>(),
            matches: |err: &anyhow::Error| err.is::<E>(),
        }
    }

    /// Matches every error.
    pub fn any() -> Self {
        Self {
            type_name: "Error",
            matches: |_: &anyhow::Error| true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn matches(&self, err: &anyhow::Error) -> bool {
        (self.matches)(err)
    }
}

impl fmt::Debug for ErrorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorMatcher").field(&self.type_name).finish()
    }
}

fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// How a node continues once invoked.
#[derive(Clone)]
pub(crate) enum Step {
    /// Run the procedure, then continue.
    Immediate,
    /// Wait for `count` fires of `code`, running the procedure on each.
    OnIncident { code: IncidentCode, count: i32 },
    /// Run the procedure on each fire of `code` until it stops returning halt.
    WhileIncident { code: IncidentCode },
    /// Run the procedure `ms` later, then continue.
    Delay { ms: i64 },
    /// Splice in and run the candidate with the greatest merit.
    DecideBest { candidates: Vec<Candidate> },
    /// Splice in and run the first candidate with positive merit.
    DecideFirst { candidates: Vec<Candidate> },
    /// Race several incidents; the first option to succeed continues.
    FirstIncident { options: Vec<(IncidentCode, Responder)> },
    Catch(ErrorMatcher),
    Finally,
}

/// A chain offered to a decision node. The tail is fixed when the node is
/// built; each decision re-points only that tail's `next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) root: StrategyId,
    pub(crate) tail: StrategyId,
}

impl Candidate {
    pub(crate) fn roots(candidates: &[Candidate]) -> Vec<StrategyId> {
        candidates.iter().map(|c| c.root).collect()
    }
}

/// One step of a chain.
pub struct StrategyNode {
    pub(crate) procedure: Option<Responder>,
    pub(crate) identifier: String,
    pub(crate) prev: Option<StrategyId>,
    pub(crate) next: Option<StrategyId>,
    /// Continue into this node on the next tick instead of synchronously.
    pub(crate) wait_for_update: bool,
    pub(crate) only_execute_on_positive_merit: bool,
    pub(crate) merit_heuristic: Option<MeritHeuristic>,
    pub(crate) step: Step,
}

impl StrategyNode {
    pub(crate) fn new(identifier: impl Into<String>, procedure: Option<Responder>, step: Step) -> Self {
        Self {
            procedure,
            identifier: identifier.into(),
            prev: None,
            next: None,
            wait_for_update: false,
            only_execute_on_positive_merit: false,
            merit_heuristic: None,
            step,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn prev(&self) -> Option<StrategyId> {
        self.prev
    }

    pub fn next(&self) -> Option<StrategyId> {
        self.next
    }

    pub fn waits_for_update(&self) -> bool {
        self.wait_for_update
    }

    pub fn is_exception_handler(&self) -> bool {
        matches!(self.step, Step::Catch(_))
    }

    pub fn is_finally_handler(&self) -> bool {
        matches!(self.step, Step::Finally)
    }

    /// Whether invoking this node suspends the chain on an outside event.
    pub fn is_deferred(&self) -> bool {
        matches!(
            self.step,
            Step::OnIncident { .. }
                | Step::WhileIncident { .. }
                | Step::Delay { .. }
                | Step::FirstIncident { .. }
        )
    }

    pub fn merit(&self) -> f32 {
        self.merit_heuristic
            .as_ref()
            .map(|h| h())
            .unwrap_or(MINIMUM_MERIT)
    }

    pub(crate) fn allowed_on_merit(&self) -> bool {
        !self.only_execute_on_positive_merit || self.merit() > 0.0
    }

    fn error_matcher(&self) -> Option<&ErrorMatcher> {
        match &self.step {
            Step::Catch(matcher) => Some(matcher),
            _ => None,
        }
    }
}

impl fmt::Debug for StrategyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyNode")
            .field("identifier", &self.identifier)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .field("wait_for_update", &self.wait_for_update)
            .finish_non_exhaustive()
    }
}

/// Arena of strategy nodes.
#[derive(Default)]
pub(crate) struct Strategies {
    nodes: Vec<StrategyNode>,
}

impl Strategies {
    pub(crate) fn push(&mut self, node: StrategyNode) -> StrategyId {
        let id = StrategyId::from_index(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub(crate) fn get(&self, id: StrategyId) -> &StrategyNode {
        &self.nodes[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: StrategyId) -> &mut StrategyNode {
        &mut self.nodes[id.0]
    }

    /// Link `node` after `after`, replacing whatever followed it.
    pub(crate) fn link(&mut self, after: StrategyId, node: StrategyId) {
        self.get_mut(after).next = Some(node);
        self.get_mut(node).prev = Some(after);
    }

    pub(crate) fn root(&self, id: StrategyId) -> StrategyId {
        let mut cursor = id;
        while let Some(prev) = self.get(cursor).prev {
            cursor = prev;
        }
        cursor
    }

    pub(crate) fn last(&self, id: StrategyId) -> StrategyId {
        let mut cursor = id;
        while let Some(next) = self.get(cursor).next {
            cursor = next;
        }
        cursor
    }

    /// `id` and every node after it.
    pub(crate) fn list(&self, id: StrategyId) -> Vec<StrategyId> {
        let mut ids = vec![id];
        let mut cursor = id;
        while let Some(next) = self.get(cursor).next {
            ids.push(next);
            cursor = next;
        }
        ids
    }

    /// Whether `target` comes somewhere after `id`.
    pub(crate) fn has_future(&self, id: StrategyId, target: Option<StrategyId>) -> bool {
        let Some(target) = target else {
            return false;
        };
        let mut cursor = self.get(id).next;
        while let Some(current) = cursor {
            if current == target {
                return true;
            }
            cursor = self.get(current).next;
        }
        false
    }

    pub(crate) fn next_finally_handler(&self, id: StrategyId) -> Option<StrategyId> {
        let mut cursor = self.get(id).next;
        while let Some(current) = cursor {
            if self.get(current).is_finally_handler() {
                return Some(current);
            }
            cursor = self.get(current).next;
        }
        None
    }

    /// First catch node in the nearest contiguous block of catch nodes after
    /// `id` that accepts `err`.
    pub(crate) fn next_exception_handler(&self, id: StrategyId, err: &anyhow::Error) -> Option<StrategyId> {
        let mut cursor = self.get(id).next;
        let mut block_started = false;
        while let Some(current) = cursor {
            let node = self.get(current);
            match node.error_matcher() {
                Some(matcher) => {
                    block_started = true;
                    if matcher.matches(err) {
                        return Some(current);
                    }
                }
                None if block_started => return None,
                None => {}
            }
            cursor = node.next;
        }
        None
    }

    /// Greatest merit above zero; ties go to the earliest candidate.
    pub(crate) fn pick_best(&self, candidates: &[StrategyId]) -> Option<StrategyId> {
        let mut best: Option<(StrategyId, f32)> = None;
        for &id in candidates {
            let merit = self.get(id).merit();
            if merit <= 0.0 {
                continue;
            }
            if best.map_or(true, |(_, value)| merit > value) {
                best = Some((id, merit));
            }
        }
        best.map(|(id, _)| id)
    }

    pub(crate) fn pick_first_positive(&self, candidates: &[StrategyId]) -> Option<StrategyId> {
        candidates
            .iter()
            .copied()
            .find(|&id| self.get(id).merit() > 0.0)
    }
}
