//! Incident names, codes and responder lists.

use std::collections::HashMap;

use crate::incident::{IncidentCode, IncidentKind};
use crate::responder::{Responder, ResponderEntry, ResponderHandle};

/// Maps incident names to stable codes and keeps one responder list per code.
///
/// Index 0 of both tables is a placeholder so the first real code is 1.
#[derive(Default)]
pub struct IncidentRegistry {
    codes: HashMap<String, IncidentCode>,
    kinds: Vec<IncidentKind>,
    responders: Vec<Vec<ResponderEntry>>,
}

impl IncidentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Code for `name`. Unknown names get a fresh code when `create_if_absent`,
    /// otherwise [`IncidentCode::INVALID`].
    pub fn code_of(&mut self, name: &str, create_if_absent: bool) -> IncidentCode {
        if let Some(code) = self.codes.get(name) {
            return *code;
        }
        if !create_if_absent {
            return IncidentCode::INVALID;
        }
        if self.responders.is_empty() {
            self.responders.push(Vec::new());
            self.kinds.push(IncidentKind::new(None, IncidentCode::INVALID));
        }
        let code = IncidentCode::from_index(self.responders.len());
        self.codes.insert(name.to_string(), code);
        self.responders.push(Vec::new());
        self.kinds.push(IncidentKind::new(Some(name.to_string()), code));
        tracing::debug!(incident = name, code = code.value(), "Created incident code");
        code
    }

    pub fn lookup(&self, name: &str) -> Option<IncidentCode> {
        self.codes.get(name).copied()
    }

    pub fn is_valid(&self, code: IncidentCode) -> bool {
        !code.is_sentinel() && code.index() < self.responders.len()
    }

    pub fn name_of(&self, code: IncidentCode) -> Option<&str> {
        self.kind(code).and_then(|k| k.id.as_deref())
    }

    pub fn kind(&self, code: IncidentCode) -> Option<&IncidentKind> {
        if self.is_valid(code) {
            self.kinds.get(code.index())
        } else {
            None
        }
    }

    /// Every real incident kind, in code order.
    pub fn kinds(&self) -> &[IncidentKind] {
        self.kinds.get(1..).unwrap_or_default()
    }

    pub fn fire_count(&self, code: IncidentCode) -> u64 {
        self.kind(code).map(|k| k.count).unwrap_or(0)
    }

    /// Handles registered on `code`, in registration order. Empty for an
    /// invalid code.
    pub fn responders(&self, code: IncidentCode) -> impl Iterator<Item = ResponderHandle> + '_ {
        self.entries(code).iter().map(|e| e.handle)
    }

    pub fn responder_count(&self, code: IncidentCode) -> usize {
        self.entries(code).len()
    }

    /// Registration-order position of `handle` in the list for `code`.
    pub fn position(&self, code: IncidentCode, handle: ResponderHandle) -> Option<usize> {
        self.entries(code).iter().position(|e| e.handle == handle)
    }

    pub(crate) fn entries(&self, code: IncidentCode) -> &[ResponderEntry] {
        if self.is_valid(code) {
            &self.responders[code.index()]
        } else {
            &[]
        }
    }

    /// Copy of the current responder list, safe to iterate while responders
    /// mutate the registry.
    pub(crate) fn snapshot(&self, code: IncidentCode) -> Vec<Responder> {
        self.entries(code)
            .iter()
            .map(|e| e.responder.clone())
            .collect()
    }

    pub(crate) fn record_fire(&mut self, code: IncidentCode) {
        if self.is_valid(code) {
            self.kinds[code.index()].count += 1;
        }
    }

    /// Caller guarantees `code` is valid.
    pub(crate) fn push(&mut self, code: IncidentCode, entry: ResponderEntry) {
        self.responders[code.index()].push(entry);
    }

    /// Remove the entry registered under `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `code` was never issued by this registry. The sentinel code
    /// simply has no responders.
    pub(crate) fn remove(&mut self, code: IncidentCode, handle: ResponderHandle) -> bool {
        if code.is_sentinel() {
            return false;
        }
        assert!(
            code.index() < self.responders.len(),
            "incident code {code} is out of range ({} codes issued)",
            self.responders.len().saturating_sub(1)
        );
        let list = &mut self.responders[code.index()];
        match list.iter().position(|e| e.handle == handle) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }
}
