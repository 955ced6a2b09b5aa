//! The taint lattice evaluator.
//!
//! Every record is classified exactly once, right after its predecessors
//! have been resolved. Since predecessors always come earlier in the trace
//! their classification is final by then and nothing is ever revisited.

use crate::record::{RecordId, Taint};
use crate::rules::{CompiledRules, Opcode};
use std::collections::BTreeSet;

/// A resolved reference to a predecessor, as seen by the evaluator.
#[derive(Copy, Clone, Debug)]
pub struct Pred<'a> {
    /// The variable name as written in the trace.
    pub var: &'a str,
    pub id: Option<RecordId>,
    /// Taint of the defining record. Unresolved references are treated as
    /// untainted boundaries and are always `Blue`.
    pub taint: Taint,
}

impl<'a> Pred<'a> {
    pub fn resolved(var: &'a str, id: RecordId, taint: Taint) -> Self {
        Self {
            var,
            id: Some(id),
            taint,
        }
    }

    pub fn unresolved(var: &'a str) -> Self {
        Self {
            var,
            id: None,
            taint: Taint::Blue,
        }
    }
}

pub struct Evaluator<'r> {
    rules: &'r CompiledRules,
    sink_lines: &'r BTreeSet<usize>,
}

impl<'r> Evaluator<'r> {
    /// `sink_lines` holds one-based line numbers. When it is non-empty
    /// automatic sink detection is replaced by exact matching.
    pub fn new(rules: &'r CompiledRules, sink_lines: &'r BTreeSet<usize>) -> Self {
        Self { rules, sink_lines }
    }

    pub fn manual(&self) -> bool {
        !self.sink_lines.is_empty()
    }

    /// Classifies a record from its opcode and its predecessors.
    pub fn taint(&self, opcode: &Opcode, preds: &[Pred]) -> Taint {
        if preds.is_empty() {
            return Taint::Blue;
        }

        // taint is absorbing, nothing below may override red
        if preds.iter().any(|p| p.taint == Taint::Red) {
            return Taint::Red;
        }

        let inherited = if preds.iter().any(|p| p.taint == Taint::Blue) {
            Taint::Blue
        } else {
            Taint::Green
        };

        if preds.len() >= 2 && self.rules.is_widening(opcode) {
            return Taint::Red;
        }

        if self.is_pointer_minus_self(opcode, preds) {
            return Taint::Red;
        }

        if inherited == Taint::Blue && self.rules.is_compare(opcode) {
            return match preds.iter().filter(|p| p.taint == Taint::Blue).count() {
                1 => Taint::Red,
                _ => Taint::Green,
            };
        }

        inherited
    }

    // e.g. t5 = Sub64 t3 t3 with the flow t5 <- t3
    fn is_pointer_minus_self(&self, opcode: &Opcode, preds: &[Pred]) -> bool {
        if !self.rules.is_subtract(opcode) {
            return false;
        }
        match (preds, opcode.operands()) {
            ([pred], [_, literal, ..]) => *literal == pred.var,
            _ => false,
        }
    }

    /// Computes the sink reasons of a record.
    ///
    /// `indirect` are the red addresses the record loads from or stores
    /// through, which the parser already extracted. `preds` are the data-flow
    /// predecessors including the plain uses.
    pub fn sink_reasons(
        &self,
        lineno: usize,
        opcode: &Opcode,
        preds: &[Pred],
        indirect: Vec<RecordId>,
    ) -> Vec<RecordId> {
        let mut reasons = indirect;

        if self.manual() {
            if !self.sink_lines.contains(&lineno) {
                reasons.clear();
            } else if reasons.is_empty() {
                reasons.extend(preds.iter().filter_map(|p| p.id));
                dedup(&mut reasons);
            }
            return reasons;
        }

        let tested = self
            .rules
            .branch_condition(opcode)
            .or_else(|| self.rules.select_condition(opcode));
        if let Some(tested) = tested {
            for pred in preds.iter() {
                if let (Some(id), Taint::Red) = (pred.id, pred.taint) {
                    if pred.var == tested && !reasons.contains(&id) {
                        reasons.push(id);
                    }
                }
            }
        }

        if self.rules.is_exit_call(opcode) {
            for id in preds.iter().filter_map(|p| p.id) {
                if !reasons.contains(&id) {
                    reasons.push(id);
                }
            }
        }

        reasons
    }
}

fn dedup(ids: &mut Vec<RecordId>) {
    let mut seen = Vec::with_capacity(ids.len());
    ids.retain(|id| {
        if seen.contains(id) {
            return false;
        }
        seen.push(*id);
        true
    });
}
