use crate::error::TaintflowError;
use crate::lattice::{Evaluator, Pred};
use crate::parse::{FlowClause, ParsedLine};
use crate::record::{RecordId, TraceRecord};
use crate::rules::{CompiledRules, Opcode, OpcodeRules};
use crate::Index;

use hashbrown::HashMap;
use std::collections::BTreeSet;
use std::io::BufRead;
use tracing::{debug, trace};

/// Maps every variable to the single record that defines it.
///
/// The trace names variables in single-assignment form, so a second
/// definition of the same name means the trace (or the parser) is broken.
#[derive(Default, Debug)]
pub struct DefUseGraph {
    defs: HashMap<String, Def>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Def {
    id: RecordId,
    index: Index,
}

impl DefUseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, var: &str) -> Option<RecordId> {
        self.defs.get(var).map(|def| def.id)
    }

    pub fn insert(&mut self, var: String, id: RecordId, index: Index) -> Result<(), TaintflowError> {
        if let Some(prev) = self.defs.get(var.as_str()) {
            return Err(TaintflowError::DuplicateDefinition {
                var,
                first: prev.index + 1,
                second: index + 1,
            });
        }
        self.defs.insert(var, Def { id, index });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Configuration of one graph construction.
#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    /// One-based line numbers of manually marked sinks. Empty means sinks
    /// are detected automatically.
    pub sink_lines: BTreeSet<usize>,
    pub rules: OpcodeRules,
}

/// Builds a `Graph` from trace lines fed in trace order.
pub struct GraphBuilder {
    rules: CompiledRules,
    sink_lines: BTreeSet<usize>,
    defs: DefUseGraph,
    records: Vec<TraceRecord>,
    sinks: Vec<RecordId>,
    lines: usize,
}

impl GraphBuilder {
    pub fn new(options: &BuildOptions) -> Result<Self, TaintflowError> {
        Ok(Self {
            rules: options.rules.compile()?,
            sink_lines: options.sink_lines.clone(),
            defs: DefUseGraph::new(),
            records: Vec::new(),
            sinks: Vec::new(),
            lines: 0,
        })
    }

    pub fn defs(&self) -> &DefUseGraph {
        &self.defs
    }

    /// Feeds the line at `index` (zero-based) into the graph.
    ///
    /// Indices must be strictly increasing across calls, `Graph::at_line`
    /// relies on records being sorted by line. Gaps are fine.
    ///
    /// Returns the id of the new record, or `None` if the line is not an
    /// operation line. Redefining a variable aborts construction.
    pub fn push_line(&mut self, index: Index, line: &str) -> Result<Option<RecordId>, TaintflowError> {
        debug_assert!(
            index >= self.lines,
            "line {} fed after line {}",
            index + 1,
            self.lines
        );
        self.lines = self.lines.max(index + 1);

        let Some(parsed) = ParsedLine::parse(line) else {
            return Ok(None);
        };

        let _span = tracing::trace_span!("push_line", line = index + 1).entered();

        let id = RecordId(self.records.len());
        let opcode = Opcode::new(parsed.opcode);
        let may_define = !self.rules.is_use_only(&opcode);
        let mut var = parsed.flow_var(index)?.map(String::from);
        let mut preds: Vec<Pred> = Vec::new();
        let mut indirect: Vec<RecordId> = Vec::new();

        for clause in parsed.clauses.iter() {
            match clause {
                FlowClause::Flow { sources, .. } => {
                    preds.extend(sources.iter().map(|s| self.resolve(s)));
                }
                // Dereferencing or storing through a red address is the hazard,
                // the loaded or stored value does not flow from the address.
                FlowClause::Load { addrs, .. } | FlowClause::Store { addrs, .. } => {
                    for addr in addrs.iter() {
                        let Some(pred) = self.defs.lookup(addr) else {
                            continue;
                        };
                        if self.records[pred.0].is_red() && !indirect.contains(&pred) {
                            indirect.push(pred);
                        }
                    }
                }
                FlowClause::Use { vars } => {
                    for v in vars.iter() {
                        match self.defs.lookup(v) {
                            Some(_) => preds.push(self.resolve(v)),
                            // first appearance of a value, this line introduces it
                            None if var.is_none()
                                && may_define
                                && opcode.target().map_or(true, |t| t == v.as_str()) =>
                            {
                                var = Some(v.clone())
                            }
                            None => preds.push(Pred::unresolved(v)),
                        }
                    }
                }
            }
        }

        let eval = Evaluator::new(&self.rules, &self.sink_lines);
        let taint = eval.taint(&opcode, &preds);
        let sink_reasons = eval.sink_reasons(index + 1, &opcode, &preds, indirect);

        if let Some(v) = var.as_ref() {
            self.defs.insert(v.clone(), id, index)?;
            debug!(line = index + 1, var = v.as_str(), taint = %taint, "KEEP DEF");
        }

        let record = TraceRecord {
            index,
            location: parsed.location,
            opcode: parsed.opcode.to_string(),
            var,
            preds: preds.iter().map(|p| p.id).collect(),
            sink_reasons,
            taint,
            text: line.to_string(),
        };

        if record.is_sink() {
            debug!(
                line = index + 1,
                reasons = ?record.sink_reasons.iter().map(|r| self.records[r.0].lineno()).collect::<Vec<_>>(),
                "KEEP SINK"
            );
            self.sinks.push(id);
        } else {
            trace!(line = index + 1, taint = %taint, "record");
        }

        self.records.push(record);
        Ok(Some(id))
    }

    fn resolve<'v>(&self, var: &'v str) -> Pred<'v> {
        match self.defs.lookup(var) {
            Some(id) => Pred::resolved(var, id, self.records[id.0].taint),
            None => Pred::unresolved(var),
        }
    }

    pub fn finish(self) -> Graph {
        debug!(
            records = self.records.len(),
            defs = self.defs.len(),
            sinks = self.sinks.len(),
            "graph complete"
        );
        Graph {
            records: self.records,
            sinks: self.sinks,
            lines: self.lines,
        }
    }
}

/// The def-use graph of a whole trace.
///
/// Records are stored in an arena in trace order and refer to each other by
/// `RecordId`. The graph is immutable once built.
#[derive(Debug)]
pub struct Graph {
    records: Vec<TraceRecord>,
    sinks: Vec<RecordId>,
    lines: usize,
}

impl Graph {
    pub fn from_lines<I, S>(lines: I, options: &BuildOptions) -> Result<Self, TaintflowError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GraphBuilder::new(options)?;
        for (index, line) in lines.into_iter().enumerate() {
            builder.push_line(index, line.as_ref())?;
        }
        Ok(builder.finish())
    }

    pub fn from_reader<R: BufRead>(reader: R, options: &BuildOptions) -> Result<Self, TaintflowError> {
        let mut builder = GraphBuilder::new(options)?;
        for (index, line) in reader.lines().enumerate() {
            builder.push_line(index, &line?)?;
        }
        Ok(builder.finish())
    }

    pub fn get(&self, id: RecordId) -> Option<&TraceRecord> {
        self.records.get(id.0)
    }

    pub fn records(&self) -> impl Iterator<Item = (RecordId, &TraceRecord)> + '_ {
        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| (RecordId(i), record))
    }

    /// Sinks in trace order.
    pub fn sinks(&self) -> &[RecordId] {
        self.sinks.as_slice()
    }

    /// Looks up the record of a one-based line number.
    pub fn at_line(&self, lineno: usize) -> Option<RecordId> {
        let index = lineno.checked_sub(1)?;
        self.records
            .binary_search_by_key(&index, |r| r.index)
            .ok()
            .map(RecordId)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of lines read, including the ones that were not operations.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Width needed to print any line number of this trace.
    pub fn idxwidth(&self) -> usize {
        self.lines.max(1).to_string().len()
    }
}

impl std::ops::Index<RecordId> for Graph {
    type Output = TraceRecord;

    fn index(&self, id: RecordId) -> &TraceRecord {
        &self.records[id.0]
    }
}
