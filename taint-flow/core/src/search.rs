//! Backward search from a sink to the sources that taint it.

use crate::graph::Graph;
use crate::record::{RecordId, TraceRecord};

use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;
use tracing::trace;

/// One path through the graph, from a source (first) to a sink (last).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trace {
    records: Vec<RecordId>,
}

impl Trace {
    pub fn source(&self) -> RecordId {
        self.records[0]
    }

    pub fn sink(&self) -> RecordId {
        self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[RecordId] {
        self.records.as_slice()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.records.iter().copied()
    }
}

impl Graph {
    /// Finds the traces leading to `sink`.
    ///
    /// The search is breadth first, so every record is reached over one of
    /// its shortest paths to the sink and is visited at most once. `include`
    /// decides which visited records appear in the reported paths. It is
    /// called exactly once for every visited record except `sink` itself,
    /// which is always included. Excluded records are still traversed, their
    /// predecessors link directly to the nearest included successor.
    ///
    /// Paths are returned in the order their sources were discovered.
    pub fn traces<F>(&self, sink: RecordId, mut include: F) -> Vec<Trace>
    where
        F: FnMut(&TraceRecord) -> bool,
    {
        let _span = tracing::debug_span!("traces", sink = self[sink].lineno()).entered();

        let mut detected: HashMap<RecordId, Option<RecordId>> = HashMap::new();
        let mut queue: VecDeque<RecordId> = VecDeque::new();
        let mut endpoints: Vec<RecordId> = Vec::new();
        let mut ended: HashSet<RecordId> = HashSet::new();

        detected.insert(sink, None);
        queue.push_back(sink);

        while let Some(id) = queue.pop_front() {
            let op = &self[id];
            let successor = detected.get(&id).copied().flatten();

            // the nearest record of the path that will be reported
            let anchor = match successor {
                Some(succ) if !include(op) => succ,
                _ => id,
            };

            if op.is_source() {
                trace!(line = op.lineno(), anchor = self[anchor].lineno(), "found source");
                if ended.insert(anchor) {
                    endpoints.push(anchor);
                }
                continue;
            }

            let expansion: Vec<RecordId> = if op.is_sink() {
                op.sink_reasons.clone()
            } else {
                op.resolved_preds().collect()
            };

            let mut fresh: Vec<RecordId> = Vec::with_capacity(expansion.len());
            for pred in expansion {
                if !detected.contains_key(&pred) && !fresh.contains(&pred) {
                    fresh.push(pred);
                }
            }
            // tainted predecessors last, the untainted ones lead to sources sooner
            fresh.sort_by_key(|pred| self[*pred].is_red());

            trace!(
                line = op.lineno(),
                preds = ?fresh.iter().map(|p| self[*p].lineno()).collect::<Vec<_>>(),
                queued = queue.len(),
                "detecting"
            );

            for pred in fresh {
                detected.insert(pred, Some(anchor));
                queue.push_back(pred);
            }
        }

        endpoints
            .into_iter()
            .map(|start| {
                let mut records = Vec::new();
                let mut cur = Some(start);
                while let Some(id) = cur {
                    records.push(id);
                    cur = detected.get(&id).copied().flatten();
                }
                Trace { records }
            })
            .collect()
    }
}
