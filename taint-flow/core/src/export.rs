use crate::error::TaintflowError;
use crate::graph::Graph;
use crate::record::{RecordId, TraceRecord};
use crate::search::Trace;
use crate::Index;

pub trait TraceExport {
    fn write(&mut self, msg: Message) -> Result<(), ExportError>;
    fn flush(&mut self) -> Result<(), ExportError>;
}

/// What an exporter receives. Records are referred to by their zero-based
/// line index, which stays meaningful outside of the graph.
#[derive(Copy, Clone)]
pub enum Message<'a> {
    /// A record and the line indices of its predecessors.
    Record(&'a TraceRecord, &'a [Option<Index>]),
    /// A sink and the line indices of its sink reasons.
    Sink(&'a TraceRecord, &'a [Index]),
    /// One path to a sink, source first.
    Trace {
        sink: Index,
        ordinal: usize,
        path: &'a [Index],
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl ExportError {
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(err))
    }
}

impl Graph {
    /// Sends every record, every sink and the traces `traces_of` finds for
    /// each sink to `exporter`.
    pub fn export<E, F>(&self, exporter: &mut E, mut traces_of: F) -> Result<(), TaintflowError>
    where
        E: TraceExport + ?Sized,
        F: FnMut(&Graph, RecordId) -> Vec<Trace>,
    {
        let _span = tracing::debug_span!("export").entered();

        let mut preds: Vec<Option<Index>> = Vec::new();
        for (_, record) in self.records() {
            preds.clear();
            preds.extend(record.preds.iter().map(|p| p.map(|id| self[id].index)));
            exporter.write(Message::Record(record, &preds))?;
        }

        let mut path: Vec<Index> = Vec::new();
        for &sink in self.sinks() {
            let record = &self[sink];
            let reasons: Vec<Index> = record
                .sink_reasons
                .iter()
                .map(|id| self[*id].index)
                .collect();
            exporter.write(Message::Sink(record, &reasons))?;

            for (ordinal, trace) in traces_of(self, sink).iter().enumerate() {
                path.clear();
                path.extend(trace.iter().map(|id| self[id].index));
                exporter.write(Message::Trace {
                    sink: record.index,
                    ordinal,
                    path: &path,
                })?;
            }
        }

        exporter.flush()?;
        Ok(())
    }
}
