use taintflow_core::export::*;
use taintflow_core::record::TraceRecord;
use taintflow_core::Index;

use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Writes records, sinks and traces as JSON lines into three files of a
/// directory. Every file has its own writer thread. `flush` waits for all of
/// them and reports the first write error; dropping an exporter that was
/// never flushed waits as well but can only log failures.
pub struct JsonlExporter {
    threads: Vec<JoinHandle<io::Result<()>>>,
    record_writer: Sender<Line<RecordLine>>,
    sink_writer: Sender<Line<SinkLine>>,
    trace_writer: Sender<Line<TraceLine>>,
}

impl JsonlExporter {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, ExportError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;

        let mut threads = Vec::with_capacity(3);

        let (record_writer, chan) = mpsc::channel();
        let out = BufWriter::new(File::create(root.join("records.jsonl"))?);
        threads.push(thread::spawn(move || write_lines("records", chan, out)));

        let (sink_writer, chan) = mpsc::channel();
        let out = BufWriter::new(File::create(root.join("sinks.jsonl"))?);
        threads.push(thread::spawn(move || write_lines("sinks", chan, out)));

        let (trace_writer, chan) = mpsc::channel();
        let out = BufWriter::new(File::create(root.join("traces.jsonl"))?);
        threads.push(thread::spawn(move || write_lines("traces", chan, out)));

        Ok(Self {
            threads,
            record_writer,
            sink_writer,
            trace_writer,
        })
    }

    fn finish(&mut self) -> Result<(), ExportError> {
        // a writer that already failed has hung up, its error comes from join
        let _ = self.record_writer.send(Line::Done);
        let _ = self.sink_writer.send(Line::Done);
        let _ = self.trace_writer.send(Line::Done);

        let mut result = Ok(());
        for thread in self.threads.drain(..) {
            let joined = match thread.join() {
                Ok(res) => res.map_err(ExportError::Io),
                Err(_) => Err(ExportError::other(WriterPanicked)),
            };
            if let Err(err) = joined {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

#[derive(thiserror::Error, Debug)]
#[error("jsonl writer panicked")]
struct WriterPanicked;

impl TraceExport for JsonlExporter {
    fn write(&mut self, msg: Message) -> Result<(), ExportError> {
        match msg {
            Message::Record(record, preds) => {
                self.record_writer
                    .send(Line::Item(RecordLine::new(record, preds)))
                    .map_err(ExportError::other)?;
            }
            Message::Sink(record, reasons) => {
                let line = SinkLine {
                    key: key(record.index),
                    line: record.lineno(),
                    reasons: reasons.iter().map(|i| i + 1).collect(),
                };
                self.sink_writer
                    .send(Line::Item(line))
                    .map_err(ExportError::other)?;
            }
            Message::Trace {
                sink,
                ordinal,
                path,
            } => {
                let line = TraceLine {
                    key: format!("{}/{}", sink + 1, ordinal),
                    sink: sink + 1,
                    ordinal,
                    path: path.iter().map(|i| i + 1).collect(),
                };
                self.trace_writer
                    .send(Line::Item(line))
                    .map_err(ExportError::other)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ExportError> {
        if self.threads.is_empty() {
            return Ok(());
        }
        self.finish()
    }
}

impl Drop for JsonlExporter {
    fn drop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        if let Err(err) = self.finish() {
            tracing::warn!(error = %err, "jsonl export incomplete");
        }
    }
}

enum Line<T> {
    Item(T),
    Done,
}

fn key(index: Index) -> String {
    (index + 1).to_string()
}

#[derive(Serialize)]
struct RecordLine {
    #[serde(rename = "_key")]
    key: String,
    line: usize,
    addr: String,
    func: String,
    location: String,
    opcode: String,
    var: Option<String>,
    taint: &'static str,
    preds: Vec<Option<usize>>,
    sink: bool,
}

impl RecordLine {
    fn new(record: &TraceRecord, preds: &[Option<Index>]) -> Self {
        Self {
            key: key(record.index),
            line: record.lineno(),
            addr: record.location.addr.clone(),
            func: record.location.func.clone(),
            location: record.location.to_string(),
            opcode: record.opcode.clone(),
            var: record.var.clone(),
            taint: record.taint.name(),
            preds: preds.iter().map(|p| p.map(|i| i + 1)).collect(),
            sink: record.is_sink(),
        }
    }
}

#[derive(Serialize)]
struct SinkLine {
    #[serde(rename = "_key")]
    key: String,
    line: usize,
    reasons: Vec<usize>,
}

#[derive(Serialize)]
struct TraceLine {
    #[serde(rename = "_key")]
    key: String,
    sink: usize,
    ordinal: usize,
    path: Vec<usize>,
}

fn write_lines<T: Serialize>(
    name: &'static str,
    chan: Receiver<Line<T>>,
    mut out: BufWriter<File>,
) -> io::Result<()> {
    let _span = tracing::trace_span!("write_lines", file = name).entered();

    let mut count = 0usize;
    while let Ok(msg) = chan.recv() {
        match msg {
            Line::Item(item) => {
                serde_json::to_writer(&mut out, &item)?;
                out.write_all(b"\n")?;
                count += 1;
            }
            Line::Done => {
                tracing::trace!("received done message");
                break;
            }
        }
    }

    tracing::debug!(file = name, lines = count, "export finished");
    out.flush()
}
