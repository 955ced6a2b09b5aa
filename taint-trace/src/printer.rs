//! Rendering of sinks and their traces for a terminal.

use hashbrown::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use taintflow::filter::{FilterChain, TraceFilter};
use taintflow::graph::Graph;
use taintflow::record::{Taint, TraceRecord};
use taintflow::resolve::SourceDb;
use taintflow::search::Trace;
use taintflow::trace::{Place, SourcePos};
use taintflow::Index;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";

const ORIGIN: &str = ">>>> The origin of the taint should be just here <<<<";
const NOT_FOUND: &str = "[file not found]";

fn taint_color(taint: Taint) -> &'static str {
    match taint {
        Taint::Red => "\x1b[31m",
        Taint::Blue => "\x1b[34m",
        Taint::Green => "\x1b[32m",
    }
}

/// What is printed for every trace.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// The source lines of every record.
    #[default]
    Source,
    /// Only the source line where the taint originates.
    SourceOnly,
    /// The raw log lines of every record.
    TaintgrindTrace,
    /// The whole log with the records of the trace marked.
    MarkTrace,
}

pub struct TracePrinter<'g, W> {
    graph: &'g Graph,
    log: &'g [String],
    out: W,
    mode: Mode,
    color: bool,
    cwd: PathBuf,
}

impl<'g, W: Write> TracePrinter<'g, W> {
    /// `log` are all lines the graph was built from.
    pub fn new(graph: &'g Graph, log: &'g [String], out: W) -> Self {
        Self {
            graph,
            log,
            out,
            mode: Mode::default(),
            color: true,
            cwd: std::env::current_dir().unwrap_or_default(),
        }
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, text: &str, codes: &[&str]) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("{}{}{}", codes.concat(), text, RESET)
    }

    fn paint_record(&self, record: &TraceRecord, text: &str) -> String {
        if record.is_sink() {
            self.paint(text, &[BOLD, taint_color(record.taint)])
        } else {
            self.paint(text, &[taint_color(record.taint)])
        }
    }

    fn separator(&mut self, c: char, code: &str) -> io::Result<()> {
        let line: String = std::iter::repeat(c).take(80).collect();
        let line = self.paint(&line, &[code]);
        writeln!(self.out, "{}", line)
    }

    /// Prints every operation of the log with its taint.
    pub fn mark_taint(&mut self) -> io::Result<()> {
        for (_, record) in self.graph.records() {
            let text = self.log.get(record.index).unwrap_or(&record.text);
            write!(self.out, "{:8}   ", record.lineno())?;
            if self.color {
                let line = self.paint(text, &[taint_color(record.taint)]);
                writeln!(self.out, "{}", line)?;
            } else {
                writeln!(self.out, "[{}]  {}", record.taint.abbrv(), text)?;
            }
        }
        self.out.flush()
    }

    /// Prints the traces of every sink. `filters` is asked for a fresh
    /// filter chain for each sink.
    pub fn print_sinks<F>(&mut self, db: &mut SourceDb, mut filters: F) -> io::Result<()>
    where
        F: FnMut() -> FilterChain,
    {
        let graph = self.graph;
        for (sidx, &sink) in graph.sinks().iter().enumerate() {
            if sidx > 0 {
                self.separator('=', GREEN)?;
            }

            let mut chain = filters();
            let traces = graph.traces(sink, |record| chain.accept(record, db));
            tracing::debug!(sink = graph[sink].lineno(), traces = traces.len(), "printing sink");
            self.print_traces(&traces, db)?;
        }
        self.out.flush()
    }

    pub fn print_traces(&mut self, traces: &[Trace], db: &mut SourceDb) -> io::Result<()> {
        for (tidx, trace) in traces.iter().enumerate() {
            if tidx > 0 {
                self.separator('-', YELLOW)?;
            }
            writeln!(self.out, "{}", ORIGIN)?;

            match self.mode {
                Mode::Source => self.print_source_lines(trace, db)?,
                Mode::SourceOnly => {
                    let line = self.source_line(&self.graph[trace.source()], db);
                    writeln!(self.out, "{}", line)?;
                }
                Mode::TaintgrindTrace => {
                    for id in trace.iter() {
                        let record = &self.graph[id];
                        let line = self.paint(&record.text, &[taint_color(record.taint)]);
                        writeln!(self.out, "{}", line)?;
                    }
                }
                Mode::MarkTrace => self.print_marked_log(trace)?,
            }
        }
        Ok(())
    }

    // Consecutive records of the same source line are printed once, using the
    // last of them so that the taint shown is the one leaving the line.
    fn print_source_lines(&mut self, trace: &Trace, db: &mut SourceDb) -> io::Result<()> {
        let graph = self.graph;
        let mut prev: Option<(&TraceRecord, Option<SourcePos>)> = None;

        for id in trace.iter() {
            let record = &graph[id];
            let pos = db.position(&record.location);
            if let Some((prev_record, prev_pos)) = prev.take() {
                if prev_pos != pos {
                    let line = self.source_line(prev_record, db);
                    writeln!(self.out, "{}", line)?;
                }
            }
            prev = Some((record, pos));
        }

        if let Some((record, _)) = prev {
            let line = self.source_line(record, db);
            writeln!(self.out, "{}", line)?;
        }
        Ok(())
    }

    fn print_marked_log(&mut self, trace: &Trace) -> io::Result<()> {
        let graph = self.graph;
        let members: HashSet<Index> = trace.iter().map(|id| graph[id].index).collect();
        for (idx, text) in self.log.iter().enumerate() {
            write!(self.out, "{:8}   ", idx + 1)?;

            let member = if members.contains(&idx) {
                graph.at_line(idx + 1)
            } else {
                None
            };
            let Some(id) = member else {
                if !self.color {
                    write!(self.out, "     ")?;
                }
                writeln!(self.out, "{}", text)?;
                continue;
            };

            let record = &graph[id];
            if self.color {
                let line = self.paint_record(record, text);
                writeln!(self.out, "{}", line)?;
            } else if record.is_sink() {
                writeln!(self.out, "*{}*  {}", record.taint.abbrv(), text)?;
            } else {
                writeln!(self.out, "[{}]  {}", record.taint.abbrv(), text)?;
            }
        }
        Ok(())
    }

    /// `file:line: func:  source` for one record.
    fn source_line(&self, record: &TraceRecord, db: &mut SourceDb) -> String {
        let (file, line) = match db.position(&record.location) {
            Some(pos) => (self.relative(&pos.file), pos.line),
            None => match &record.location.place {
                Place::Module(module) => (module.display().to_string(), 0),
                _ => (String::from("??"), 0),
            },
        };

        let src = db
            .src_line(&record.location)
            .unwrap_or_else(|| String::from(NOT_FOUND));
        let src = if record.is_sink() {
            self.paint(&src, &[taint_color(Taint::Red)])
        } else {
            src
        };

        format!(
            "{:>30}:{:04}: {:>20}:  {}",
            file, line, record.location.func, src
        )
    }

    fn relative(&self, file: &Path) -> String {
        match file.strip_prefix(&self.cwd) {
            Ok(rel) if file.is_absolute() => rel.display().to_string(),
            _ => file.display().to_string(),
        }
    }
}
