use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use taintflow::export::jsonl::JsonlExporter;
use taintflow::filter::TraceFilter;
use taintflow::graph::{BuildOptions, Graph};
use taintflow::resolve::{Addr2Line, SourceDb};
use taintflow::rules::OpcodeRules;
use tgtrace::printer::{Mode, TracePrinter};
use tgtrace::{read_log, FilterOptions};

/// Finds traces in the taintgrind output that lead to dangerous behavior.
#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Taintgrind log file or '-' to use stdin.
    logfile: String,

    /// Verbosity level for stderr logging.
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// In the traces, show lines that are located in 3rd-party-libraries. A
    /// line is considered to be in a library if its source file cannot be
    /// found below the current working directory.
    #[arg(long)]
    libs: bool,

    /// In the traces, show lines that affect only temporary variables
    /// inserted by valgrind.
    #[arg(long)]
    tmp_instr: bool,

    /// Show every source location only once per sink.
    #[arg(long)]
    unique_locs: bool,

    /// Print only the source of each trace.
    #[arg(long)]
    src_only: bool,

    /// Print the taintgrind lines of each trace instead of source lines.
    #[arg(long)]
    taintgrind_trace: bool,

    /// For each trace, print the whole log and mark the lines of the trace.
    #[arg(long)]
    mark_trace: bool,

    /// Print the whole log with the taint of every operation, then stop.
    #[arg(long)]
    mark_taint: bool,

    /// Don't use terminal colors.
    #[arg(long)]
    no_color: bool,

    /// Treat exactly the given line as a sink; disables sink detection.
    #[arg(long, value_name = "LINENO")]
    mark_sink: Vec<usize>,

    /// JSON file overriding the opcode classification tables.
    #[arg(long, value_name = "FILE")]
    rules: Option<PathBuf>,

    /// Additionally export records, sinks and traces as JSON lines.
    #[arg(long, value_name = "DIR")]
    jsonl: Option<PathBuf>,

    /// Emits debug logs as JSON (TG_LOG env var is still used to determine what is logged)
    #[arg(long)]
    debug_json: bool,
}

impl Args {
    fn level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::ERROR,
            (false, 0) => LevelFilter::WARN,
            (false, 1) => LevelFilter::DEBUG,
            (false, _) => LevelFilter::TRACE,
        }
    }

    fn mode(&self) -> Mode {
        if self.src_only {
            Mode::SourceOnly
        } else if self.mark_trace {
            Mode::MarkTrace
        } else if self.taintgrind_trace {
            Mode::TaintgrindTrace
        } else {
            Mode::Source
        }
    }

    fn filters(&self) -> FilterOptions {
        FilterOptions {
            libs: self.libs,
            tmp_instr: self.tmp_instr,
            unique_locs: self.unique_locs,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(args.level().into())
        .with_env_var("TG_LOG")
        .from_env_lossy();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if args.debug_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let rules = match &args.rules {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("unable to open rules {}", path.display()))?;
            OpcodeRules::from_reader(BufReader::new(file))?
        }
        None => OpcodeRules::default(),
    };
    let options = BuildOptions {
        sink_lines: args.mark_sink.iter().copied().collect::<BTreeSet<_>>(),
        rules,
    };

    let log = read_log(&args.logfile)?;
    let graph = Graph::from_lines(&log, &options)?;
    tracing::info!(
        records = graph.len(),
        sinks = graph.sinks().len(),
        "graph built"
    );

    let stdout = io::stdout().lock();
    let mut printer = TracePrinter::new(&graph, &log, BufWriter::new(stdout))
        .mode(args.mode())
        .color(!args.no_color);

    if args.mark_taint {
        printer.mark_taint()?;
        return Ok(());
    }

    let filters = args.filters();
    let mut db = SourceDb::new(Addr2Line::default());
    printer.print_sinks(&mut db, || filters.chain())?;

    if let Some(dir) = &args.jsonl {
        let mut exporter = JsonlExporter::new(dir)
            .with_context(|| format!("unable to export to {}", dir.display()))?;
        graph.export(&mut exporter, |graph, sink| {
            let mut chain = filters.chain();
            graph.traces(sink, |record| chain.accept(record, &mut db))
        })?;
    }

    Ok(())
}
