use taintflow_core::error::TaintflowError;
use taintflow_core::filter::{FilterChain, SuppressTemporaries, TraceFilter, UniqueLocations};
use taintflow_core::prelude::*;

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Write};

// Stands in for addr2line; none of these traces need it.
struct NoDebugInfo;

impl AddressResolver for NoDebugInfo {
    fn addr2line(
        &mut self,
        module: &std::path::Path,
        addr: &str,
    ) -> Result<SourcePos, taintflow_core::resolve::ResolveError> {
        Err(taintflow_core::resolve::ResolveError::Unresolved {
            module: module.to_path_buf(),
            addr: addr.to_string(),
        })
    }
}

const PTR_ARITH: &str = "\
==31337== Taintgrind, the taint analysis tool
0x400596: main (ptr.c:4) | t1_1 = GET:I64 | 0x7ff000 | 0x0 | t1_1
0x40059A: main (ptr.c:5) | t2_1 = 64to32 t1_1 | 0x7ff000 | 0x0 | t2_1 <- t1_1
0x40059E: main (ptr.c:5) | t3_1 = Add32 t2_1 0x4:I32 | 0x7ff004 | 0x0 | t3_1 <- t2_1
0x4005A2: main (ptr.c:6) | t4_1 = GET:I64 | 0x10 | 0x0 | t4_1
0x4005A6: main (ptr.c:6) | t5_1 = Xor32 t3_1 t4_1 | 0x7ff014 | 0xffffffff | t5_1 <- t3_1, t4_1
0x4005AA: main (ptr.c:7) | t6_1 = 32Uto64 t5_1 | 0x7ff014 | 0xffffffff | t6_1 <- t5_1
0x4005AE: main (ptr.c:7) | t7_1 = LOAD:I64 t6_1 | 0x0 | 0x0 | t7_1 <*- t6_1
0x4005B2: main (ptr.c:8) | IF t6_1 goto 0x4005D2 | - | 0xffffffff | t6_1
0x4005B6: main (ptr.c:9) | CALL exit | - | - | t4_1
";

fn write_trace(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn read_graph(file: &tempfile::NamedTempFile, options: &BuildOptions) -> Graph {
    let reader = BufReader::new(File::open(file.path()).unwrap());
    Graph::from_reader(reader, options).unwrap()
}

fn lines(graph: &Graph, trace: &Trace) -> Vec<usize> {
    trace.iter().map(|id| graph[id].lineno()).collect()
}

#[test]
fn classify_trace_file() {
    let file = write_trace(PTR_ARITH);
    let graph = read_graph(&file, &BuildOptions::default());

    assert_eq!(graph.len(), 9);
    assert_eq!(graph.lines(), 10);
    assert_eq!(graph.idxwidth(), 2);

    let taints: Vec<(usize, Taint)> = graph.records().map(|(_, r)| (r.lineno(), r.taint)).collect();
    assert_eq!(
        taints,
        vec![
            (2, Taint::Blue),
            (3, Taint::Blue),
            (4, Taint::Blue),
            (5, Taint::Blue),
            (6, Taint::Red),
            (7, Taint::Red),
            (8, Taint::Blue),
            (9, Taint::Red),
            (10, Taint::Blue),
        ]
    );

    let sinks: Vec<usize> = graph.sinks().iter().map(|id| graph[*id].lineno()).collect();
    assert_eq!(sinks, vec![8, 9, 10]);
}

#[test]
fn every_sink_has_a_trace() {
    let file = write_trace(PTR_ARITH);
    let graph = read_graph(&file, &BuildOptions::default());

    let load = graph.at_line(8).unwrap();
    let mut found: Vec<Vec<usize>> = graph
        .traces(load, |_| true)
        .iter()
        .map(|t| lines(&graph, t))
        .collect();
    found.sort();
    assert_eq!(found, vec![vec![2, 3, 4, 6, 7, 8], vec![5, 6, 7, 8]]);

    let exit = graph.at_line(10).unwrap();
    let found: Vec<Vec<usize>> = graph
        .traces(exit, |_| true)
        .iter()
        .map(|t| lines(&graph, t))
        .collect();
    assert_eq!(found, vec![vec![5, 10]]);
}

#[test]
fn repeated_searches_agree() {
    let file = write_trace(PTR_ARITH);
    let graph = read_graph(&file, &BuildOptions::default());
    let branch = graph.at_line(9).unwrap();

    let first = graph.traces(branch, |_| true);
    let second = graph.traces(branch, |_| true);
    assert_eq!(first, second);
    assert!(first.iter().all(|t| t.sink() == branch));
}

#[test]
fn temporaries_are_hidden_except_sinks() {
    let file = write_trace(PTR_ARITH);
    let graph = read_graph(&file, &BuildOptions::default());
    let mut db = SourceDb::new(NoDebugInfo);

    let load = graph.at_line(8).unwrap();
    let mut filter = SuppressTemporaries;
    let traces = graph.traces(load, |r| filter.accept(r, &mut db));

    // every hop defines a temporary, so only the sink itself is left
    assert_eq!(traces.len(), 1);
    assert_eq!(lines(&graph, &traces[0]), vec![8]);
}

#[test]
fn unique_locations_keep_first_source() {
    let graph = Graph::from_lines(
        [
            "0x1: f (a.c:5) | GET:I64 | - | - | a",
            "0x2: f (a.c:5) | GET:I64 | - | - | b",
            "0x3: f (a.c:6) | c = Add64 a b | - | - | c <- a, b",
            "0x4: f (a.c:7) | d = LOAD:I64 c | - | - | d <*- c",
        ],
        &BuildOptions::default(),
    )
    .unwrap();
    let root = tempfile::tempdir().unwrap();
    let mut db = SourceDb::new(NoDebugInfo).with_root(root.path());
    let mut chain = FilterChain::new().with(UniqueLocations::default());

    let sink = graph.at_line(4).unwrap();
    let traces = graph.traces(sink, |r| chain.accept(r, &mut db));
    let found: Vec<Vec<usize>> = traces.iter().map(|t| lines(&graph, t)).collect();

    assert_eq!(found, vec![vec![1, 3, 4], vec![3, 4]]);
    let second = graph.at_line(2).unwrap();
    assert!(traces.iter().all(|t| !t.contains(second)));
}

#[test]
fn manual_sinks_only() {
    let file = write_trace(PTR_ARITH);
    let options = BuildOptions {
        sink_lines: BTreeSet::from([4, 7]),
        ..Default::default()
    };
    let graph = read_graph(&file, &options);

    let sinks: Vec<usize> = graph.sinks().iter().map(|id| graph[*id].lineno()).collect();
    assert_eq!(sinks, vec![4, 7]);

    let sink = graph.at_line(7).unwrap();
    assert_eq!(graph[sink].sink_reasons, vec![graph.at_line(6).unwrap()]);

    // the marked line 4 is passed through like any other record
    let mut found: Vec<Vec<usize>> = graph
        .traces(sink, |_| true)
        .iter()
        .map(|t| lines(&graph, t))
        .collect();
    found.sort();
    assert_eq!(found, vec![vec![2, 3, 4, 6, 7], vec![5, 6, 7]]);
}

#[test]
fn duplicate_definition_aborts() {
    let file = write_trace(
        "0x1: f (a.c:1) | GET:I64 | - | - | t1_1\n\
         0x2: f (a.c:2) | t2_1 = 64to32 t1_1 | - | - | t2_1 <- t1_1\n\
         0x3: f (a.c:3) | t2_1 = 64to32 t1_1 | - | - | t2_1 <- t1_1\n",
    );
    let reader = BufReader::new(File::open(file.path()).unwrap());
    match Graph::from_reader(reader, &BuildOptions::default()) {
        Err(TaintflowError::DuplicateDefinition { var, first, second }) => {
            assert_eq!(var, "t2_1");
            assert_eq!((first, second), (2, 3));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn custom_rules() {
    let rules = OpcodeRules::from_reader(r#"{ "exit_functions": ["abort_with"] }"#.as_bytes()).unwrap();
    let options = BuildOptions {
        rules,
        ..Default::default()
    };
    let graph = Graph::from_lines(
        [
            "0x1: f (a.c:1) | GET:I64 | - | - | t1_1",
            "0x2: f (a.c:2) | CALL abort_with | - | - | t1_1",
            "0x3: f (a.c:3) | CALL exit | - | - | t1_1",
        ],
        &options,
    )
    .unwrap();
    let sinks: Vec<usize> = graph.sinks().iter().map(|id| graph[*id].lineno()).collect();
    assert_eq!(sinks, vec![2]);
}
