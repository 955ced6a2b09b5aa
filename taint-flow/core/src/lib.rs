//! Crate for implementing the core taint-flow tracking components
//!
//! The input is the textual output of a taint-tracking instrumentation, one
//! instrumented operation per line. The `graph` module turns these lines into
//! an immutable def-use graph of `TraceRecord`s: every line is parsed by the
//! `parse` module, its variable references are resolved against the
//! definitions seen so far and its taint is classified right away by the
//! `lattice` module, using the opcode tables in `rules`. Records that use
//! dangerously tainted data (dereferences, branch conditions, exit values)
//! are sinks.
//!
//! The `search` module walks the graph backwards from a sink and reports one
//! path per reachable source. Which records show up in those paths is
//! decided by the predicates in `filter`, which may need the source text of
//! a record. Looking that up is the job of `resolve`.
//!
//! Whole graphs and their traces can be handed to an exporter implementing
//! the `export` interface.

pub mod error;
pub mod export;
pub mod filter;
pub mod graph;
pub mod lattice;
pub mod location;
pub mod parse;
pub mod record;
pub mod resolve;
pub mod rules;
pub mod search;

/// Zero-based position of a line in the trace.
pub type Index = usize;

pub mod prelude {
    pub use super::error::TaintflowError;

    pub use super::filter::{
        FilterChain, SuppressFunctions, SuppressLibraries, SuppressTemporaries, TraceFilter,
        UniqueLocations,
    };

    pub use super::graph::{BuildOptions, Graph, GraphBuilder};

    pub use super::location::{Location, Place, SourcePos};

    pub use super::record::{RecordId, Taint, TraceRecord};

    pub use super::resolve::{Addr2Line, AddressResolver, SourceDb};

    pub use super::rules::OpcodeRules;

    pub use super::search::Trace;
}
