//! Predicates deciding which visited records show up in reported traces.

use crate::location::SourcePos;
use crate::record::TraceRecord;
use crate::resolve::SourceDb;

use hashbrown::HashSet;
use once_cell::sync::Lazy;
use regex::Regex;

// e.g. t54_1741
static RE_TMP_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^t\d+_\d+$").unwrap());

/// Functions the instrumentation wraps around libc to feed taint into the
/// program. Their own code is never interesting.
pub const WRAPPER_FUNCTIONS: [&str; 2] = ["__wrap_write", "__wrap_malloc"];

pub trait TraceFilter {
    fn accept(&mut self, record: &TraceRecord, sources: &mut SourceDb) -> bool;
}

/// Hides operations on the instrumentation's synthetic temporaries. Sinks
/// are always shown.
#[derive(Copy, Clone, Debug, Default)]
pub struct SuppressTemporaries;

impl SuppressTemporaries {
    pub fn is_tmp_var(var: &str) -> bool {
        RE_TMP_VAR.is_match(var)
    }
}

impl TraceFilter for SuppressTemporaries {
    fn accept(&mut self, record: &TraceRecord, _: &mut SourceDb) -> bool {
        match record.var.as_deref() {
            Some(var) => record.is_sink() || !Self::is_tmp_var(var),
            None => true,
        }
    }
}

/// Hides records without a readable source line, which usually means they
/// are located in a library.
#[derive(Copy, Clone, Debug, Default)]
pub struct SuppressLibraries;

impl TraceFilter for SuppressLibraries {
    fn accept(&mut self, record: &TraceRecord, sources: &mut SourceDb) -> bool {
        sources.src_line(&record.location).is_some()
    }
}

/// Shows every source location only once. Must be fresh for every sink.
#[derive(Clone, Debug, Default)]
pub struct UniqueLocations {
    seen: HashSet<Option<SourcePos>>,
}

impl TraceFilter for UniqueLocations {
    fn accept(&mut self, record: &TraceRecord, sources: &mut SourceDb) -> bool {
        self.seen.insert(sources.position(&record.location))
    }
}

/// Hides records inside the listed functions.
#[derive(Clone, Debug)]
pub struct SuppressFunctions {
    funcs: HashSet<String>,
}

impl SuppressFunctions {
    pub fn new<I, S>(funcs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            funcs: funcs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn wrappers() -> Self {
        Self::new(WRAPPER_FUNCTIONS)
    }
}

impl TraceFilter for SuppressFunctions {
    fn accept(&mut self, record: &TraceRecord, _: &mut SourceDb) -> bool {
        !self.funcs.contains(record.location.func.as_str())
    }
}

/// All filters combined; a record is accepted if every filter accepts it.
///
/// Filters run in insertion order and stop at the first rejection, so a
/// stateful filter only sees records every earlier filter accepted.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn TraceFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F: TraceFilter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn push<F: TraceFilter + 'static>(&mut self, filter: F) {
        self.filters.push(Box::new(filter));
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl TraceFilter for FilterChain {
    fn accept(&mut self, record: &TraceRecord, sources: &mut SourceDb) -> bool {
        self.filters.iter_mut().all(|f| f.accept(record, sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{Location, Place};
    use crate::record::{RecordId, Taint};
    use crate::resolve::Addr2Line;

    fn record(var: Option<&str>, func: &str, place: Place, sink: bool) -> TraceRecord {
        TraceRecord {
            index: 0,
            location: Location {
                addr: String::from("0x1"),
                func: func.to_string(),
                place,
            },
            opcode: String::new(),
            var: var.map(String::from),
            preds: vec![],
            sink_reasons: if sink { vec![RecordId(3)] } else { vec![] },
            taint: Taint::Blue,
            text: String::new(),
        }
    }

    #[test]
    fn temporaries() {
        let mut db = SourceDb::new(Addr2Line::default());
        let mut filter = SuppressTemporaries;
        assert!(!filter.accept(&record(Some("t12_345"), "f", Place::Unknown, false), &mut db));
        assert!(filter.accept(&record(Some("t12_345"), "f", Place::Unknown, true), &mut db));
        assert!(filter.accept(&record(Some("len"), "f", Place::Unknown, false), &mut db));
        assert!(filter.accept(&record(Some("t12"), "f", Place::Unknown, false), &mut db));
        assert!(filter.accept(&record(None, "f", Place::Unknown, false), &mut db));
    }

    #[test]
    fn unique_locations() {
        let mut db = SourceDb::new(Addr2Line::default());
        let mut filter = UniqueLocations::default();
        let at = |line| Place::Source(SourcePos::new("/nonexistent/a.c", line));
        assert!(filter.accept(&record(None, "f", at(3), false), &mut db));
        assert!(!filter.accept(&record(None, "g", at(3), false), &mut db));
        assert!(filter.accept(&record(None, "f", at(4), false), &mut db));
    }

    #[test]
    fn chain_short_circuits() {
        let mut db = SourceDb::new(Addr2Line::default());
        let mut chain = FilterChain::new()
            .with(SuppressFunctions::wrappers())
            .with(UniqueLocations::default());
        let at = Place::Source(SourcePos::new("/nonexistent/a.c", 9));

        // rejected before the unique filter sees the location
        assert!(!chain.accept(&record(None, "__wrap_malloc", at.clone(), false), &mut db));
        assert!(chain.accept(&record(None, "main", at.clone(), false), &mut db));
        assert!(!chain.accept(&record(None, "main", at, false), &mut db));
        assert_eq!(chain.len(), 2);
    }
}
