use crate::location::Location;
use crate::Index;
use std::fmt;

/// The three-valued taint lattice.
///
/// `Red` marks values derived from a pointer-to-integer cast and is
/// absorbing: anything computed from a red value is red. `Blue` values are
/// untainted and `Green` marks a mix that is not dangerous by itself.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Taint {
    Red,
    Blue,
    Green,
}

impl Taint {
    /// One-letter abbreviation used when colors are disabled.
    pub fn abbrv(&self) -> &'static str {
        match self {
            Taint::Red => "R",
            Taint::Blue => "B",
            Taint::Green => "G",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Taint::Red => "red",
            Taint::Blue => "blue",
            Taint::Green => "green",
        }
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Position of a record in the graph's record arena.
///
/// This is not the line number of the record; records only exist for
/// operation lines, so ids are dense while line indices are not.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RecordId(pub(crate) usize);

impl RecordId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One instrumented operation of the trace.
///
/// As there might be very many records floating around, a record only keeps
/// what the graph search needs plus the raw line for rendering. Records are
/// never mutated once they are part of a `Graph`; per-search state lives in
/// the search itself.
#[derive(Clone, Debug)]
pub struct TraceRecord {
    /// Zero-based index of the line in the trace.
    pub index: Index,
    pub location: Location,
    pub opcode: String,
    /// The variable this operation defines, if any.
    pub var: Option<String>,
    /// Data-flow predecessors. `None` marks a reference to a variable that
    /// was never defined earlier in the trace.
    pub preds: Vec<Option<RecordId>>,
    /// Predecessors whose taint makes this operation dangerous.
    pub sink_reasons: Vec<RecordId>,
    pub taint: Taint,
    /// The raw trace line.
    pub text: String,
}

impl TraceRecord {
    /// One-based line number as shown to users and accepted by `--mark-sink`.
    pub fn lineno(&self) -> usize {
        self.index + 1
    }

    pub fn is_sink(&self) -> bool {
        !self.sink_reasons.is_empty()
    }

    /// A source has nothing left to expand: no sink reasons and no
    /// resolvable predecessor.
    pub fn is_source(&self) -> bool {
        self.sink_reasons.is_empty() && self.preds.iter().all(Option::is_none)
    }

    pub fn is_red(&self) -> bool {
        self.taint == Taint::Red
    }

    pub fn is_blue(&self) -> bool {
        self.taint == Taint::Blue
    }

    pub fn is_green(&self) -> bool {
        self.taint == Taint::Green
    }

    /// Resolved data-flow predecessors in order, skipping unresolved slots.
    pub fn resolved_preds(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.preds.iter().filter_map(|p| *p)
    }
}
