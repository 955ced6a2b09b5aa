use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;

// e.g. 0x40080D: main (two-taints.c:10)
static RE_LOC_SOURCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0x\w+): (.+?) \((.+):(\d+)\)$").unwrap());

// e.g. 0x40080D: main (in /tmp/a.out)
static RE_LOC_MODULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(0x\w+): (.+?) \(in (.+)\)$").unwrap());

/// A resolved source position.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct SourcePos {
    pub file: PathBuf,
    pub line: usize,
}

impl SourcePos {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// Where the code of a location lives, as far as the trace tells.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Place {
    /// The trace already carries file and line.
    Source(SourcePos),
    /// Only the module is known; the line has to be resolved from the address.
    Module(PathBuf),
    Unknown,
}

/// The location field of a trace line.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Location {
    pub addr: String,
    pub func: String,
    pub place: Place,
}

impl Location {
    pub fn unknown() -> Self {
        Self {
            addr: String::new(),
            func: String::new(),
            place: Place::Unknown,
        }
    }

    /// Parses `addr: func (file:line)` or `addr: func (in module)`.
    ///
    /// Anything else yields a location with `Place::Unknown`; such records
    /// still take part in the graph, they just cannot be rendered as source.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(cap) = RE_LOC_SOURCE.captures(text) {
            if let Ok(line) = cap[4].parse::<usize>() {
                return Self {
                    addr: cap[1].to_string(),
                    func: cap[2].to_string(),
                    place: Place::Source(SourcePos::new(&cap[3], line)),
                };
            }
        }

        if let Some(cap) = RE_LOC_MODULE.captures(text) {
            return Self {
                addr: cap[1].to_string(),
                func: cap[2].to_string(),
                place: Place::Module(PathBuf::from(&cap[3])),
            };
        }

        tracing::debug!(location = text, "could not parse location");
        Self::unknown()
    }

    /// The parsed source position, if the trace carried one.
    pub fn source(&self) -> Option<&SourcePos> {
        match &self.place {
            Place::Source(pos) => Some(pos),
            _ => None,
        }
    }

    pub fn module(&self) -> Option<&PathBuf> {
        match &self.place {
            Place::Module(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.place {
            Place::Source(pos) => write!(f, "{}: {} ({})", self.addr, self.func, pos),
            Place::Module(path) => write!(f, "{}: {} (in {})", self.addr, self.func, path.display()),
            Place::Unknown => write!(f, "<unknown>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_source_location() {
        let loc = Location::parse("0x40080D: main (two-taints.c:10)");
        assert_eq!(loc.addr, "0x40080D");
        assert_eq!(loc.func, "main");
        assert_eq!(loc.source(), Some(&SourcePos::new("two-taints.c", 10)));
    }

    #[test]
    fn parse_module_location() {
        let loc = Location::parse("0x40080D: main (in /tmp/a.out)");
        assert_eq!(loc.func, "main");
        assert_eq!(loc.source(), None);
        assert_eq!(loc.module(), Some(&PathBuf::from("/tmp/a.out")));
    }

    #[test]
    fn parse_function_with_spaces() {
        let loc = Location::parse("0x4005D2: operator new(unsigned long) (new_op.cc:52)");
        assert_eq!(loc.func, "operator new(unsigned long)");
        assert_eq!(loc.source(), Some(&SourcePos::new("new_op.cc", 52)));
    }

    #[test]
    fn garbage_is_unknown() {
        let loc = Location::parse("not a location");
        assert_eq!(loc.place, Place::Unknown);
        assert_eq!(loc.to_string(), "<unknown>");
    }
}
