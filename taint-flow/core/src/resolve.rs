//! Mapping locations of trace records to lines of source code.
//!
//! Locations either carry file and line directly or only name the module the
//! code was loaded from. The latter are resolved through the debug info of
//! the module. Source files that moved since the program was built are
//! looked up below a root directory by name.

use crate::location::{Location, Place, SourcePos};

use hashbrown::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tracing::debug;
use walkdir::WalkDir;

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("failed to run {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no line information for {addr} in {module}")]
    Unresolved { module: PathBuf, addr: String },
}

/// Translates an address inside a module into a source position.
pub trait AddressResolver {
    fn addr2line(&mut self, module: &Path, addr: &str) -> Result<SourcePos, ResolveError>;
}

impl<R: AddressResolver + ?Sized> AddressResolver for Box<R> {
    fn addr2line(&mut self, module: &Path, addr: &str) -> Result<SourcePos, ResolveError> {
        (**self).addr2line(module, addr)
    }
}

/// Resolves addresses with the external `addr2line` tool.
#[derive(Clone, Debug)]
pub struct Addr2Line {
    program: PathBuf,
}

impl Default for Addr2Line {
    fn default() -> Self {
        Self {
            program: PathBuf::from("addr2line"),
        }
    }
}

impl Addr2Line {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl AddressResolver for Addr2Line {
    fn addr2line(&mut self, module: &Path, addr: &str) -> Result<SourcePos, ResolveError> {
        let output = Command::new(&self.program)
            .arg("-e")
            .arg(module)
            .arg(addr)
            .output()
            .map_err(|source| ResolveError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        parse_addr2line(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ResolveError::Unresolved {
                module: module.to_path_buf(),
                addr: addr.to_string(),
            }
        })
    }
}

// e.g. /src/prog/main.c:42 (discriminator 3)
fn parse_addr2line(stdout: &str) -> Option<SourcePos> {
    let first = stdout.lines().next()?.trim();
    let (file, rest) = first.rsplit_once(':')?;
    let digits: &str = match rest.find(|c: char| !c.is_ascii_digit()) {
        Some(end) => &rest[..end],
        None => rest,
    };
    let line: usize = digits.parse().ok()?;
    if file.is_empty() || file == "??" || line == 0 {
        return None;
    }
    Some(SourcePos::new(file, line))
}

/// Memoizes another resolver by `(module, address)`.
///
/// Failures are remembered as well, so the wrapped resolver is asked at most
/// once for every pair.
pub struct CachedResolver<R> {
    inner: R,
    cache: HashMap<(PathBuf, String), Option<SourcePos>>,
}

impl<R: AddressResolver> CachedResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, module: &Path, addr: &str) -> Option<SourcePos> {
        let key = (module.to_path_buf(), addr.to_string());
        if let Some(pos) = self.cache.get(&key) {
            return pos.clone();
        }

        let pos = match self.inner.addr2line(module, addr) {
            Ok(pos) => Some(pos),
            Err(err) => {
                debug!(module = %module.display(), addr, error = %err, "unresolved address");
                None
            }
        };
        self.cache.insert(key, pos.clone());
        pos
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

/// Finds files below a root directory that a stale path probably refers to.
#[derive(Debug)]
pub struct PathGuesser {
    files: Vec<PathBuf>,
}

impl PathGuesser {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let path = e.path();
                path.strip_prefix(".").unwrap_or(path).to_path_buf()
            })
            .collect();
        files.sort();
        debug!(root = %root.display(), files = files.len(), "indexed source tree");
        Self { files }
    }

    /// Files ending with the longest trailing part of `path` that matches
    /// anything at all, down to the bare file name.
    pub fn candidates(&self, path: &Path) -> Vec<&Path> {
        let parts: Vec<&std::ffi::OsStr> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();

        for start in 0..parts.len() {
            let suffix: PathBuf = parts[start..].iter().collect();
            let found: Vec<&Path> = self
                .files
                .iter()
                .filter(|f| f.ends_with(&suffix))
                .map(PathBuf::as_path)
                .collect();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }
}

/// Answers which source line a trace record stands for.
///
/// Everything is computed on demand and cached for the lifetime of the
/// database: resolved addresses, guessed paths and file contents.
pub struct SourceDb {
    resolver: CachedResolver<Box<dyn AddressResolver>>,
    root: PathBuf,
    guesser: Option<PathGuesser>,
    files: HashMap<PathBuf, Option<Vec<String>>>,
    relocated: HashMap<SourcePos, Option<PathBuf>>,
}

impl SourceDb {
    pub fn new<R: AddressResolver + 'static>(resolver: R) -> Self {
        let resolver: Box<dyn AddressResolver> = Box::new(resolver);
        Self {
            resolver: CachedResolver::new(resolver),
            root: PathBuf::from("."),
            guesser: None,
            files: HashMap::new(),
            relocated: HashMap::new(),
        }
    }

    /// Sets the directory searched for sources that are not where the debug
    /// info says they are.
    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = root.into();
        self.guesser = None;
        self
    }

    /// The source position of a location, if it can be determined.
    ///
    /// The file of the returned position might not be readable. Use
    /// `src_line` to find out.
    pub fn position(&mut self, location: &Location) -> Option<SourcePos> {
        let pos = match &location.place {
            Place::Source(pos) => pos.clone(),
            Place::Module(module) => self.resolver.resolve(module, &location.addr)?,
            Place::Unknown => return None,
        };

        if self.lines(&pos.file).is_some() {
            return Some(pos);
        }

        match self.relocate(&pos) {
            Some(file) => Some(SourcePos::new(file, pos.line)),
            None => Some(pos),
        }
    }

    /// The trimmed source text of a location.
    pub fn src_line(&mut self, location: &Location) -> Option<String> {
        let pos = self.position(location)?;
        self.line(&pos.file, pos.line).map(|text| text.trim().to_string())
    }

    fn line(&mut self, file: &Path, line: usize) -> Option<&str> {
        let index = line.checked_sub(1)?;
        self.lines(file)?.get(index).map(String::as_str)
    }

    fn lines(&mut self, file: &Path) -> Option<&Vec<String>> {
        if !self.files.contains_key(file) {
            let lines = match std::fs::read_to_string(file) {
                Ok(text) => Some(text.lines().map(String::from).collect()),
                Err(err) => {
                    debug!(file = %file.display(), error = %err, "cannot read source");
                    None
                }
            };
            self.files.insert(file.to_path_buf(), lines);
        }
        self.files.get(file).and_then(Option::as_ref)
    }

    fn relocate(&mut self, pos: &SourcePos) -> Option<PathBuf> {
        if let Some(found) = self.relocated.get(pos) {
            return found.clone();
        }

        let root = &self.root;
        let candidates: Vec<PathBuf> = self
            .guesser
            .get_or_insert_with(|| PathGuesser::new(root))
            .candidates(&pos.file)
            .into_iter()
            .map(Path::to_path_buf)
            .collect();

        let found = candidates
            .into_iter()
            .find(|cand| self.line(cand, pos.line).is_some());
        if let Some(file) = found.as_ref() {
            debug!(from = %pos.file.display(), to = %file.display(), "relocated source");
        }
        self.relocated.insert(pos.clone(), found.clone());
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counting {
        calls: Rc<Cell<usize>>,
        answer: Option<SourcePos>,
    }

    impl AddressResolver for Counting {
        fn addr2line(&mut self, module: &Path, addr: &str) -> Result<SourcePos, ResolveError> {
            self.calls.set(self.calls.get() + 1);
            self.answer.clone().ok_or_else(|| ResolveError::Unresolved {
                module: module.to_path_buf(),
                addr: addr.to_string(),
            })
        }
    }

    #[test]
    fn addr2line_output() {
        assert_eq!(
            parse_addr2line("/src/prog/main.c:42\n"),
            Some(SourcePos::new("/src/prog/main.c", 42))
        );
        assert_eq!(
            parse_addr2line("main.c:7 (discriminator 3)\n"),
            Some(SourcePos::new("main.c", 7))
        );
        assert_eq!(parse_addr2line("??:0\n"), None);
        assert_eq!(parse_addr2line("??:?\n"), None);
        assert_eq!(parse_addr2line(""), None);
    }

    #[test]
    fn cache_remembers_failures() {
        let calls = Rc::new(Cell::new(0));
        let mut cache = CachedResolver::new(Counting {
            calls: calls.clone(),
            answer: None,
        });
        assert_eq!(cache.resolve(Path::new("/bin/prog"), "0x10"), None);
        assert_eq!(cache.resolve(Path::new("/bin/prog"), "0x10"), None);
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.resolve(Path::new("/bin/prog"), "0x20"), None);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn guess_by_longest_suffix() {
        let guesser = PathGuesser {
            files: vec![
                PathBuf::from("lib/util.c"),
                PathBuf::from("src/main.c"),
                PathBuf::from("test/main.c"),
            ],
        };
        assert_eq!(
            guesser.candidates(Path::new("/build/prog/src/main.c")),
            vec![Path::new("src/main.c")]
        );
        assert_eq!(
            guesser.candidates(Path::new("/elsewhere/main.c")),
            vec![Path::new("src/main.c"), Path::new("test/main.c")]
        );
        assert!(guesser.candidates(Path::new("missing.c")).is_empty());
    }

    #[test]
    fn unknown_locations_have_no_source() {
        let mut db = SourceDb::new(Addr2Line::default());
        assert_eq!(db.position(&Location::unknown()), None);
        assert_eq!(db.src_line(&Location::unknown()), None);
    }
}
