use taintflow_core::filter::{SuppressLibraries, TraceFilter};
use taintflow_core::prelude::*;
use taintflow_core::resolve::ResolveError;

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Resolves every address to the same position and counts the lookups.
struct Counting {
    calls: Rc<Cell<usize>>,
    answer: SourcePos,
}

impl AddressResolver for Counting {
    fn addr2line(&mut self, _: &Path, _: &str) -> Result<SourcePos, ResolveError> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.answer.clone())
    }
}

fn source_tree() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("src")).unwrap();
    fs::write(
        root.path().join("src/prog.c"),
        "int main(void) {\n    char *p = buf;\n    return (long)p & 7;\n}\n",
    )
    .unwrap();
    root
}

#[test]
fn module_addresses_are_resolved_once() {
    let root = source_tree();
    let calls = Rc::new(Cell::new(0));
    let mut db = SourceDb::new(Counting {
        calls: calls.clone(),
        answer: SourcePos::new(root.path().join("src/prog.c"), 3),
    })
    .with_root(root.path());

    let location = Location::parse("0x4005D2: main (in /usr/local/bin/prog)");
    assert_eq!(location.module(), Some(&PathBuf::from("/usr/local/bin/prog")));

    let first = db.src_line(&location);
    let second = db.src_line(&location);
    assert_eq!(first.as_deref(), Some("return (long)p & 7;"));
    assert_eq!(first, second);
    assert_eq!(db.position(&location), db.position(&location));
    assert_eq!(calls.get(), 1);
}

#[test]
fn moved_sources_are_found_by_name() {
    let root = source_tree();
    let mut db = SourceDb::new(Addr2Line::default()).with_root(root.path());

    let location = Location::parse("0x400596: main (/build/prog/src/prog.c:2)");
    let pos = db.position(&location).unwrap();
    assert_eq!(pos, SourcePos::new(root.path().join("src/prog.c"), 2));
    assert_eq!(db.src_line(&location).as_deref(), Some("char *p = buf;"));

    // the guessed file is too short for this one
    let location = Location::parse("0x400596: main (/build/prog/src/prog.c:40)");
    assert_eq!(db.src_line(&location), None);
}

#[test]
fn library_code_is_suppressed() {
    let root = source_tree();
    let mut db = SourceDb::new(Addr2Line::default()).with_root(root.path());
    let graph = Graph::from_lines(
        [
            "0x400596: main (/build/prog/src/prog.c:2) | GET:I64 | - | - | t1_1",
            "0x4F0010: memcpy (in /usr/lib/libc.so.6) | t2_1 = 64to32 t1_1 | - | - | t2_1 <- t1_1",
        ],
        &BuildOptions::default(),
    )
    .unwrap();

    let mut filter = SuppressLibraries;
    let user = graph.at_line(1).unwrap();
    assert!(filter.accept(&graph[user], &mut db));

    // resolving fails with the bogus module path, so it stays hidden
    let lib = graph.at_line(2).unwrap();
    let mut failing = SourceDb::new(Failing).with_root(root.path());
    assert!(!filter.accept(&graph[lib], &mut failing));
}

struct Failing;

impl AddressResolver for Failing {
    fn addr2line(&mut self, module: &Path, addr: &str) -> Result<SourcePos, ResolveError> {
        Err(ResolveError::Unresolved {
            module: module.to_path_buf(),
            addr: addr.to_string(),
        })
    }
}
