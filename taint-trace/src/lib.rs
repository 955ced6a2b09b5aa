use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use taintflow::error::TaintflowError;
use taintflow::export::ExportError;
use taintflow::filter::{
    FilterChain, SuppressFunctions, SuppressLibraries, SuppressTemporaries, UniqueLocations,
};

pub mod printer;

#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("no such taint log: {0}")]
    MissingInput(String),

    #[error("IO Error:")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Taintflow(#[from] TaintflowError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Reads the whole taint log, from stdin if `input` is `-`.
///
/// The lines are kept around since some output modes print the log again.
pub fn read_log(input: &str) -> Result<Vec<String>, RuntimeError> {
    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(io::stdin().lock())
    } else {
        if !Path::new(input).is_file() {
            return Err(RuntimeError::MissingInput(input.to_string()));
        }
        Box::new(BufReader::new(File::open(input)?))
    };

    let lines = reader.lines().collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(input, lines = lines.len(), "read taint log");
    Ok(lines)
}

/// Which records are hidden from printed traces.
#[derive(Copy, Clone, Debug, Default)]
pub struct FilterOptions {
    pub libs: bool,
    pub tmp_instr: bool,
    pub unique_locs: bool,
}

impl FilterOptions {
    /// A fresh filter chain. Unique locations are tracked per chain, so every
    /// sink needs its own.
    pub fn chain(&self) -> FilterChain {
        let mut chain = FilterChain::new().with(SuppressFunctions::wrappers());
        if !self.tmp_instr {
            chain.push(SuppressTemporaries);
        }
        if !self.libs {
            chain.push(SuppressLibraries);
        }
        if self.unique_locs {
            chain.push(UniqueLocations::default());
        }
        chain
    }
}
