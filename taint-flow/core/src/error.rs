use crate::export::ExportError;

#[derive(thiserror::Error, Debug)]
pub enum TaintflowError {
    #[error("duplicated definition of {var} in lines {first} and {second}")]
    DuplicateDefinition {
        var: String,
        first: usize,
        second: usize,
    },

    #[error("line {line} defines two different variables: {first} != {second}")]
    ConflictingDefinition {
        line: usize,
        first: String,
        second: String,
    },

    #[error("invalid opcode rules")]
    Rules(#[source] serde_json::Error),

    #[error(transparent)]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Export(#[from] ExportError),
}
