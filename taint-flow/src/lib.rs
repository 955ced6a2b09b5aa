pub use taintflow_core::{error, filter, graph, lattice, record, resolve, rules, search};

pub use taintflow_core::Index;

pub mod trace {
    pub use taintflow_core::location::*;
    pub use taintflow_core::parse::*;
}

pub mod prelude {
    pub use taintflow_core::prelude::*;
}

pub mod export {
    pub use taintflow_core::export::{ExportError, Message, TraceExport};

    #[cfg(feature = "exportjsonl")]
    pub use taintflow_jsonl as jsonl;
}
