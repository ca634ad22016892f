// Life of a request:
// 1. A lookup or fragment scan request arrives carrying a serialized query tree
// 2. The tree is parsed into per-node operations inside a request arena
// 3. The root operation is sent to the local storage layer
// 4. Every row delivered back here fans out into child lookups, whose keys
//    are built from the row
// 5. Rows for the caller go straight to it; completions are counted here
//    and reported once per lookup, or once per scan batch
// 6. When no node has anything outstanding the request is torn down
//
// System components:
//  - Pattern engine (key and parameter construction)
//  - Request store (generational slab, arenas, registries)
//  - Tree builder
//  - Lookup and fragment scan operations
//  - Completion coordinator

pub mod config;
pub mod distribution;
pub mod error;
pub mod exec;
pub mod host;
pub mod pattern;
pub mod protocol;
pub mod simulation;
pub mod store;
pub mod types;

#[cfg(test)]
mod e2e_tests;

pub use config::BlockConfig;
pub use distribution::{Distribution, HashDistribution};
pub use error::SpjError;
pub use exec::Spj;
