//! Signals, attribute headers and the serialized query tree format.

mod attribute;
pub mod interpreter;
mod query_tree;
mod signals;

pub use attribute::{AttributeHeader, FLUSH_AI_WORDS, append_value, flush_ai};
pub use query_tree::{
    KeySpec, MAX_TREE_NODES, NODE_FIXED_WORDS, OperationKind, PARAM_FIXED_WORDS, ParamBits,
    ParamFilterSpec, ParamValue, QueryNodeSpec, QueryTreeBuilder, TreeBits, TreeFilterSpec,
    WordReader, len_word, pack_list, unpack_list,
};
pub use signals::{
    Envelope, FILTER_REJECTED, FragmentCompletion, LookupConf, LookupRef, LookupReq,
    ROW_NOT_FOUND, ScanFlags, ScanFragConf, ScanFragRef, ScanFragReq, ScanNextReq, Section,
    Signal, TransIdAi,
};
