//! Identifier types shared by every module of the block.

mod ids;

pub use ids::{
    BlockNumber, BlockRef, MAX_DATA_NODE_ID, NodeBitmask, NodeId, NodeNo, NodePtr, RequestHandle,
    RequestKey, TransId,
};
