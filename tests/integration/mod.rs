//! Integration test modules
//!
//! - `builder`: graph construction and the node id contract
//! - `optimizer`: optimization passes on realistic graphs
//! - `context`: execution state machine and run control
//! - `pipeline`: `VoicePipeline` end to end

pub mod builder;
pub mod context;
pub mod optimizer;
pub mod pipeline;
