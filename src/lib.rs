//! # Flash-Depth
//!
//! Aggregated market depth for many instruments, kept in price order and
//! readable while a single writer applies a live feed.
//!
//! ## Design Principles
//!
//! - **Arena Nodes**: each side is a doubly-linked chain of 32-bit indices
//!   into a per-instrument node pool; freed nodes are recycled, not dropped
//! - **One Lock per Book**: readers and the writer serialize on a short
//!   mutex, and blocked readers are woken by a broadcast on change
//! - **Validate, then Replace**: a snapshot never half-applies
//! - **Ordered Application**: updates can be buffered and re-sorted by
//!   update id or time before they touch the book
//!
//! ## Architecture
//!
//! ```text
//! [Transport] --> FeedEvent --> [Engine] --> [UpdatePipeline] --> [DepthRegistry]
//!                                                                    |
//!                                             (exchange, instrument, segment) -> Depth
//!                                                                    |
//!                                            [Readers: retrieve / wait / change feed]
//! ```

pub mod arena;
pub mod config;
pub mod depth;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod replay;
pub mod side_list;
pub mod signal;
pub mod update;
pub mod validator;

// Re-exports for convenience
pub use arena::{Node, NodeIndex, NodePool, NULL_INDEX};
pub use config::PipelineConfig;
pub use depth::{Depth, DepthHandle, Options};
pub use engine::{Engine, EngineStats, FeedEvent};
pub use error::{DepthError, PipelineError, ReplayError, ValidationError};
pub use pipeline::UpdatePipeline;
pub use registry::{ChangeFeed, DepthRegistry};
pub use replay::ReplayReader;
pub use side_list::SideList;
pub use signal::Wake;
pub use update::{Action, Identifier, Level, MarketSegment, Side, Snapshot, Update};
