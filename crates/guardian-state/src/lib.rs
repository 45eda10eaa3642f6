//! guardian-state — embedded relational store for Guardian-IO.
//!
//! Backed by [redb](https://docs.rs/redb), it stands in for the hosted
//! relational store the workspace talks to: named tables of JSON rows with
//! insert, update, delete and list, plus a publish/subscribe change feed.
//!
//! # Architecture
//!
//! ```text
//! StateStore
//!   ├── esg_metrics / risk_zones / supply_chain_nodes / supply_chain_routes
//!   │     key = row id, value = JSON { seq, row }
//!   ├── meta: last committed sequence number
//!   └── ChangeFeed
//!         ├── broadcast of ChangeEvent, published after each commit
//!         ├── bounded backlog for resume-after-sequence
//!         └── process-unique channel names
//! ```
//!
//! Every mutation is assigned a monotonically increasing commit sequence.
//! Events are published in sequence order, so a subscriber that tracks the
//! last sequence it saw can both resume after a disconnect and discard
//! redelivered events.

pub mod error;
pub mod feed;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use feed::{ChangeFeed, ChangeFilter, FeedError, FeedReceiver};
pub use store::StateStore;
pub use types::*;
