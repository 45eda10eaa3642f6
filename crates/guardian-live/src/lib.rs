//! guardian-live — the live risk map behind the Guardian-IO workspace.
//!
//! Keeps a mounted view in sync with the store's change feed: new ESG
//! metrics, risk zones and supply-chain nodes arrive as row inserts, are
//! buffered for the table views, and are projected onto map layers.
//!
//! # Architecture
//!
//! ```text
//! LiveMapView::mount()
//!   ├── MapRenderer::init()          ← acquired first
//!   │     └── MapEngine (LayerEngine in the daemon)
//!   ├── ChangeFeedSubscriber::subscribe() per table
//!   │     ├── reconnect with exponential backoff
//!   │     └── discard redelivered commit sequences
//!   ├── InitialLoader::load()        ← async, guarded by `active`
//!   │
//!   ├── MetricBuffer<MetricRecord>   bounded by count and age
//!   ├── MetricBuffer<RiskZone>
//!   └── Notifier → toasts
//!
//! MountedView::unmount()
//!   ├── unsubscribe (reverse order)
//!   └── MapRenderer::destroy()       ← released last, exactly once
//! ```
//!
//! Both the table views and the map colour risk through
//! [`projector::project`], so a row looks the same everywhere.

pub mod backoff;
pub mod buffer;
pub mod error;
pub mod feed;
pub mod map;
pub mod notify;
pub mod projector;
pub mod view;

pub use buffer::MetricBuffer;
pub use error::{LiveError, LiveResult};
pub use feed::{ChangeFeedSubscriber, ChangeSource, FeedStatus, ReconnectPolicy, Subscription};
pub use map::{Container, Coordinate, LayerEngine, MapEngine, MapRenderer, MapStyle, Marker};
pub use notify::{Notifier, Toast, ToastLevel};
pub use projector::{RiskBucket, RiskProjection, project};
pub use view::{InitialData, InitialLoader, LiveMapView, LoadState, MountedView, ViewConfig, ViewSnapshot};
