//! # Hoverlens
//!
//! Live DOM element tracking for AI agents.
//!
//! Hoverlens follows the pointer over a Chrome tab through the DevTools
//! Protocol, highlights the node underneath, and on request turns it into a
//! structured description: tag, attributes, text, geometry, a bounded copy
//! of its own data properties, its React component ancestry and the frame it
//! lives in.
//!
//! ## Features
//!
//! - **On-demand attach** - The debugger is attached only while a selection
//!   session runs or a request needs it
//! - **Multi-frame** - Frames and execution contexts are tracked from the
//!   event feed; handles are cached per context and dropped with it
//! - **Two worlds** - DOM reads run in an isolated world, framework
//!   internals are read from the page's main world
//! - **Partial results** - A failing step never discards what earlier steps
//!   gathered
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hoverlens::{ElementTracker, TrackerConfig, WsTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (transport, events) = WsTransport::new("ws://127.0.0.1:9222/devtools/page/TAB");
//!     let tracker = ElementTracker::new(Arc::new(transport), TrackerConfig::for_tab("TAB"));
//!     tracker.spawn_event_pump(events);
//!
//!     let mut hover = tracker.subscribe_hover();
//!     tracker.set_context_selection(true).await;
//!     tracker.update_mouse_position(200.0, 120.0).await;
//!
//!     while let Ok(Some(id)) = hover.recv().await {
//!         if let Some(info) = tracker.collect_hovered_element_info().await {
//!             println!("{} <{}> {:?}", id, info.node_type, info.component_names());
//!             break;
//!         }
//!     }
//!
//!     tracker.dispose().await;
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use std::time::Duration;
//! use hoverlens::TrackerConfig;
//!
//! let config = TrackerConfig {
//!     poll_interval: Duration::from_millis(50),
//!     text_limit: 500,
//!     ..TrackerConfig::for_tab("TAB")
//! };
//! assert_eq!(config.handle_cache_capacity, 1000);
//! ```

use std::time::Duration;

pub mod cache;
pub mod cdp;
pub mod error;
pub mod extract;
pub mod frames;
pub mod hover;
pub mod react;
pub mod scripts;
pub mod tracker;

// Re-exports
pub use cache::ObjectHandleCache;
pub use cdp::{CdpMessage, DebuggerTransport, Session, WsTransport};
pub use error::{Error, Result};
pub use extract::{BoundingBox, ExtractedElementInfo, PropertyLimits};
pub use frames::{FrameRecord, FrameRegistry, World};
pub use hover::HoverState;
pub use react::{build_ancestry, ComponentAncestryNode, ComponentTreeWalker, FiberSample};
pub use tracker::{ElementTracker, SelectedElement};

/// Configuration for one tracker
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Tab this tracker watches, matched against `update_highlights`
    pub tab_id: String,
    /// Hit-test period while a selection session is active
    pub poll_interval: Duration,
    /// Maximum cached object handles
    pub handle_cache_capacity: usize,
    /// Name of the isolated world scripts run in
    pub isolated_world_name: String,
    /// Maximum fibers sampled up the `return` chain
    pub max_fiber_hops: u32,
    /// DOM ancestors searched for a fiber when the node has none
    pub max_dom_ancestors: u32,
    /// Bounds on the own-property copy
    pub property_limits: PropertyLimits,
    /// Maximum characters of text content
    pub text_limit: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tab_id: String::new(),
            poll_interval: Duration::from_millis(100),
            handle_cache_capacity: 1000,
            isolated_world_name: "hoverlens".to_string(),
            max_fiber_hops: 30,
            max_dom_ancestors: 5,
            property_limits: PropertyLimits::default(),
            text_limit: 2000,
        }
    }
}

impl TrackerConfig {
    /// Default config for a tab
    pub fn for_tab(tab_id: impl Into<String>) -> Self {
        Self {
            tab_id: tab_id.into(),
            ..Default::default()
        }
    }
}
