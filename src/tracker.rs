//! Element Tracker
//!
//! One [`ElementTracker`] watches one tab. It attaches the debugger only
//! while something needs it, polls the pointer position against the page
//! while a selection session is active, and turns the hovered node into an
//! [`ExtractedElementInfo`] on request.
//!
//! Public operations never fail: lower-layer errors are logged and mapped
//! to `None`/`false`, and the extraction pipeline returns whatever it
//! managed to gather.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hoverlens::{ElementTracker, TrackerConfig, WsTransport};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (transport, events) = WsTransport::new("ws://127.0.0.1:9222/devtools/page/ABC");
//! let tracker = ElementTracker::new(Arc::new(transport), TrackerConfig::for_tab("ABC"));
//! tracker.spawn_event_pump(events);
//!
//! tracker.set_context_selection(true).await;
//! tracker.update_mouse_position(120.0, 48.0).await;
//! tracker.hit_test_once().await;
//! if let Some(info) = tracker.collect_hovered_element_info().await {
//!     println!("{} in {}", info.node_type, info.frame_url);
//! }
//! tracker.dispose().await;
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::ObjectHandleCache;
use crate::cdp::types::{CallArgument, FrameTree};
use crate::cdp::{
    BackendNodeId, CdpMessage, DebuggerTransport, ExecutionContextId, PageEvent, Session,
};
use crate::error::{Error, Result};
use crate::extract::{self, ExtractedElementInfo};
use crate::frames::{FrameRecord, FrameRegistry, World};
use crate::hover::{self, HitTestOutcome, HoverState, HoverTransition};
use crate::react::ComponentTreeWalker;
use crate::scripts::{
    self, PageScript, DOCUMENT_TITLE, HIDE_SELECTION, IS_CONNECTED, SCROLL_INTO_VIEW,
    SHOW_SELECTION,
};
use crate::TrackerConfig;

/// Buffered hover notifications per subscriber
const HOVER_CHANNEL_CAPACITY: usize = 64;

/// An element selected in the chat, outlined while its tab is active
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedElement {
    pub element_id: String,
    pub frame_id: String,
    pub tab_id: String,
}

struct TrackerState {
    connected: bool,
    selection_active: bool,
    mouse: Option<(f64, f64)>,
    hover: Option<HoverState>,
    /// Bumped whenever a session starts or ends
    epoch: u64,
    registry: FrameRegistry,
    cache: ObjectHandleCache,
    poll: Option<JoinHandle<()>>,
    /// Element id to frame id of every selection overlay drawn
    outlined: HashMap<String, String>,
}

impl TrackerState {
    fn stop_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
    }

    fn forget_page(&mut self) {
        self.registry.clear();
        self.cache.clear();
    }

    /// Clear the hover if it lives in `frame_id`
    fn clear_hover_in(&mut self, frame_id: &str) -> bool {
        if self.hover.as_ref().is_some_and(|h| h.frame_id == frame_id) {
            self.hover = None;
            true
        } else {
            false
        }
    }
}

struct Inner {
    session: Session,
    config: TrackerConfig,
    state: Mutex<TrackerState>,
    /// Serializes attach and detach
    connect_gate: Mutex<()>,
    walker: ComponentTreeWalker,
    hover_tx: broadcast::Sender<Option<String>>,
    /// Public operations currently running; detach waits for zero
    in_flight: AtomicUsize,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().stop_poll();
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn tree_has_frame(tree: &FrameTree, frame_id: &str, url: &str) -> bool {
    (tree.frame.id == frame_id && tree.frame.url == url)
        || tree
            .child_frames
            .iter()
            .any(|child| tree_has_frame(child, frame_id, url))
}

/// Live element tracker for one tab
#[derive(Clone)]
pub struct ElementTracker {
    inner: Arc<Inner>,
}

impl ElementTracker {
    /// Create a tracker over a transport. Nothing is attached until needed.
    pub fn new(transport: Arc<dyn DebuggerTransport>, config: TrackerConfig) -> Self {
        let (hover_tx, _) = broadcast::channel(HOVER_CHANNEL_CAPACITY);
        let state = TrackerState {
            connected: false,
            selection_active: false,
            mouse: None,
            hover: None,
            epoch: 0,
            registry: FrameRegistry::new(config.isolated_world_name.clone()),
            cache: ObjectHandleCache::new(config.handle_cache_capacity),
            poll: None,
            outlined: HashMap::new(),
        };
        let walker = ComponentTreeWalker::new(config.max_fiber_hops, config.max_dom_ancestors);

        Self {
            inner: Arc::new(Inner {
                session: Session::new(transport),
                config,
                state: Mutex::new(state),
                connect_gate: Mutex::new(()),
                walker,
                hover_tx,
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Get the tracker configuration
    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Get the underlying CDP session
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Receive hover changes: the new element id, or `None` when cleared
    pub fn subscribe_hover(&self) -> broadcast::Receiver<Option<String>> {
        self.inner.hover_tx.subscribe()
    }

    fn emit_hover(&self, element_id: Option<String>) {
        tracing::debug!("Hover changed: {:?}", element_id);
        // No subscribers is fine
        let _ = self.inner.hover_tx.send(element_id);
    }

    /// Run a public operation, then detach if nothing else needs the debugger
    async fn tracked<T>(&self, op: impl Future<Output = T>) -> T {
        let output = {
            let _in_flight = InFlight::enter(&self.inner.in_flight);
            op.await
        };
        self.check_disconnect().await;
        output
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Attach and enable domains unless already done.
    ///
    /// Returns false without attaching while the target is destroyed or
    /// still loading; callers retry later. A failed setup leaves the tracker
    /// disconnected so the next call starts over.
    pub async fn ensure_connected(&self) -> bool {
        let _gate = self.inner.connect_gate.lock().await;
        if self.inner.state.lock().await.connected {
            return true;
        }

        if let Err(e) = self.target_ready() {
            tracing::debug!("Not attaching: {}", e);
            return false;
        }
        let transport = self.inner.session.transport();

        match self.initialize().await {
            Ok(()) => {
                tracing::debug!("Debugger attached");
                true
            }
            Err(e) => {
                tracing::warn!("Debugger setup failed: {}", e);
                {
                    let mut state = self.inner.state.lock().await;
                    state.connected = false;
                    state.forget_page();
                }
                if transport.is_attached() {
                    if let Err(e) = transport.detach().await {
                        tracing::debug!("Detach after failed setup failed: {}", e);
                    }
                }
                false
            }
        }
    }

    fn target_ready(&self) -> Result<()> {
        let transport = self.inner.session.transport();
        if transport.is_target_destroyed() {
            return Err(Error::TargetUnavailable("destroyed".to_string()));
        }
        if transport.is_loading() {
            return Err(Error::TargetUnavailable("still loading".to_string()));
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        let session = &self.inner.session;
        if !session.transport().is_attached() {
            session.transport().attach().await?;
        }
        session.enable_domains().await?;
        let tree = session.get_frame_tree().await?;

        let mut state = self.inner.state.lock().await;
        state.registry.apply_frame_tree(&tree);
        state.connected = true;
        Ok(())
    }

    /// Detach if no selection session is active and no operation is running
    pub async fn check_disconnect(&self) {
        let _gate = self.inner.connect_gate.lock().await;
        {
            let mut state = self.inner.state.lock().await;
            if !state.connected || state.selection_active {
                return;
            }
            let in_flight = self.inner.in_flight.load(Ordering::SeqCst);
            if in_flight > 0 {
                tracing::trace!("Detach deferred, {} operation(s) in flight", in_flight);
                return;
            }
            state.connected = false;
            state.forget_page();
        }

        self.inner.walker.reset_initialization().await;
        if let Err(e) = self.inner.session.transport().detach().await {
            tracing::debug!("Detach failed: {}", e);
        }
        tracing::debug!("Debugger detached (idle)");
    }

    /// The debugger was detached by someone else (e.g. the user opened
    /// devtools). Resets every piece of derived state.
    pub async fn handle_external_detach(&self) {
        let cleared = {
            let mut state = self.inner.state.lock().await;
            state.connected = false;
            state.selection_active = false;
            state.mouse = None;
            state.epoch += 1;
            state.stop_poll();
            state.forget_page();
            state.outlined.clear();
            state.hover.take()
        };
        self.inner.walker.reset_initialization().await;
        tracing::debug!("Debugger detached externally, tracker reset");

        if cleared.is_some() {
            self.emit_hover(None);
        }
    }

    /// Whether the debugger is attached and initialized
    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.connected
    }

    /// Stop everything and detach
    pub async fn dispose(&self) {
        self.set_context_selection(false).await;

        let _gate = self.inner.connect_gate.lock().await;
        let was_connected = {
            let mut state = self.inner.state.lock().await;
            state.stop_poll();
            state.mouse = None;
            state.outlined.clear();
            state.forget_page();
            std::mem::replace(&mut state.connected, false)
        };
        self.inner.walker.reset_initialization().await;
        if was_connected {
            if let Err(e) = self.inner.session.transport().detach().await {
                tracing::debug!("Detach on dispose failed: {}", e);
            }
        }
        tracing::debug!("Tracker disposed");
    }

    // =========================================================================
    // Selection session and hit-testing
    // =========================================================================

    /// Start or stop a selection session. Repeating the current state is a no-op.
    pub async fn set_context_selection(&self, active: bool) {
        if active {
            {
                let mut state = self.inner.state.lock().await;
                if state.selection_active {
                    return;
                }
                state.selection_active = true;
                state.epoch += 1;
                state.poll = Some(Self::spawn_poll(
                    Arc::downgrade(&self.inner),
                    self.inner.config.poll_interval,
                ));
            }
            tracing::debug!("Selection session started");
            if !self.ensure_connected().await {
                tracing::debug!("Not connected yet, ticks will retry");
            }
        } else {
            let previous = {
                let mut state = self.inner.state.lock().await;
                if !state.selection_active {
                    return;
                }
                state.selection_active = false;
                state.epoch += 1;
                state.stop_poll();
                state.mouse = None;
                state.hover.take()
            };
            tracing::debug!("Selection session ended");
            if previous.is_some() {
                self.hide_highlight().await;
                self.emit_hover(None);
            }
            self.check_disconnect().await;
        }
    }

    /// Whether a selection session is active
    pub async fn is_selection_active(&self) -> bool {
        self.inner.state.lock().await.selection_active
    }

    fn spawn_poll(inner: Weak<Inner>, period: Duration) -> JoinHandle<()> {
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                ElementTracker { inner }.hit_test_once().await;
            }
        })
    }

    /// Record the pointer position in viewport CSS pixels
    pub async fn update_mouse_position(&self, x: f64, y: f64) {
        self.inner.state.lock().await.mouse = Some((x, y));
    }

    /// Forget the pointer position; ticks idle until a new one arrives
    pub async fn clear_mouse_position(&self) {
        self.inner.state.lock().await.mouse = None;
    }

    /// Id of the hovered element, if any
    pub async fn currently_hovered_element_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .await
            .hover
            .as_ref()
            .map(HoverState::element_id)
    }

    async fn is_still_hovered(&self, target: &HoverState) -> bool {
        self.inner
            .state
            .lock()
            .await
            .hover
            .as_ref()
            .is_some_and(|h| h.same_node(target))
    }

    async fn hide_highlight(&self) {
        if let Err(e) = self.inner.session.hide_highlight().await {
            tracing::debug!("Hide highlight failed: {}", e);
        }
    }

    /// Run one hit-test tick now. The poll timer calls this.
    pub async fn hit_test_once(&self) {
        let (epoch, mouse, connected) = {
            let state = self.inner.state.lock().await;
            if !state.selection_active {
                return;
            }
            let Some(mouse) = state.mouse else {
                return;
            };
            (state.epoch, mouse, state.connected)
        };
        if !connected && !self.ensure_connected().await {
            return;
        }

        let session = &self.inner.session;
        let located = match session.scroll_offset().await {
            Ok((scroll_x, scroll_y)) => {
                session
                    .get_node_for_location(mouse.0 + scroll_x, mouse.1 + scroll_y)
                    .await
            }
            Err(e) => Err(e),
        };

        let mut lost_connection = false;
        let transition = {
            let mut state = self.inner.state.lock().await;
            if state.epoch != epoch || !state.selection_active {
                tracing::trace!("Discarding hit-test result from an ended session");
                return;
            }
            let outcome = HitTestOutcome::classify(located, state.registry.main_frame_id());
            let transition = hover::next_transition(state.hover.as_ref(), &outcome);
            match &transition {
                HoverTransition::Moved { next, .. } => state.hover = Some(next.clone()),
                HoverTransition::Cleared(_) => state.hover = None,
                HoverTransition::StopPolling => {
                    if state.mouse == Some(mouse) {
                        state.mouse = None;
                    }
                }
                HoverTransition::Abandoned => {
                    if let HitTestOutcome::Failed(e) = &outcome {
                        tracing::warn!("Hit-test failed: {}", e);
                        // Channel dropped without an event; the next tick reattaches
                        if e.is_transport() {
                            state.connected = false;
                            state.forget_page();
                            lost_connection = true;
                        }
                    }
                }
                HoverTransition::Unchanged => {}
            }
            transition
        };
        if lost_connection {
            self.inner.walker.reset_initialization().await;
        }

        match transition {
            HoverTransition::Moved { previous, next } => {
                if previous.is_some() {
                    self.hide_highlight().await;
                }
                if !self.is_still_hovered(&next).await {
                    return;
                }
                if let Err(e) = session.highlight_node(next.backend_node_id).await {
                    tracing::debug!("Highlight failed: {}", e);
                }
                self.emit_hover(Some(next.element_id()));
            }
            HoverTransition::Cleared(_) => {
                self.hide_highlight().await;
                self.emit_hover(None);
            }
            HoverTransition::StopPolling => {
                tracing::debug!("No node under pointer, waiting for it to move");
            }
            HoverTransition::Unchanged | HoverTransition::Abandoned => {}
        }
    }

    // =========================================================================
    // Handles and contexts
    // =========================================================================

    async fn known_context(&self, frame_id: &str, world: World) -> Result<ExecutionContextId> {
        self.inner
            .state
            .lock()
            .await
            .registry
            .context(frame_id, world)
            .ok_or_else(|| Error::ContextNotFound {
                frame_id: frame_id.to_string(),
                world: world.as_str(),
            })
    }

    /// Context to resolve into. The main world falls back to the frame's
    /// default (`None`); a missing isolated world is created.
    async fn context_for(&self, frame_id: &str, world: World) -> Result<Option<ExecutionContextId>> {
        {
            let state = self.inner.state.lock().await;
            if state.registry.frame(frame_id).is_none() {
                return Err(Error::FrameNotFound(frame_id.to_string()));
            }
            if let Some(context_id) = state.registry.context(frame_id, world) {
                return Ok(Some(context_id));
            }
        }

        match world {
            World::Main => Ok(None),
            World::Isolated => {
                let context_id = self
                    .inner
                    .session
                    .create_isolated_world(frame_id, &self.inner.config.isolated_world_name)
                    .await?;
                let mut state = self.inner.state.lock().await;
                if state.registry.frame(frame_id).is_none() {
                    return Err(Error::FrameNotFound(frame_id.to_string()));
                }
                state.registry.set_context(frame_id, World::Isolated, context_id);
                tracing::debug!("Created isolated world {} in frame {}", context_id, frame_id);
                Ok(Some(context_id))
            }
        }
    }

    /// Resolve a node to a handle in one of its frame's worlds, through the cache
    async fn resolve_handle(
        &self,
        frame_id: &str,
        world: World,
        backend_node_id: BackendNodeId,
    ) -> Result<(String, Option<ExecutionContextId>)> {
        let context_id = self.context_for(frame_id, world).await?;

        if let Some(ctx) = context_id {
            let cached = self
                .inner
                .state
                .lock()
                .await
                .cache
                .get(backend_node_id, ctx)
                .map(str::to_owned);
            if let Some(handle) = cached {
                return Ok((handle, context_id));
            }
        }

        // Two concurrent misses may both resolve; both handles address the same node
        let handle = self
            .inner
            .session
            .resolve_node(backend_node_id, context_id)
            .await?;

        if let Some(ctx) = context_id {
            let mut state = self.inner.state.lock().await;
            if state.registry.has_context(ctx) {
                state.cache.insert(backend_node_id, ctx, handle.clone());
            }
        }
        Ok((handle, context_id))
    }

    async fn call_on_node<T: DeserializeOwned>(
        &self,
        frame_id: &str,
        backend_node_id: BackendNodeId,
        script: &PageScript,
        arguments: Vec<CallArgument>,
    ) -> Result<Option<T>> {
        let (handle, _) = self
            .resolve_handle(frame_id, World::Isolated, backend_node_id)
            .await?;
        let result = self
            .inner
            .session
            .call_function_on(&handle, script.source, arguments, true)
            .await?;
        scripts::decode(script.name, result.result.value, result.exception_details)
    }

    // =========================================================================
    // Frames
    // =========================================================================

    /// Cached record for a frame, optionally fetching a missing title live
    pub async fn frame_info(&self, frame_id: &str, try_fetch_title: bool) -> Option<FrameRecord> {
        self.tracked(async {
            if !self.ensure_connected().await {
                return None;
            }
            self.lookup_frame(frame_id, try_fetch_title).await
        })
        .await
    }

    async fn lookup_frame(&self, frame_id: &str, try_fetch_title: bool) -> Option<FrameRecord> {
        let mut record = self
            .inner
            .state
            .lock()
            .await
            .registry
            .frame(frame_id)
            .cloned()?;

        if record.title.is_none() && try_fetch_title {
            match self.fetch_title(frame_id).await {
                Ok(Some(title)) if !title.is_empty() => {
                    let mut state = self.inner.state.lock().await;
                    if state.registry.frame(frame_id).is_some() {
                        state.registry.title_updated(frame_id, title.clone());
                    }
                    record.title = Some(title);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Title fetch for frame {} failed: {}", frame_id, e),
            }
        }
        Some(record)
    }

    async fn fetch_title(&self, frame_id: &str) -> Result<Option<String>> {
        let context_id = match self.known_context(frame_id, World::Isolated).await {
            Ok(context_id) => context_id,
            Err(_) => self.known_context(frame_id, World::Main).await?,
        };
        let result = self
            .inner
            .session
            .evaluate_in_context(DOCUMENT_TITLE.source, Some(context_id))
            .await?;
        scripts::decode(
            DOCUMENT_TITLE.name,
            result.result.value,
            result.exception_details,
        )
    }

    /// Whether `frame_id` still exists and shows `expected_url`
    pub async fn check_frame_validity(&self, frame_id: &str, expected_url: &str) -> bool {
        self.tracked(async {
            if !self.ensure_connected().await {
                return false;
            }
            let cached = self
                .inner
                .state
                .lock()
                .await
                .registry
                .frame(frame_id)
                .is_some_and(|f| f.url == expected_url);
            if cached {
                return true;
            }

            match self.inner.session.get_frame_tree().await {
                Ok(tree) => {
                    self.inner.state.lock().await.registry.apply_frame_tree(&tree);
                    tree_has_frame(&tree, frame_id, expected_url)
                }
                Err(e) => {
                    tracing::debug!("Frame tree refresh failed: {}", e);
                    false
                }
            }
        })
        .await
    }

    // =========================================================================
    // Element operations
    // =========================================================================

    /// Describe the hovered element. `None` when nothing is hovered, the
    /// hover moved away mid-extraction, or the DOM snapshot failed; later
    /// steps only ever add to the result.
    pub async fn collect_hovered_element_info(&self) -> Option<ExtractedElementInfo> {
        self.tracked(self.extract_hovered()).await
    }

    async fn extract_hovered(&self) -> Option<ExtractedElementInfo> {
        let hover = self.inner.state.lock().await.hover.clone()?;
        if !self.ensure_connected().await || !self.is_still_hovered(&hover).await {
            return None;
        }
        let session = &self.inner.session;
        let config = &self.inner.config;

        let (isolated, _) = match self
            .resolve_handle(&hover.frame_id, World::Isolated, hover.backend_node_id)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!("Isolated handle for node {} failed: {}", hover.backend_node_id, e);
                return None;
            }
        };
        let snapshot =
            match extract::snapshot(session, &isolated, &hover.element_id(), config.text_limit)
                .await
            {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    tracing::debug!("Node {} has no element to extract", hover.backend_node_id);
                    return None;
                }
                Err(e) => {
                    tracing::warn!("Element extraction failed: {}", e);
                    return None;
                }
            };

        if !self.is_still_hovered(&hover).await {
            return None;
        }
        let frame = self
            .lookup_frame(&hover.frame_id, true)
            .await
            .unwrap_or_else(|| FrameRecord {
                frame_id: hover.frame_id.clone(),
                url: String::new(),
                title: None,
                is_main_frame: false,
            });
        let mut info = ExtractedElementInfo::new(snapshot, hover.backend_node_id, frame);

        let (main, main_context) = match self
            .resolve_handle(&hover.frame_id, World::Main, hover.backend_node_id)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!("Main-world handle for node {} failed: {}", hover.backend_node_id, e);
                return Some(info);
            }
        };

        match self
            .inner
            .walker
            .fetch_component_info(session, &main, main_context)
            .await
        {
            Ok(ancestry) => info.component_ancestry = ancestry,
            Err(e) => tracing::warn!("Component walk failed: {}", e),
        }

        match extract::own_properties(session, &main, &config.property_limits).await {
            Ok(Some(own)) => {
                info.own_properties = Some(own.properties);
                info.properties_truncated = own.truncated;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Own-property copy failed: {}", e),
        }

        Some(info)
    }

    /// Scroll an element into the middle of the viewport
    pub async fn scroll_to_element(&self, element_id: &str, frame_id: &str) -> bool {
        self.tracked(async {
            let Some(backend_node_id) = hover::parse_element_id(element_id) else {
                return false;
            };
            if !self.ensure_connected().await {
                return false;
            }
            match self
                .call_on_node(frame_id, backend_node_id, &SCROLL_INTO_VIEW, Vec::new())
                .await
            {
                Ok(scrolled) => scrolled.unwrap_or(false),
                Err(e) => {
                    tracing::debug!("Scroll to {} failed: {}", element_id, e);
                    false
                }
            }
        })
        .await
    }

    /// Whether an element is still attached to its document
    pub async fn check_element_exists(&self, element_id: &str, frame_id: &str) -> bool {
        self.tracked(async {
            let Some(backend_node_id) = hover::parse_element_id(element_id) else {
                return false;
            };
            if !self.ensure_connected().await {
                return false;
            }
            match self
                .call_on_node(frame_id, backend_node_id, &IS_CONNECTED, Vec::new())
                .await
            {
                Ok(connected) => connected.unwrap_or(false),
                Err(e) => {
                    tracing::debug!("Existence check for {} failed: {}", element_id, e);
                    false
                }
            }
        })
        .await
    }

    /// Outline the selected elements of this tab while it is the active one,
    /// and remove outlines of elements no longer selected
    pub async fn update_highlights(&self, elements: &[SelectedElement], active_tab_id: &str) {
        self.tracked(async {
            let tab_id = self.inner.config.tab_id.as_str();
            let wanted: HashMap<&str, &str> = if active_tab_id == tab_id {
                elements
                    .iter()
                    .filter(|e| e.tab_id == tab_id)
                    .map(|e| (e.element_id.as_str(), e.frame_id.as_str()))
                    .collect()
            } else {
                HashMap::new()
            };

            let stale: Vec<(String, String)> = {
                let state = self.inner.state.lock().await;
                if wanted.is_empty() && state.outlined.is_empty() {
                    return;
                }
                state
                    .outlined
                    .iter()
                    .filter(|(id, _)| !wanted.contains_key(id.as_str()))
                    .map(|(id, frame)| (id.clone(), frame.clone()))
                    .collect()
            };
            if !self.ensure_connected().await {
                return;
            }

            for (element_id, frame_id) in stale {
                match self.hide_selection(&frame_id, &element_id).await {
                    // A vanished frame took its outline with it
                    Ok(_) | Err(Error::FrameNotFound(_)) => {
                        self.inner.state.lock().await.outlined.remove(&element_id);
                    }
                    Err(e) => {
                        tracing::debug!("Removing outline of {} failed, will retry: {}", element_id, e);
                    }
                }
            }

            for (element_id, frame_id) in wanted {
                match self.show_selection(frame_id, element_id).await {
                    Ok(true) => {
                        self.inner
                            .state
                            .lock()
                            .await
                            .outlined
                            .insert(element_id.to_string(), frame_id.to_string());
                    }
                    Ok(false) => tracing::debug!("Nothing to outline for {}", element_id),
                    Err(e) => tracing::debug!("Outlining {} failed: {}", element_id, e),
                }
            }
        })
        .await
    }

    async fn show_selection(&self, frame_id: &str, element_id: &str) -> Result<bool> {
        let Some(backend_node_id) = hover::parse_element_id(element_id) else {
            return Ok(false);
        };
        let drawn = self
            .call_on_node(
                frame_id,
                backend_node_id,
                &SHOW_SELECTION,
                vec![CallArgument::value(element_id)],
            )
            .await?;
        Ok(drawn.unwrap_or(false))
    }

    async fn hide_selection(&self, frame_id: &str, element_id: &str) -> Result<bool> {
        let context_id = self
            .context_for(frame_id, World::Isolated)
            .await?
            .ok_or_else(|| Error::ContextNotFound {
                frame_id: frame_id.to_string(),
                world: World::Isolated.as_str(),
            })?;
        let result = self
            .inner
            .session
            .call_function_in_context(
                context_id,
                HIDE_SELECTION.source,
                vec![CallArgument::value(element_id)],
            )
            .await?;
        let removed: Option<bool> = scripts::decode(
            HIDE_SELECTION.name,
            result.result.value,
            result.exception_details,
        )?;
        Ok(removed.unwrap_or(false))
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Consume one message from the transport
    pub async fn handle_message(&self, message: CdpMessage) {
        match message {
            CdpMessage::Event { method, params, .. } => self.handle_event(&method, &params).await,
            CdpMessage::Detached { reason } => {
                tracing::debug!("Transport closed: {}", reason);
                self.handle_external_detach().await;
            }
        }
    }

    /// Consume one raw CDP event; events the tracker does not use are ignored
    pub async fn handle_event(&self, method: &str, params: &Value) {
        if let Some(event) = PageEvent::from_cdp(method, params) {
            self.apply_event(event).await;
        }
    }

    /// A frame's title became known to the host. Frames the tracker does
    /// not know are ignored.
    pub async fn handle_title_updated(&self, frame_id: &str, title: &str) {
        self.apply_event(PageEvent::FrameTitleUpdated {
            frame_id: frame_id.to_string(),
            title: title.to_string(),
        })
        .await;
    }

    async fn apply_event(&self, event: PageEvent) {
        let mut forgotten: Vec<ExecutionContextId> = Vec::new();
        let mut reset_walker = false;
        let mut detached = false;

        let hover_cleared = {
            let mut state = self.inner.state.lock().await;
            match event {
                PageEvent::FrameNavigated(frame) => {
                    if state.registry.frame_navigated(&frame) {
                        tracing::debug!("Main frame navigated to {}", frame.url);
                        state.cache.clear();
                        state.outlined.clear();
                        reset_walker = true;
                        state.hover.take().is_some()
                    } else {
                        state.clear_hover_in(&frame.id)
                    }
                }
                PageEvent::FrameAttached { frame_id, .. } => {
                    state.registry.frame_attached(&frame_id);
                    false
                }
                PageEvent::FrameDetached { frame_id } => {
                    if let Some(pair) = state.registry.contexts(&frame_id) {
                        for context_id in [pair.isolated, pair.main_world].into_iter().flatten() {
                            state.cache.invalidate_context(context_id);
                            forgotten.push(context_id);
                        }
                    }
                    state.registry.frame_detached(&frame_id);
                    state.outlined.retain(|_, frame| *frame != frame_id);
                    state.clear_hover_in(&frame_id)
                }
                PageEvent::FrameTitleUpdated { frame_id, title } => {
                    // Target discovery reports every tab's page
                    if state.registry.frame(&frame_id).is_some() {
                        state.registry.title_updated(&frame_id, title);
                    }
                    false
                }
                PageEvent::ContextCreated(context) => {
                    // Ids can be recycled
                    state.cache.invalidate_context(context.id);
                    forgotten.push(context.id);
                    if let Some((frame_id, world)) = state.registry.context_created(&context) {
                        tracing::trace!(
                            "Context {} is the {} of frame {}",
                            context.id,
                            world.as_str(),
                            frame_id
                        );
                    }
                    false
                }
                PageEvent::ContextDestroyed(context_id) => {
                    state.cache.invalidate_context(context_id);
                    forgotten.push(context_id);
                    match state.registry.context_destroyed(context_id) {
                        Some(destroyed) if destroyed.pair_removed => {
                            state.clear_hover_in(&destroyed.frame_id)
                        }
                        _ => false,
                    }
                }
                PageEvent::ContextsCleared => {
                    let dropped = state.registry.contexts_cleared();
                    tracing::debug!("All {} execution contexts cleared", dropped.len());
                    state.cache.clear();
                    reset_walker = true;
                    state.hover.take().is_some()
                }
                PageEvent::Detached { reason } => {
                    tracing::debug!("Inspector detached: {}", reason);
                    detached = true;
                    false
                }
            }
        };

        if detached {
            self.handle_external_detach().await;
            return;
        }
        if reset_walker {
            self.inner.walker.reset_initialization().await;
        } else {
            for context_id in forgotten {
                self.inner.walker.forget_context(context_id).await;
            }
        }
        if hover_cleared {
            self.emit_hover(None);
        }
    }

    /// Feed transport messages into the tracker until the channel closes or
    /// the tracker is dropped
    pub fn spawn_event_pump(&self, mut events: mpsc::Receiver<CdpMessage>) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(message) = events.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                ElementTracker { inner }.handle_message(message).await;
            }
            tracing::debug!("Event pump stopped");
        })
    }
}
