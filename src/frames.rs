//! Frame and execution-context registry
//!
//! Built from `Page.*` and `Runtime.*` events. Knows, per frame, its URL,
//! title and whether it is the main frame, plus the two execution contexts
//! the tracker works with: the isolated world scripts run in, and the
//! page's own main world where framework internals live.

use std::collections::HashMap;

use serde::Serialize;

use crate::cdp::types::{ExecutionContextDescription, Frame, FrameTree};
use crate::cdp::ExecutionContextId;

/// What we know about one live frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    pub frame_id: String,
    pub url: String,
    /// Unknown until a title event arrives or a live fetch succeeds
    pub title: Option<String>,
    pub is_main_frame: bool,
}

/// Which of a frame's worlds a context belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum World {
    Isolated,
    Main,
}

impl World {
    pub fn as_str(&self) -> &'static str {
        match self {
            World::Isolated => "isolated",
            World::Main => "main world",
        }
    }
}

/// The contexts known for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionContextPair {
    pub isolated: Option<ExecutionContextId>,
    pub main_world: Option<ExecutionContextId>,
}

impl ExecutionContextPair {
    fn get(&self, world: World) -> Option<ExecutionContextId> {
        match world {
            World::Isolated => self.isolated,
            World::Main => self.main_world,
        }
    }

    fn slot(&mut self, world: World) -> &mut Option<ExecutionContextId> {
        match world {
            World::Isolated => &mut self.isolated,
            World::Main => &mut self.main_world,
        }
    }

    fn is_empty(&self) -> bool {
        self.isolated.is_none() && self.main_world.is_none()
    }
}

/// Outcome of a context being destroyed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyedContext {
    pub frame_id: String,
    pub world: World,
    /// Both halves are now gone and the pair entry was removed
    pub pair_removed: bool,
}

/// Registry of frames and their execution contexts for one page
#[derive(Debug)]
pub struct FrameRegistry {
    isolated_world_name: String,
    frames: HashMap<String, FrameRecord>,
    contexts: HashMap<String, ExecutionContextPair>,
    main_frame_id: Option<String>,
}

impl FrameRegistry {
    /// Create an empty registry; isolated contexts are recognized by `isolated_world_name`
    pub fn new(isolated_world_name: impl Into<String>) -> Self {
        Self {
            isolated_world_name: isolated_world_name.into(),
            frames: HashMap::new(),
            contexts: HashMap::new(),
            main_frame_id: None,
        }
    }

    /// Id of the current main frame
    pub fn main_frame_id(&self) -> Option<&str> {
        self.main_frame_id.as_deref()
    }

    /// Look up a frame
    pub fn frame(&self, frame_id: &str) -> Option<&FrameRecord> {
        self.frames.get(frame_id)
    }

    /// All known frames
    pub fn frames(&self) -> impl Iterator<Item = &FrameRecord> {
        self.frames.values()
    }

    /// Context of the given world for a frame
    pub fn context(&self, frame_id: &str, world: World) -> Option<ExecutionContextId> {
        self.contexts.get(frame_id).and_then(|pair| pair.get(world))
    }

    /// Both contexts for a frame
    pub fn contexts(&self, frame_id: &str) -> Option<ExecutionContextPair> {
        self.contexts.get(frame_id).copied()
    }

    /// Whether a context id is currently alive in any frame
    pub fn has_context(&self, context_id: ExecutionContextId) -> bool {
        self.contexts
            .values()
            .any(|pair| pair.isolated == Some(context_id) || pair.main_world == Some(context_id))
    }

    fn upsert(&mut self, frame_id: &str) -> &mut FrameRecord {
        self.frames
            .entry(frame_id.to_string())
            .or_insert_with(|| FrameRecord {
                frame_id: frame_id.to_string(),
                url: String::new(),
                title: None,
                is_main_frame: false,
            })
    }

    fn set_main_frame(&mut self, frame_id: &str) {
        if let Some(previous) = self.main_frame_id.take() {
            if previous != frame_id {
                if let Some(record) = self.frames.get_mut(&previous) {
                    record.is_main_frame = false;
                }
            }
        }
        self.upsert(frame_id).is_main_frame = true;
        self.main_frame_id = Some(frame_id.to_string());
    }

    /// Load a full frame tree snapshot, recursively
    pub fn apply_frame_tree(&mut self, tree: &FrameTree) {
        self.apply_frame(&tree.frame);
        for child in &tree.child_frames {
            self.apply_frame_tree(child);
        }
    }

    fn apply_frame(&mut self, frame: &Frame) {
        if frame.id.is_empty() {
            return;
        }
        if frame.parent_id.is_none() {
            self.set_main_frame(&frame.id);
        }
        self.upsert(&frame.id).url = frame.url.clone();
    }

    /// A frame committed a navigation. Returns true for the main frame.
    ///
    /// The old document's title no longer applies. When the main frame
    /// navigates every subframe of the old document is gone too.
    pub fn frame_navigated(&mut self, frame: &Frame) -> bool {
        if frame.id.is_empty() {
            return false;
        }
        let is_main = frame.parent_id.is_none();
        if is_main {
            let keep = frame.id.clone();
            self.frames.retain(|id, _| *id == keep);
            self.contexts.retain(|id, _| *id == keep);
        }
        self.apply_frame(frame);
        self.upsert(&frame.id).title = None;
        is_main
    }

    /// A subframe was attached
    pub fn frame_attached(&mut self, frame_id: &str) {
        self.upsert(frame_id);
    }

    /// A frame went away. Returns true if it was known.
    pub fn frame_detached(&mut self, frame_id: &str) -> bool {
        if self.main_frame_id.as_deref() == Some(frame_id) {
            self.main_frame_id = None;
        }
        self.contexts.remove(frame_id);
        self.frames.remove(frame_id).is_some()
    }

    /// Record a frame's title
    pub fn title_updated(&mut self, frame_id: &str, title: impl Into<String>) {
        self.upsert(frame_id).title = Some(title.into());
    }

    /// Classify a new context; contexts that are neither our isolated
    /// world nor a main world are ignored.
    pub fn classify(&self, context: &ExecutionContextDescription) -> Option<(String, World)> {
        let aux = context.aux_data.as_ref()?;
        let frame_id = aux.frame_id.clone().filter(|id| !id.is_empty())?;
        if aux.is_default {
            return Some((frame_id, World::Main));
        }
        if aux.r#type.as_deref() == Some("isolated") && context.name == self.isolated_world_name {
            return Some((frame_id, World::Isolated));
        }
        None
    }

    /// A context was created. Returns its classification if it was recorded.
    pub fn context_created(
        &mut self,
        context: &ExecutionContextDescription,
    ) -> Option<(String, World)> {
        let (frame_id, world) = self.classify(context)?;
        self.set_context(&frame_id, world, context.id);
        Some((frame_id, world))
    }

    /// Record a context directly (e.g. one we just created ourselves)
    pub fn set_context(&mut self, frame_id: &str, world: World, context_id: ExecutionContextId) {
        self.upsert(frame_id);
        *self
            .contexts
            .entry(frame_id.to_string())
            .or_default()
            .slot(world) = Some(context_id);
    }

    /// A context was destroyed: zero the matching half of its pair and drop
    /// the pair once both halves are gone.
    pub fn context_destroyed(&mut self, context_id: ExecutionContextId) -> Option<DestroyedContext> {
        let (frame_id, world) = self.contexts.iter().find_map(|(frame_id, pair)| {
            if pair.isolated == Some(context_id) {
                Some((frame_id.clone(), World::Isolated))
            } else if pair.main_world == Some(context_id) {
                Some((frame_id.clone(), World::Main))
            } else {
                None
            }
        })?;

        let pair = self.contexts.get_mut(&frame_id)?;
        *pair.slot(world) = None;
        let pair_removed = pair.is_empty();
        if pair_removed {
            self.contexts.remove(&frame_id);
        }

        Some(DestroyedContext {
            frame_id,
            world,
            pair_removed,
        })
    }

    /// Every context went away (navigation or reload). Returns the ids dropped.
    pub fn contexts_cleared(&mut self) -> Vec<ExecutionContextId> {
        self.contexts
            .drain()
            .flat_map(|(_, pair)| [pair.isolated, pair.main_world])
            .flatten()
            .collect()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.frames.clear();
        self.contexts.clear();
        self.main_frame_id = None;
    }
}
