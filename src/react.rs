//! Component-tree walker
//!
//! Recovers the React component ancestry of a DOM node. The page side
//! ([`scripts::FIBER_WALK`]) finds the fiber attached to the node and samples
//! plain-string fields along its `return` chain; this side decides which
//! samples are components and reduces them into a parent-linked chain.
//!
//! The walk function is installed once per main-world context under a
//! hidden global so later calls only send a short stub. If installation
//! fails, calls send the full function inline instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::sync::Mutex;

use crate::cdp::types::CallArgument;
use crate::cdp::{ExecutionContextId, Session};
use crate::error::Result;
use crate::scripts::{self, FIBER_WALK};

/// Case-insensitive name prefixes of primitive wrapper components
const PRIMITIVE_PREFIXES: &[&str] = &["primitive"];

/// One fiber on the `return` chain, as sampled in the page. Every field is
/// absent when the property is missing, not a string, or threw on access.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiberSample {
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub type_display_name: Option<String>,
    #[serde(default)]
    pub element_type_name: Option<String>,
    #[serde(default)]
    pub element_type_display_name: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub owner_env: Option<String>,
}

impl FiberSample {
    /// Owned by a component that rendered on the server
    fn is_server_rendered(&self) -> bool {
        self.owner_name.is_some()
            && self
                .owner_env
                .as_deref()
                .is_some_and(|env| env.eq_ignore_ascii_case("server"))
    }

    fn has_type_info(&self) -> bool {
        self.type_name.is_some()
            || self.type_display_name.is_some()
            || self.element_type_name.is_some()
            || self.element_type_display_name.is_some()
    }

    /// Host and root fibers carry neither type info nor a server owner
    pub fn is_component(&self) -> bool {
        self.is_server_rendered() || self.has_type_info()
    }

    /// Name shown for this fiber
    pub fn display_name(&self) -> &str {
        let server_owner = self
            .owner_name
            .as_deref()
            .filter(|_| self.is_server_rendered());
        server_owner
            .or(self.type_display_name.as_deref())
            .or(self.type_name.as_deref())
            .or(self.element_type_display_name.as_deref())
            .or(self.element_type_name.as_deref())
            .unwrap_or("Anonymous")
    }
}

/// Result shape of the page-side walk
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiberWalk {
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub samples: Vec<FiberSample>,
    #[serde(default)]
    pub helpers_missing: bool,
}

/// A component in the ancestry chain, nearest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentAncestryNode {
    pub component_name: String,
    pub is_server_rendered: bool,
    pub parent: Option<Box<ComponentAncestryNode>>,
}

impl ComponentAncestryNode {
    /// Walk from this node to the root
    pub fn iter(&self) -> impl Iterator<Item = &ComponentAncestryNode> {
        std::iter::successors(Some(self), |node| node.parent.as_deref())
    }

    /// Component names, nearest first
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|n| n.component_name.as_str()).collect()
    }

    /// Number of components in the chain
    pub fn depth(&self) -> usize {
        self.iter().count()
    }
}

fn is_primitive_wrapper(name: &str) -> bool {
    PRIMITIVE_PREFIXES.iter().any(|prefix| {
        name.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

#[derive(Debug)]
struct Component<'a> {
    name: &'a str,
    is_server_rendered: bool,
}

/// Reduce depth-ordered fiber samples (nearest first) to an ancestry chain.
///
/// Returns `None` when no sample is a component.
pub fn build_ancestry(samples: &[FiberSample]) -> Option<ComponentAncestryNode> {
    let mut components: SmallVec<[Component<'_>; 16]> = SmallVec::new();
    for sample in samples.iter().filter(|s| s.is_component()) {
        let name = sample.display_name();
        if is_primitive_wrapper(name) {
            continue;
        }
        let is_server_rendered = sample.is_server_rendered();
        // Every host child of a server component repeats its owner
        if is_server_rendered
            && components
                .last()
                .is_some_and(|prev| prev.is_server_rendered && prev.name == name)
        {
            continue;
        }
        components.push(Component {
            name,
            is_server_rendered,
        });
    }

    let kept: SmallVec<[&Component<'_>; 16]> = components
        .iter()
        .enumerate()
        .filter(|(i, c)| {
            !(c.is_server_rendered
                && components
                    .get(i + 1)
                    .is_some_and(|parent| parent.name == c.name))
        })
        .map(|(_, c)| c)
        .collect();

    kept.iter().rev().fold(None, |parent, c| {
        Some(ComponentAncestryNode {
            component_name: c.name.to_string(),
            is_server_rendered: c.is_server_rendered,
            parent: parent.map(Box::new),
        })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Helpers {
    Installed,
    Unavailable,
}

/// Walks component ancestry for one page
pub struct ComponentTreeWalker {
    max_hops: u32,
    max_dom_ancestors: u32,
    /// Helper status per main-world context. Held across the install call
    /// so concurrent first callers wait for one injection.
    helpers: Mutex<HashMap<ExecutionContextId, Helpers>>,
}

impl ComponentTreeWalker {
    pub fn new(max_hops: u32, max_dom_ancestors: u32) -> Self {
        Self {
            max_hops,
            max_dom_ancestors,
            helpers: Mutex::new(HashMap::new()),
        }
    }

    /// Forget all installations (after navigation or reload)
    pub async fn reset_initialization(&self) {
        self.helpers.lock().await.clear();
    }

    /// Forget one context's installation
    pub async fn forget_context(&self, context_id: ExecutionContextId) {
        self.helpers.lock().await.remove(&context_id);
    }

    /// Install helpers in `context_id` unless already attempted. Returns
    /// whether they are usable.
    async fn ensure_helpers(&self, session: &Session, context_id: ExecutionContextId) -> bool {
        let mut helpers = self.helpers.lock().await;
        if let Some(status) = helpers.get(&context_id) {
            return *status == Helpers::Installed;
        }

        let status = match session
            .evaluate_in_context(&scripts::install_fiber_helpers(), Some(context_id))
            .await
        {
            Ok(result) if result.exception_details.is_none() => Helpers::Installed,
            Ok(result) => {
                let message = result
                    .exception_details
                    .map(|e| e.message())
                    .unwrap_or_default();
                tracing::debug!("Fiber helper install threw in context {}: {}", context_id, message);
                Helpers::Unavailable
            }
            Err(e) => {
                tracing::debug!("Fiber helper install failed in context {}: {}", context_id, e);
                Helpers::Unavailable
            }
        };
        helpers.insert(context_id, status);
        status == Helpers::Installed
    }

    async fn walk(&self, session: &Session, handle: &str, declaration: &str) -> Result<FiberWalk> {
        let result = session
            .call_function_on(
                handle,
                declaration,
                vec![
                    CallArgument::value(self.max_hops),
                    CallArgument::value(self.max_dom_ancestors),
                ],
                true,
            )
            .await?;
        let walk: Option<FiberWalk> = scripts::decode(
            FIBER_WALK.name,
            result.result.value,
            result.exception_details,
        )?;
        Ok(walk.unwrap_or_default())
    }

    /// Component ancestry of the node behind `handle` (a main-world handle).
    ///
    /// `Ok(None)` when the node has no fiber or no component above it.
    pub async fn fetch_component_info(
        &self,
        session: &Session,
        handle: &str,
        context_id: Option<ExecutionContextId>,
    ) -> Result<Option<ComponentAncestryNode>> {
        let use_helpers = match context_id {
            Some(ctx) => self.ensure_helpers(session, ctx).await,
            None => false,
        };

        let mut walk = if use_helpers {
            self.walk(session, handle, &scripts::fiber_walk_via_helpers())
                .await?
        } else {
            self.walk(session, handle, &scripts::fiber_walk_inline())
                .await?
        };

        if walk.helpers_missing {
            // Page replaced or deleted the global; stop relying on it here
            if let Some(ctx) = context_id {
                self.helpers.lock().await.insert(ctx, Helpers::Unavailable);
            }
            walk = self
                .walk(session, handle, &scripts::fiber_walk_inline())
                .await?;
        }

        if !walk.found || walk.samples.is_empty() {
            tracing::trace!("No fiber found for {}", handle);
            return Ok(None);
        }
        Ok(build_ancestry(&walk.samples))
    }
}
