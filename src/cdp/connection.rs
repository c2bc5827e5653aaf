//! CDP Session
//!
//! Typed command helpers over a [`DebuggerTransport`].

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use super::transport::DebuggerTransport;
use super::types::*;
use crate::error::{Error, Result};

/// Object group every remote handle we create belongs to
const OBJECT_GROUP: &str = "hoverlens";

/// Typed view of one tab's debugger channel
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn DebuggerTransport>,
}

impl Session {
    /// Wrap a transport
    pub fn new(transport: Arc<dyn DebuggerTransport>) -> Self {
        Self { transport }
    }

    /// Get a reference to the transport
    pub fn transport(&self) -> &Arc<dyn DebuggerTransport> {
        &self.transport
    }

    /// Send a command to this session
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.transport.send_raw(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn send_unit<C: Serialize>(&self, method: &str, params: &C) -> Result<()> {
        self.send::<_, serde_json::Value>(method, params).await?;
        Ok(())
    }

    /// Enable the DOM, Page, Runtime and Overlay domains, and target
    /// discovery for page title updates
    pub async fn enable_domains(&self) -> Result<()> {
        self.send_unit("DOM.enable", &DOMEnable {}).await?;
        self.send_unit("Page.enable", &PageEnable {}).await?;
        self.send_unit("Runtime.enable", &RuntimeEnable {}).await?;
        self.send_unit("Overlay.enable", &OverlayEnable {}).await?;

        // Some hosts restrict the Target domain; titles then come from the
        // host or a live fetch
        if let Err(e) = self
            .send_unit(
                "Target.setDiscoverTargets",
                &TargetSetDiscoverTargets { discover: true },
            )
            .await
        {
            tracing::debug!("Target discovery unavailable: {}", e);
        }
        Ok(())
    }

    /// Get the frame tree
    pub async fn get_frame_tree(&self) -> Result<FrameTree> {
        let result: PageGetFrameTreeResult =
            self.send("Page.getFrameTree", &PageGetFrameTree {}).await?;
        Ok(result.frame_tree)
    }

    /// Current scroll offset of the visual viewport, in CSS pixels
    pub async fn scroll_offset(&self) -> Result<(f64, f64)> {
        let result: PageGetLayoutMetricsResult = self
            .send("Page.getLayoutMetrics", &PageGetLayoutMetrics {})
            .await?;
        let viewport = result.css_visual_viewport;
        Ok((viewport.page_x, viewport.page_y))
    }

    /// Hit-test a point to the topmost node
    pub async fn get_node_for_location(
        &self,
        x: f64,
        y: f64,
    ) -> Result<DOMGetNodeForLocationResult> {
        self.send(
            "DOM.getNodeForLocation",
            &DOMGetNodeForLocation {
                x: x.round() as i64,
                y: y.round() as i64,
                include_user_agent_shadow_dom: Some(false),
                ignore_pointer_events_none: Some(true),
            },
        )
        .await
    }

    /// Resolve a backend node to a remote object handle
    ///
    /// Without a context id the node resolves in its frame's main world.
    pub async fn resolve_node(
        &self,
        backend_node_id: BackendNodeId,
        context_id: Option<ExecutionContextId>,
    ) -> Result<String> {
        let result: DOMResolveNodeResult = self
            .send(
                "DOM.resolveNode",
                &DOMResolveNode {
                    backend_node_id: Some(backend_node_id),
                    object_group: Some(OBJECT_GROUP.to_string()),
                    execution_context_id: context_id,
                },
            )
            .await?;
        result.object.object_id.ok_or(Error::NoHandle {
            backend_node_id,
            context_id,
        })
    }

    /// Evaluate an expression in a specific context, returning by value
    pub async fn evaluate_in_context(
        &self,
        expression: &str,
        context_id: Option<ExecutionContextId>,
    ) -> Result<RuntimeEvaluateResult> {
        self.send(
            "Runtime.evaluate",
            &RuntimeEvaluate {
                expression: expression.to_string(),
                context_id,
                object_group: None,
                return_by_value: Some(true),
                await_promise: Some(false),
                silent: Some(true),
            },
        )
        .await
    }

    /// Call a function with `this` bound to a remote object
    pub async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
        arguments: Vec<CallArgument>,
        return_by_value: bool,
    ) -> Result<RuntimeCallFunctionOnResult> {
        self.send(
            "Runtime.callFunctionOn",
            &RuntimeCallFunctionOn {
                function_declaration: function_declaration.to_string(),
                object_id: Some(object_id.to_string()),
                execution_context_id: None,
                arguments: Some(arguments),
                silent: Some(true),
                return_by_value: Some(return_by_value),
                await_promise: Some(false),
            },
        )
        .await
    }

    /// Call a function with `this` bound to a context's global object,
    /// returning by value
    pub async fn call_function_in_context(
        &self,
        context_id: ExecutionContextId,
        function_declaration: &str,
        arguments: Vec<CallArgument>,
    ) -> Result<RuntimeCallFunctionOnResult> {
        self.send(
            "Runtime.callFunctionOn",
            &RuntimeCallFunctionOn {
                function_declaration: function_declaration.to_string(),
                object_id: None,
                execution_context_id: Some(context_id),
                arguments: Some(arguments),
                silent: Some(true),
                return_by_value: Some(true),
                await_promise: Some(false),
            },
        )
        .await
    }

    /// Draw the devtools overlay over a node
    pub async fn highlight_node(&self, backend_node_id: BackendNodeId) -> Result<()> {
        self.send_unit(
            "Overlay.highlightNode",
            &OverlayHighlightNode {
                highlight_config: HighlightConfig::default(),
                backend_node_id: Some(backend_node_id),
            },
        )
        .await
    }

    /// Remove the devtools overlay
    pub async fn hide_highlight(&self) -> Result<()> {
        self.send_unit("Overlay.hideHighlight", &OverlayHideHighlight {})
            .await
    }

    /// Create a named isolated world in a frame
    pub async fn create_isolated_world(
        &self,
        frame_id: &str,
        world_name: &str,
    ) -> Result<ExecutionContextId> {
        let result: PageCreateIsolatedWorldResult = self
            .send(
                "Page.createIsolatedWorld",
                &PageCreateIsolatedWorld {
                    frame_id: frame_id.to_string(),
                    world_name: Some(world_name.to_string()),
                    grant_univeral_access: Some(false),
                },
            )
            .await?;
        Ok(result.execution_context_id)
    }
}
