//! Scripted in-memory page for driving the tracker without Chrome
//!
//! `FakePage` answers the CDP commands the tracker sends from a small model
//! of frames, execution contexts and nodes, and records every call.
//! Page scripts are recognized by their `hoverlens:<name>` marker.
//! Every command yields once before it is answered, so concurrent callers
//! interleave the way they would over a real socket.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use hoverlens::{DebuggerTransport, Error, Result, World};

pub const NO_NODE: &str = "No node found at given location";

/// A node in the fake document
#[derive(Debug, Clone)]
pub struct FakeNode {
    pub tag: String,
    pub frame_id: String,
    pub text: String,
    pub attributes: Value,
    pub fiber: Vec<Value>,
    /// `None` makes the own-property script throw
    pub properties: Option<Value>,
    pub connected: bool,
}

impl FakeNode {
    pub fn new(tag: &str, frame_id: &str) -> Self {
        Self {
            tag: tag.to_string(),
            frame_id: frame_id.to_string(),
            text: String::new(),
            attributes: json!({}),
            fiber: Vec::new(),
            properties: Some(json!({})),
            connected: true,
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_fiber(mut self, samples: Vec<Value>) -> Self {
        self.fiber = samples;
        self
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn throwing_properties(mut self) -> Self {
        self.properties = None;
        self
    }

    pub fn detached(mut self) -> Self {
        self.connected = false;
        self
    }
}

struct FakeFrame {
    id: String,
    parent_id: Option<String>,
    url: String,
    title: String,
}

#[derive(Default)]
struct Model {
    frames: Vec<FakeFrame>,
    contexts: HashMap<i64, String>,
    nodes: HashMap<i64, FakeNode>,
    objects: HashMap<String, i64>,
    hit: Option<i64>,
    failing_contexts: HashSet<i64>,
    /// Scripts whose source contains one of these throw
    failing_scripts: HashSet<String>,
    /// The page removed the fiber helpers after they were installed
    helpers_dropped: bool,
    calls: Vec<(String, Value)>,
    next_world: i64,
}

fn by_value(value: Value) -> Value {
    json!({ "result": { "type": "object", "value": value } })
}

fn thrown(text: &str) -> Value {
    json!({
        "result": { "type": "undefined" },
        "exceptionDetails": { "text": text, "lineNumber": 0, "columnNumber": 0 }
    })
}

impl Model {
    fn script_fails(&self, source: &str) -> bool {
        self.failing_scripts.iter().any(|marker| source.contains(marker))
    }

    fn frame_tree(&self, frame: &FakeFrame) -> Value {
        let mut entry = Map::new();
        entry.insert("id".into(), json!(frame.id));
        entry.insert("loaderId".into(), json!(format!("loader-{}", frame.id)));
        entry.insert("url".into(), json!(frame.url));
        if let Some(parent) = &frame.parent_id {
            entry.insert("parentId".into(), json!(parent));
        }
        let children: Vec<Value> = self
            .frames
            .iter()
            .filter(|f| f.parent_id.as_deref() == Some(frame.id.as_str()))
            .map(|f| self.frame_tree(f))
            .collect();
        json!({ "frame": entry, "childFrames": children })
    }

    fn respond(&mut self, method: &str, params: &Value) -> Result<Value> {
        match method {
            "DOM.enable" | "Page.enable" | "Runtime.enable" | "Overlay.enable"
            | "Target.setDiscoverTargets" | "Overlay.highlightNode" | "Overlay.hideHighlight" => {
                Ok(json!({}))
            }
            "Page.getFrameTree" => {
                let main = self
                    .frames
                    .iter()
                    .find(|f| f.parent_id.is_none())
                    .ok_or_else(|| Error::cdp(method, -32000, "No main frame"))?;
                Ok(json!({ "frameTree": self.frame_tree(main) }))
            }
            "Page.getLayoutMetrics" => Ok(json!({
                "cssVisualViewport": {
                    "pageX": 0.0, "pageY": 0.0, "clientWidth": 1280.0, "clientHeight": 720.0
                }
            })),
            "DOM.getNodeForLocation" => {
                let backend = self.hit.ok_or_else(|| Error::cdp(method, -32000, NO_NODE))?;
                let node = &self.nodes[&backend];
                Ok(json!({ "backendNodeId": backend, "frameId": node.frame_id }))
            }
            "DOM.resolveNode" => {
                let backend = params["backendNodeId"].as_i64().unwrap_or_default();
                let context = params
                    .get("executionContextId")
                    .and_then(Value::as_i64)
                    .unwrap_or_default();
                if !self.nodes.contains_key(&backend) || self.failing_contexts.contains(&context) {
                    return Err(Error::cdp(method, -32000, "No node with given id found"));
                }
                let object_id = format!("obj-{}-{}", backend, context);
                self.objects.insert(object_id.clone(), backend);
                Ok(json!({
                    "object": { "type": "object", "subtype": "node", "objectId": object_id }
                }))
            }
            "Page.createIsolatedWorld" => {
                let context = self.next_world;
                self.next_world += 1;
                let frame_id = params["frameId"].as_str().unwrap_or_default().to_string();
                self.contexts.insert(context, frame_id);
                Ok(json!({ "executionContextId": context }))
            }
            "Runtime.evaluate" => {
                let expression = params["expression"].as_str().unwrap_or_default();
                if self.script_fails(expression) {
                    Ok(thrown("Error: blocked by the page"))
                } else if expression.contains("hoverlens:document-title") {
                    let context = params["contextId"].as_i64().unwrap_or_default();
                    let title = self
                        .contexts
                        .get(&context)
                        .and_then(|frame_id| self.frames.iter().find(|f| f.id == *frame_id))
                        .map(|f| f.title.clone());
                    Ok(match title {
                        Some(title) => by_value(json!(title)),
                        None => thrown("Cannot find context with specified id"),
                    })
                } else {
                    Ok(by_value(json!(true)))
                }
            }
            "Runtime.callFunctionOn" => self.call_function(params),
            _ => Err(Error::cdp(method, -32601, format!("'{}' wasn't found", method))),
        }
    }

    fn call_function(&self, params: &Value) -> Result<Value> {
        let declaration = params["functionDeclaration"].as_str().unwrap_or_default();
        let arg = |i: usize| params["arguments"][i]["value"].clone();

        if self.script_fails(declaration) {
            return Ok(thrown("Error: blocked by the page"));
        }
        if declaration.contains("hoverlens:hide-selection") {
            return Ok(by_value(json!(true)));
        }

        let object_id = params["objectId"].as_str().unwrap_or_default();
        let node = self
            .objects
            .get(object_id)
            .and_then(|backend| self.nodes.get(backend))
            .ok_or_else(|| {
                Error::cdp("Runtime.callFunctionOn", -32000, "Could not find object with given id")
            })?;

        let value = if declaration.contains("hoverlens:extract-element") {
            json!({
                "id": arg(0),
                "tagName": node.tag,
                "attributes": node.attributes,
                "textContent": node.text,
                "boundingBox": { "x": 10.0, "y": 20.0, "width": 120.0, "height": 32.0 }
            })
        } else if declaration.contains("hoverlens:own-properties") {
            match &node.properties {
                Some(properties) => json!({ "properties": properties, "truncated": false }),
                None => return Ok(thrown("TypeError: getter exploded")),
            }
        } else if declaration.contains("fiber-walk@v1 call") && self.helpers_dropped {
            json!({ "helpersMissing": true })
        } else if declaration.contains("hoverlens:fiber-walk") {
            json!({ "found": !node.fiber.is_empty(), "samples": node.fiber })
        } else if declaration.contains("hoverlens:is-connected") {
            json!(node.connected)
        } else if declaration.contains("hoverlens:scroll-into-view")
            || declaration.contains("hoverlens:show-selection")
        {
            json!(true)
        } else {
            Value::Null
        };
        Ok(by_value(value))
    }
}

/// In-memory stand-in for one tab's debugger channel
pub struct FakePage {
    attached: AtomicBool,
    loading: AtomicBool,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    model: Mutex<Model>,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            attached: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            attaches: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
            model: Mutex::new(Model {
                next_world: 100,
                ..Default::default()
            }),
        }
    }

    pub fn add_frame(&self, id: &str, parent_id: Option<&str>, url: &str, title: &str) {
        self.model.lock().unwrap().frames.push(FakeFrame {
            id: id.to_string(),
            parent_id: parent_id.map(String::from),
            url: url.to_string(),
            title: title.to_string(),
        });
    }

    pub fn add_node(&self, backend_node_id: i64, node: FakeNode) {
        self.model
            .lock()
            .unwrap()
            .nodes
            .insert(backend_node_id, node);
    }

    /// Register a context and return its `Runtime.executionContextCreated` params
    pub fn context_created(&self, id: i64, frame_id: &str, world: World) -> Value {
        self.model
            .lock()
            .unwrap()
            .contexts
            .insert(id, frame_id.to_string());
        let (name, is_default, kind) = match world {
            World::Isolated => ("hoverlens", false, "isolated"),
            World::Main => ("", true, "default"),
        };
        json!({
            "context": {
                "id": id,
                "origin": "https://app.test",
                "name": name,
                "uniqueId": format!("unique-{}", id),
                "auxData": { "isDefault": is_default, "type": kind, "frameId": frame_id }
            }
        })
    }

    /// Node the next hit-test lands on; `None` is off the page
    pub fn set_hit(&self, backend_node_id: Option<i64>) {
        self.model.lock().unwrap().hit = backend_node_id;
    }

    /// Make node resolution fail in a context
    pub fn fail_resolve_in(&self, context_id: i64) {
        self.model
            .lock()
            .unwrap()
            .failing_contexts
            .insert(context_id);
    }

    /// Make every script containing `marker` throw
    pub fn fail_script(&self, marker: &str) {
        self.model
            .lock()
            .unwrap()
            .failing_scripts
            .insert(marker.to_string());
    }

    /// Undo [`FakePage::fail_script`]
    pub fn heal_script(&self, marker: &str) {
        self.model.lock().unwrap().failing_scripts.remove(marker);
    }

    /// The page deletes the installed fiber helpers
    pub fn drop_helpers(&self) {
        self.model.lock().unwrap().helpers_dropped = true;
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::SeqCst);
    }

    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    /// Params of every call to `method`, in order
    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.model
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls(method).len()
    }

    /// Number of `Runtime.evaluate` calls whose expression carries `marker`
    pub fn evaluate_calls(&self, marker: &str) -> usize {
        self.calls("Runtime.evaluate")
            .iter()
            .filter(|params| {
                params["expression"]
                    .as_str()
                    .is_some_and(|e| e.contains(marker))
            })
            .count()
    }

    /// Number of `Runtime.callFunctionOn` calls whose function carries `marker`
    pub fn script_calls(&self, marker: &str) -> usize {
        self.calls("Runtime.callFunctionOn")
            .iter()
            .filter(|params| {
                params["functionDeclaration"]
                    .as_str()
                    .is_some_and(|d| d.contains(marker))
            })
            .count()
    }
}

#[async_trait]
impl DebuggerTransport for FakePage {
    async fn attach(&self) -> Result<()> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        self.attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        self.detaches.fetch_add(1, Ordering::SeqCst);
        self.attached.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    async fn send_raw(&self, method: &str, params: Value) -> Result<Value> {
        tokio::task::yield_now().await;
        if !self.is_attached() {
            return Err(Error::NotAttached);
        }
        let mut model = self.model.lock().unwrap();
        model.calls.push((method.to_string(), params.clone()));
        model.respond(method, &params)
    }

    fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }
}
