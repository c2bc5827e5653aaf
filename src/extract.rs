//! Extraction output and page-script payload contracts
//!
//! [`ExtractedElementInfo`] is what callers get back for a hovered node.
//! Every optional field is independently nullable because each is gathered
//! by a separate script run against untrusted page code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cdp::types::CallArgument;
use crate::cdp::{BackendNodeId, Session};
use crate::error::Result;
use crate::frames::FrameRecord;
use crate::react::ComponentAncestryNode;
use crate::scripts::{self, EXTRACT_ELEMENT, OWN_PROPERTIES};

/// Reflection and prototype names never copied out of a node
pub const PROPERTY_DENYLIST: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
    "hasOwnProperty",
    "isPrototypeOf",
    "propertyIsEnumerable",
    "toString",
    "valueOf",
    "toLocaleString",
];

/// Framework bookkeeping keys; the fiber graph is cyclic and huge
pub const PROPERTY_DENY_PREFIXES: &[&str] = &[
    "__reactFiber$",
    "__reactInternalInstance$",
    "__reactContainer$",
    "__reactProps$",
    "__reactEvents$",
];

/// Bounds on the own-property copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyLimits {
    /// Nesting depth below the node itself
    pub max_depth: u32,
    /// Top-level keys before the copy is marked truncated
    pub max_keys: u32,
    /// Elements per nested array (and keys per nested object)
    pub max_array_len: u32,
}

impl Default for PropertyLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_keys: 500,
            max_array_len: 50,
        }
    }
}

impl PropertyLimits {
    fn call_arguments(&self) -> Vec<CallArgument> {
        vec![
            CallArgument::value(self.max_depth),
            CallArgument::value(self.max_keys),
            CallArgument::value(self.max_array_len),
            CallArgument::value(PROPERTY_DENYLIST.to_vec()),
            CallArgument::value(PROPERTY_DENY_PREFIXES.to_vec()),
        ]
    }
}

/// Element geometry in viewport CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Return shape of [`EXTRACT_ELEMENT`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomSnapshot {
    pub id: String,
    pub tag_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub text_content: Option<String>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// Return shape of [`OWN_PROPERTIES`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OwnProperties {
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub truncated: bool,
}

/// Everything gathered about one hovered element
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedElementInfo {
    /// Stable identifier (the backend node id in decimal)
    pub id: String,
    /// Lower-cased tag name
    pub node_type: String,
    pub backend_node_id: BackendNodeId,
    pub attributes: BTreeMap<String, String>,
    /// `None` when the text could not be read
    pub text_content: Option<String>,
    /// `None` when layout could not be queried
    pub bounding_box: Option<BoundingBox>,
    /// `None` when the main world was unreachable or the copy threw
    pub own_properties: Option<Map<String, Value>>,
    /// The copy stopped at the top-level key limit
    pub properties_truncated: bool,
    /// `None` when the node is not rendered by a component framework
    pub component_ancestry: Option<ComponentAncestryNode>,
    pub frame_id: String,
    /// `None` until learned; cross-origin frames may never report one
    pub frame_title: Option<String>,
    pub frame_url: String,
    pub is_main_frame: bool,
}

impl ExtractedElementInfo {
    /// Start a record from the DOM snapshot and its frame
    pub fn new(snapshot: DomSnapshot, backend_node_id: BackendNodeId, frame: FrameRecord) -> Self {
        Self {
            id: snapshot.id,
            node_type: snapshot.tag_name,
            backend_node_id,
            attributes: snapshot.attributes,
            text_content: snapshot.text_content,
            bounding_box: snapshot.bounding_box,
            own_properties: None,
            properties_truncated: false,
            component_ancestry: None,
            frame_id: frame.frame_id,
            frame_title: frame.title,
            frame_url: frame.url,
            is_main_frame: frame.is_main_frame,
        }
    }

    /// Component names, nearest first
    pub fn component_names(&self) -> Vec<&str> {
        self.component_ancestry
            .as_ref()
            .map(|a| a.names())
            .unwrap_or_default()
    }
}

/// Run [`EXTRACT_ELEMENT`] against a node handle
pub async fn snapshot(
    session: &Session,
    handle: &str,
    element_id: &str,
    text_limit: usize,
) -> Result<Option<DomSnapshot>> {
    let result = session
        .call_function_on(
            handle,
            EXTRACT_ELEMENT.source,
            vec![
                CallArgument::value(element_id),
                CallArgument::value(text_limit),
            ],
            true,
        )
        .await?;
    scripts::decode(
        EXTRACT_ELEMENT.name,
        result.result.value,
        result.exception_details,
    )
}

/// Run [`OWN_PROPERTIES`] against a main-world node handle
pub async fn own_properties(
    session: &Session,
    handle: &str,
    limits: &PropertyLimits,
) -> Result<Option<OwnProperties>> {
    let result = session
        .call_function_on(handle, OWN_PROPERTIES.source, limits.call_arguments(), true)
        .await?;
    scripts::decode(
        OWN_PROPERTIES.name,
        result.result.value,
        result.exception_details,
    )
}
