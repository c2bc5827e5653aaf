//! Typed decoding of the CDP event feed
//!
//! Only events that affect frame, context or connection state are decoded;
//! everything else maps to `None` and is dropped by the tracker.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::types::*;

/// An event the tracker reacts to
#[derive(Debug, Clone)]
pub enum PageEvent {
    FrameNavigated(Frame),
    FrameAttached {
        frame_id: String,
        parent_frame_id: Option<String>,
    },
    FrameDetached {
        frame_id: String,
    },
    FrameTitleUpdated {
        frame_id: String,
        title: String,
    },
    ContextCreated(ExecutionContextDescription),
    ContextDestroyed(ExecutionContextId),
    ContextsCleared,
    Detached {
        reason: String,
    },
}

fn decode<T: DeserializeOwned>(method: &str, params: &Value) -> Option<T> {
    match serde_json::from_value::<T>(params.clone()) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Malformed {} event: {}", method, e);
            None
        }
    }
}

impl PageEvent {
    /// Decode a raw CDP event
    pub fn from_cdp(method: &str, params: &Value) -> Option<Self> {
        match method {
            "Page.frameNavigated" => decode::<PageFrameNavigatedEvent>(method, params)
                .map(|e| PageEvent::FrameNavigated(e.frame)),
            "Page.frameAttached" => {
                decode::<PageFrameAttachedEvent>(method, params).map(|e| PageEvent::FrameAttached {
                    frame_id: e.frame_id,
                    parent_frame_id: e.parent_frame_id,
                })
            }
            "Page.frameDetached" => {
                // A frame swapped into another renderer process keeps living
                decode::<PageFrameDetachedEvent>(method, params)
                    .filter(|e| e.reason.as_deref() != Some("swap"))
                    .map(|e| PageEvent::FrameDetached {
                        frame_id: e.frame_id,
                    })
            }
            "Target.targetInfoChanged" => decode::<TargetTargetInfoChangedEvent>(method, params)
                .filter(|e| e.target_info.r#type == "page")
                .map(|e| PageEvent::FrameTitleUpdated {
                    frame_id: e.target_info.target_id,
                    title: e.target_info.title,
                }),
            "Runtime.executionContextCreated" => {
                decode::<RuntimeExecutionContextCreatedEvent>(method, params)
                    .map(|e| PageEvent::ContextCreated(e.context))
            }
            "Runtime.executionContextDestroyed" => {
                decode::<RuntimeExecutionContextDestroyedEvent>(method, params)
                    .map(|e| PageEvent::ContextDestroyed(e.execution_context_id))
            }
            "Runtime.executionContextsCleared" => Some(PageEvent::ContextsCleared),
            "Inspector.detached" => decode::<InspectorDetachedEvent>(method, params)
                .map(|e| PageEvent::Detached { reason: e.reason }),
            _ => None,
        }
    }
}
