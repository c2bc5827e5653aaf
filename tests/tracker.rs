//! Tracker behavior against a scripted page
//!
//! The poll period is set far beyond any test's runtime, so hit-tests are
//! explicit `hit_test_once` calls. The timer tests run on a paused clock
//! with a short period instead.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

use common::{FakeNode, FakePage};
use hoverlens::{
    CdpMessage, DebuggerTransport, ElementTracker, SelectedElement, TrackerConfig, World,
};

const HELPER_INSTALL: &str = "fiber-walk@v1 install";
const HELPER_WALK: &str = "fiber-walk@v1 call";
const INLINE_WALK: &str = "fiber-walk@v1 inline";

fn config() -> TrackerConfig {
    TrackerConfig {
        poll_interval: Duration::from_secs(3600),
        ..TrackerConfig::for_tab("TAB")
    }
}

fn polling_config() -> TrackerConfig {
    TrackerConfig {
        poll_interval: Duration::from_millis(100),
        ..TrackerConfig::for_tab("TAB")
    }
}

fn selection(element_id: &str, frame_id: &str, tab_id: &str) -> SelectedElement {
    SelectedElement {
        element_id: element_id.to_string(),
        frame_id: frame_id.to_string(),
        tab_id: tab_id.to_string(),
    }
}

/// Main document with one cross-origin widget frame
fn storefront() -> Arc<FakePage> {
    let page = FakePage::new();
    page.add_frame("MAIN", None, "https://shop.test/", "Storefront");
    page.add_frame(
        "WIDGET",
        Some("MAIN"),
        "https://pay.test/embed",
        "Checkout Widget",
    );
    page.add_node(
        10,
        FakeNode::new("button", "MAIN")
            .with_text("Buy now")
            .with_attributes(json!({ "class": "btn primary" }))
            .with_fiber(vec![
                json!({ "typeName": "Button" }),
                json!({ "typeName": "Card" }),
                json!({}),
            ])
            .with_properties(json!({ "dataset": { "sku": "A1" } })),
    );
    page.add_node(20, FakeNode::new("span", "WIDGET").with_text("Total"));
    Arc::new(page)
}

async fn announce_contexts(tracker: &ElementTracker, page: &FakePage) {
    let contexts = [
        (1, "MAIN", World::Isolated),
        (2, "MAIN", World::Main),
        (3, "WIDGET", World::Isolated),
        (4, "WIDGET", World::Main),
    ];
    for (id, frame_id, world) in contexts {
        tracker
            .handle_event(
                "Runtime.executionContextCreated",
                &page.context_created(id, frame_id, world),
            )
            .await;
    }
}

async fn start_session(page: &Arc<FakePage>) -> ElementTracker {
    let tracker = ElementTracker::new(page.clone(), config());
    tracker.set_context_selection(true).await;
    announce_contexts(&tracker, page).await;
    tracker
}

async fn hover(tracker: &ElementTracker, page: &FakePage, backend_node_id: i64) {
    page.set_hit(Some(backend_node_id));
    tracker.update_mouse_position(40.0, 25.0).await;
    tracker.hit_test_once().await;
}

#[test]
fn test_fresh_tracker_is_idle() {
    let page = storefront();
    let tracker = ElementTracker::new(page.clone(), config());

    assert!(tokio_test::block_on(tracker.currently_hovered_element_id()).is_none());
    assert!(!tokio_test::block_on(tracker.is_selection_active()));
    assert!(!tokio_test::block_on(tracker.is_connected()));
    assert_eq!(page.attaches(), 0);
}

#[tokio::test]
async fn test_end_to_end_across_frames() {
    let page = storefront();
    let tracker = start_session(&page).await;
    assert!(tracker.is_connected().await);

    hover(&tracker, &page, 10).await;
    assert_eq!(
        tracker.currently_hovered_element_id().await.as_deref(),
        Some("10")
    );

    let info = tracker
        .collect_hovered_element_info()
        .await
        .expect("button info");
    assert_eq!(info.id, "10");
    assert_eq!(info.node_type, "button");
    assert_eq!(info.frame_id, "MAIN");
    assert_eq!(info.frame_url, "https://shop.test/");
    assert_eq!(info.frame_title.as_deref(), Some("Storefront"));
    assert!(info.is_main_frame);
    assert_eq!(info.text_content.as_deref(), Some("Buy now"));
    assert_eq!(
        info.attributes.get("class").map(String::as_str),
        Some("btn primary")
    );
    assert_eq!(info.component_names(), vec!["Button", "Card"]);
    let properties = info.own_properties.as_ref().expect("own properties");
    assert_eq!(properties["dataset"]["sku"], "A1");

    hover(&tracker, &page, 20).await;
    let info = tracker
        .collect_hovered_element_info()
        .await
        .expect("span info");
    assert_eq!(info.node_type, "span");
    assert_eq!(info.frame_id, "WIDGET");
    assert_eq!(info.frame_title.as_deref(), Some("Checkout Widget"));
    assert_eq!(info.frame_url, "https://pay.test/embed");
    assert!(!info.is_main_frame);
    assert!(info.component_ancestry.is_none());

    tracker.set_context_selection(false).await;
    assert!(tracker.collect_hovered_element_info().await.is_none());
    assert!(!tracker.is_connected().await);
    assert_eq!(page.attaches(), 1);
    assert_eq!(page.detaches(), 1);
}

#[tokio::test]
async fn test_no_node_without_hover_stops_hit_testing() {
    let page = storefront();
    let tracker = start_session(&page).await;

    page.set_hit(None);
    tracker.update_mouse_position(4000.0, 4000.0).await;
    tracker.hit_test_once().await;
    assert_eq!(page.call_count("DOM.getNodeForLocation"), 1);

    tracker.hit_test_once().await;
    tracker.hit_test_once().await;
    assert_eq!(page.call_count("DOM.getNodeForLocation"), 1);
    assert!(tracker.currently_hovered_element_id().await.is_none());

    hover(&tracker, &page, 10).await;
    assert_eq!(page.call_count("DOM.getNodeForLocation"), 2);
    assert_eq!(
        tracker.currently_hovered_element_id().await.as_deref(),
        Some("10")
    );
}

#[tokio::test]
async fn test_no_node_with_hover_clears_hover() {
    let page = storefront();
    let tracker = start_session(&page).await;
    let mut changes = tracker.subscribe_hover();

    hover(&tracker, &page, 10).await;
    assert_eq!(changes.try_recv().unwrap(), Some("10".to_string()));

    page.set_hit(None);
    tracker.hit_test_once().await;
    assert!(tracker.currently_hovered_element_id().await.is_none());
    assert_eq!(changes.try_recv().unwrap(), None);
    assert_eq!(page.call_count("Overlay.hideHighlight"), 1);
}

#[tokio::test]
async fn test_repeated_hit_on_same_node_is_noop() {
    let page = storefront();
    let tracker = start_session(&page).await;
    let mut changes = tracker.subscribe_hover();

    hover(&tracker, &page, 10).await;
    tracker.hit_test_once().await;
    tracker.hit_test_once().await;

    assert_eq!(changes.try_recv().unwrap(), Some("10".to_string()));
    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(page.call_count("Overlay.highlightNode"), 1);
    assert_eq!(page.calls("Overlay.highlightNode")[0]["backendNodeId"], 10);
}

#[tokio::test]
async fn test_moving_between_nodes_rehighlights() {
    let page = storefront();
    let tracker = start_session(&page).await;
    let mut changes = tracker.subscribe_hover();

    hover(&tracker, &page, 10).await;
    hover(&tracker, &page, 20).await;

    assert_eq!(changes.try_recv().unwrap(), Some("10".to_string()));
    assert_eq!(changes.try_recv().unwrap(), Some("20".to_string()));
    assert_eq!(page.call_count("Overlay.hideHighlight"), 1);
    assert_eq!(page.call_count("Overlay.highlightNode"), 2);
}

#[tokio::test]
async fn test_selection_start_is_idempotent() {
    let page = storefront();
    let tracker = ElementTracker::new(page.clone(), config());

    tracker.set_context_selection(true).await;
    tracker.set_context_selection(true).await;
    assert!(tracker.is_selection_active().await);
    assert_eq!(page.attaches(), 1);
    assert_eq!(page.call_count("DOM.enable"), 1);

    tracker.set_context_selection(false).await;
    tracker.set_context_selection(false).await;
    assert!(!tracker.is_selection_active().await);
    assert_eq!(page.detaches(), 1);
}

#[tokio::test]
async fn test_frame_detach_clears_hover_once() {
    let page = storefront();
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 20).await;
    let mut changes = tracker.subscribe_hover();

    let detached = json!({ "frameId": "WIDGET", "reason": "remove" });
    tracker.handle_event("Page.frameDetached", &detached).await;
    assert_eq!(changes.try_recv().unwrap(), None);
    assert!(tracker.currently_hovered_element_id().await.is_none());

    tracker.handle_event("Page.frameDetached", &detached).await;
    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));
    assert!(tracker.frame_info("WIDGET", false).await.is_none());
}

#[tokio::test]
async fn test_swapped_frame_keeps_hover() {
    let page = storefront();
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 20).await;

    tracker
        .handle_event(
            "Page.frameDetached",
            &json!({ "frameId": "WIDGET", "reason": "swap" }),
        )
        .await;
    assert_eq!(
        tracker.currently_hovered_element_id().await.as_deref(),
        Some("20")
    );
}

#[tokio::test]
async fn test_context_pair_removal_clears_hover() {
    let page = storefront();
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 20).await;
    let mut changes = tracker.subscribe_hover();

    tracker
        .handle_event(
            "Runtime.executionContextDestroyed",
            &json!({ "executionContextId": 3 }),
        )
        .await;
    assert_eq!(
        tracker.currently_hovered_element_id().await.as_deref(),
        Some("20")
    );

    tracker
        .handle_event(
            "Runtime.executionContextDestroyed",
            &json!({ "executionContextId": 4 }),
        )
        .await;
    assert!(tracker.currently_hovered_element_id().await.is_none());
    assert_eq!(changes.try_recv().unwrap(), None);
}

#[tokio::test]
async fn test_destroyed_context_handles_are_not_reused() {
    let page = storefront();
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 10).await;

    assert!(tracker.collect_hovered_element_info().await.is_some());
    let resolved = page.call_count("DOM.resolveNode");
    assert_eq!(resolved, 2);

    assert!(tracker.collect_hovered_element_info().await.is_some());
    assert_eq!(page.call_count("DOM.resolveNode"), resolved);

    // The isolated world dies and a new one comes back under the same id
    tracker
        .handle_event(
            "Runtime.executionContextDestroyed",
            &json!({ "executionContextId": 1 }),
        )
        .await;
    tracker
        .handle_event(
            "Runtime.executionContextCreated",
            &page.context_created(1, "MAIN", World::Isolated),
        )
        .await;

    assert!(tracker.collect_hovered_element_info().await.is_some());
    let calls = page.calls("DOM.resolveNode");
    assert_eq!(calls.len(), resolved + 1);
    assert_eq!(calls[resolved]["executionContextId"], 1);
    assert_eq!(calls[resolved]["backendNodeId"], 10);
}

#[tokio::test]
async fn test_property_copy_failure_keeps_partial_result() {
    let page = storefront();
    page.add_node(
        30,
        FakeNode::new("header", "MAIN")
            .with_fiber(vec![json!({ "typeName": "Header" })])
            .throwing_properties(),
    );
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 30).await;

    let info = tracker
        .collect_hovered_element_info()
        .await
        .expect("partial info");
    assert_eq!(info.node_type, "header");
    assert_eq!(info.component_names(), vec!["Header"]);
    assert!(info.own_properties.is_none());
}

#[tokio::test]
async fn test_unreachable_main_world_returns_dom_snapshot() {
    let page = storefront();
    page.fail_resolve_in(2);
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 10).await;

    let info = tracker
        .collect_hovered_element_info()
        .await
        .expect("snapshot info");
    assert_eq!(info.node_type, "button");
    assert_eq!(info.frame_title.as_deref(), Some("Storefront"));
    assert!(info.component_ancestry.is_none());
    assert!(info.own_properties.is_none());
}

#[tokio::test]
async fn test_isolated_world_created_when_not_announced() {
    let page = storefront();
    let tracker = ElementTracker::new(page.clone(), config());
    tracker.set_context_selection(true).await;
    hover(&tracker, &page, 10).await;

    let info = tracker
        .collect_hovered_element_info()
        .await
        .expect("info without announced contexts");
    assert_eq!(info.node_type, "button");
    assert_eq!(info.component_names(), vec!["Button", "Card"]);

    let created = page.calls("Page.createIsolatedWorld");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["frameId"], "MAIN");
    assert_eq!(created[0]["worldName"], "hoverlens");
}

#[tokio::test]
async fn test_external_detach_resets_everything() {
    let page = storefront();
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 10).await;
    let mut changes = tracker.subscribe_hover();

    tracker
        .handle_message(CdpMessage::Detached {
            reason: "target closed".to_string(),
        })
        .await;

    assert!(!tracker.is_selection_active().await);
    assert!(!tracker.is_connected().await);
    assert!(tracker.currently_hovered_element_id().await.is_none());
    assert_eq!(changes.try_recv().unwrap(), None);
    assert!(tracker.collect_hovered_element_info().await.is_none());
}

#[tokio::test]
async fn test_inspector_detached_event() {
    let page = storefront();
    let tracker = start_session(&page).await;

    tracker
        .handle_event(
            "Inspector.detached",
            &json!({ "reason": "replaced_with_devtools" }),
        )
        .await;
    assert!(!tracker.is_selection_active().await);
    assert!(!tracker.is_connected().await);
}

#[tokio::test]
async fn test_loading_target_defers_attach() {
    let page = storefront();
    page.set_loading(true);
    let tracker = ElementTracker::new(page.clone(), config());

    tracker.set_context_selection(true).await;
    assert!(tracker.is_selection_active().await);
    assert!(!tracker.is_connected().await);
    assert_eq!(page.attaches(), 0);

    page.set_loading(false);
    hover(&tracker, &page, 10).await;
    assert!(tracker.is_connected().await);
    assert_eq!(page.attaches(), 1);
    assert_eq!(
        tracker.currently_hovered_element_id().await.as_deref(),
        Some("10")
    );
}

#[tokio::test]
async fn test_requests_outside_session_detach_afterwards() {
    let page = storefront();
    let tracker = ElementTracker::new(page.clone(), config());

    assert!(
        tracker
            .check_frame_validity("WIDGET", "https://pay.test/embed")
            .await
    );
    assert_eq!(page.attaches(), 1);
    assert_eq!(page.detaches(), 1);
    assert!(!tracker.is_connected().await);

    assert!(
        !tracker
            .check_frame_validity("WIDGET", "https://elsewhere.test/")
            .await
    );
    assert!(!tracker.check_frame_validity("GONE", "https://shop.test/").await);
    assert_eq!(page.detaches(), 3);
}

#[tokio::test]
async fn test_element_checks() {
    let page = storefront();
    page.add_node(40, FakeNode::new("div", "MAIN").detached());
    let tracker = ElementTracker::new(page.clone(), config());

    assert!(tracker.check_element_exists("10", "MAIN").await);
    assert!(!tracker.check_element_exists("40", "MAIN").await);
    assert!(!tracker.check_element_exists("999", "MAIN").await);
    assert!(!tracker.check_element_exists("not-a-node", "MAIN").await);
    assert!(!tracker.check_element_exists("10", "NO_SUCH_FRAME").await);

    assert!(tracker.scroll_to_element("20", "WIDGET").await);
    assert_eq!(page.script_calls("hoverlens:scroll-into-view"), 1);
    assert!(!tracker.is_connected().await);
}

#[tokio::test]
async fn test_frame_titles() {
    let page = storefront();
    let tracker = start_session(&page).await;

    let discover = page.calls("Target.setDiscoverTargets");
    assert_eq!(discover.len(), 1);
    assert_eq!(discover[0]["discover"], true);

    let main = tracker.frame_info("MAIN", false).await.expect("main frame");
    assert!(main.is_main_frame);
    assert!(main.title.is_none());

    tracker
        .handle_event(
            "Target.targetInfoChanged",
            &json!({
                "targetInfo": {
                    "targetId": "MAIN",
                    "type": "page",
                    "title": "Cart (2)",
                    "url": "https://shop.test/",
                    "attached": true
                }
            }),
        )
        .await;
    let main = tracker.frame_info("MAIN", false).await.expect("main frame");
    assert_eq!(main.title.as_deref(), Some("Cart (2)"));

    // Other tabs show up through discovery too
    tracker
        .handle_event(
            "Target.targetInfoChanged",
            &json!({
                "targetInfo": {
                    "targetId": "SOME_OTHER_TAB",
                    "type": "page",
                    "title": "Inbox",
                    "url": "https://mail.test/",
                    "attached": false
                }
            }),
        )
        .await;
    assert!(tracker.frame_info("SOME_OTHER_TAB", false).await.is_none());

    tracker.handle_title_updated("WIDGET", "Pay").await;
    let widget = tracker.frame_info("WIDGET", true).await.expect("widget");
    assert_eq!(widget.title.as_deref(), Some("Pay"));
    assert!(!widget.is_main_frame);
}

#[tokio::test]
async fn test_main_frame_navigation_resets_page_state() {
    let page = storefront();
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 10).await;
    let mut changes = tracker.subscribe_hover();

    tracker
        .handle_event(
            "Page.frameNavigated",
            &json!({
                "frame": {
                    "id": "MAIN",
                    "loaderId": "L2",
                    "url": "https://shop.test/cart",
                    "securityOrigin": "https://shop.test",
                    "mimeType": "text/html"
                },
                "type": "Navigation"
            }),
        )
        .await;

    assert_eq!(changes.try_recv().unwrap(), None);
    assert!(tracker.currently_hovered_element_id().await.is_none());
    let main = tracker.frame_info("MAIN", false).await.expect("main frame");
    assert_eq!(main.url, "https://shop.test/cart");
    assert!(tracker.frame_info("WIDGET", false).await.is_none());
}

#[tokio::test]
async fn test_update_highlights() {
    let page = storefront();
    let tracker = start_session(&page).await;
    let selected = vec![
        selection("10", "MAIN", "TAB"),
        selection("20", "WIDGET", "OTHER"),
    ];

    tracker.update_highlights(&selected, "TAB").await;
    assert_eq!(page.script_calls("hoverlens:show-selection"), 1);

    tracker.update_highlights(&[], "TAB").await;
    assert_eq!(page.script_calls("hoverlens:hide-selection"), 1);

    // Another tab is in front: nothing of ours is drawn
    tracker.update_highlights(&selected, "OTHER").await;
    assert_eq!(page.script_calls("hoverlens:show-selection"), 1);
}

#[tokio::test]
async fn test_dispose_detaches() {
    let page = storefront();
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 10).await;

    tracker.dispose().await;
    assert!(!tracker.is_selection_active().await);
    assert!(!tracker.is_connected().await);
    assert!(!page.is_attached());
    assert_eq!(page.detaches(), 1);
}

#[tokio::test]
async fn test_outline_removed_after_idle_detach() {
    let page = storefront();
    let tracker = ElementTracker::new(page.clone(), config());

    tracker
        .update_highlights(&[selection("10", "MAIN", "TAB")], "TAB")
        .await;
    assert_eq!(page.script_calls("hoverlens:show-selection"), 1);
    assert!(!tracker.is_connected().await);

    // Reattached with no contexts announced yet
    tracker.update_highlights(&[], "TAB").await;
    assert_eq!(page.script_calls("hoverlens:hide-selection"), 1);

    tracker.update_highlights(&[], "TAB").await;
    assert_eq!(page.script_calls("hoverlens:hide-selection"), 1);
    assert_eq!(page.detaches(), 2);
}

#[tokio::test]
async fn test_failed_outline_removal_is_retried() {
    let page = storefront();
    let tracker = start_session(&page).await;
    tracker
        .update_highlights(&[selection("10", "MAIN", "TAB")], "TAB")
        .await;

    page.fail_script("hoverlens:hide-selection");
    tracker.update_highlights(&[], "TAB").await;
    assert_eq!(page.script_calls("hoverlens:hide-selection"), 1);

    page.heal_script("hoverlens:hide-selection");
    tracker.update_highlights(&[], "TAB").await;
    assert_eq!(page.script_calls("hoverlens:hide-selection"), 2);

    tracker.update_highlights(&[], "TAB").await;
    assert_eq!(page.script_calls("hoverlens:hide-selection"), 2);
}

#[tokio::test]
async fn test_failed_helper_install_falls_back_to_inline_walk() {
    let page = storefront();
    page.fail_script(HELPER_INSTALL);
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 10).await;

    for _ in 0..2 {
        let info = tracker
            .collect_hovered_element_info()
            .await
            .expect("button info");
        assert_eq!(info.component_names(), vec!["Button", "Card"]);
    }
    assert_eq!(page.evaluate_calls(HELPER_INSTALL), 1);
    assert_eq!(page.script_calls(HELPER_WALK), 0);
    assert_eq!(page.script_calls(INLINE_WALK), 2);
}

#[tokio::test]
async fn test_dropped_helpers_switch_to_inline_walk() {
    let page = storefront();
    page.drop_helpers();
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 10).await;

    let info = tracker
        .collect_hovered_element_info()
        .await
        .expect("button info");
    assert_eq!(info.component_names(), vec!["Button", "Card"]);
    assert_eq!(page.evaluate_calls(HELPER_INSTALL), 1);
    assert_eq!(page.script_calls(HELPER_WALK), 1);
    assert_eq!(page.script_calls(INLINE_WALK), 1);

    // The context is not asked for its helpers again
    let info = tracker
        .collect_hovered_element_info()
        .await
        .expect("button info");
    assert_eq!(info.component_names(), vec!["Button", "Card"]);
    assert_eq!(page.evaluate_calls(HELPER_INSTALL), 1);
    assert_eq!(page.script_calls(HELPER_WALK), 1);
    assert_eq!(page.script_calls(INLINE_WALK), 2);
}

#[tokio::test]
async fn test_concurrent_first_extractions_install_helpers_once() {
    let page = storefront();
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 10).await;

    let (first, second) = tokio::join!(
        tracker.collect_hovered_element_info(),
        tracker.collect_hovered_element_info()
    );
    assert_eq!(first.expect("first").component_names(), vec!["Button", "Card"]);
    assert_eq!(second.expect("second").component_names(), vec!["Button", "Card"]);
    assert_eq!(page.evaluate_calls(HELPER_INSTALL), 1);
    assert_eq!(page.script_calls(HELPER_WALK), 2);
    assert_eq!(page.script_calls(INLINE_WALK), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_timer_hit_tests_once_per_period() {
    let page = storefront();
    let tracker = ElementTracker::new(page.clone(), polling_config());
    tracker.set_context_selection(true).await;
    page.set_hit(Some(10));
    tracker.update_mouse_position(40.0, 25.0).await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(page.call_count("DOM.getNodeForLocation"), 3);
    assert_eq!(
        tracker.currently_hovered_element_id().await.as_deref(),
        Some("10")
    );
    assert_eq!(page.call_count("Overlay.highlightNode"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_activation_keeps_one_timer() {
    let page = storefront();
    let tracker = ElementTracker::new(page.clone(), polling_config());
    tracker.set_context_selection(true).await;
    tracker.set_context_selection(true).await;
    page.set_hit(Some(10));
    tracker.update_mouse_position(40.0, 25.0).await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(page.call_count("DOM.getNodeForLocation"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_no_ticks_after_session_end() {
    let page = storefront();
    let tracker = ElementTracker::new(page.clone(), polling_config());
    tracker.set_context_selection(true).await;
    page.set_hit(Some(10));
    tracker.update_mouse_position(40.0, 25.0).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(page.call_count("DOM.getNodeForLocation"), 1);

    tracker.set_context_selection(false).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(page.call_count("DOM.getNodeForLocation"), 1);
    assert!(tracker.currently_hovered_element_id().await.is_none());

    // A new session gets a fresh timer
    tracker.set_context_selection(true).await;
    tracker.update_mouse_position(40.0, 25.0).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(page.call_count("DOM.getNodeForLocation"), 2);
}

#[tokio::test]
async fn test_lost_transport_reattaches_on_next_tick() {
    let page = storefront();
    let tracker = start_session(&page).await;
    hover(&tracker, &page, 10).await;

    // The channel drops without any detach event reaching the tracker
    page.detach().await.unwrap();
    tracker.hit_test_once().await;
    assert!(!tracker.is_connected().await);
    assert_eq!(
        tracker.currently_hovered_element_id().await.as_deref(),
        Some("10")
    );

    tracker.hit_test_once().await;
    assert!(tracker.is_connected().await);
    assert_eq!(page.attaches(), 2);
    assert_eq!(page.call_count("DOM.getNodeForLocation"), 2);
}
