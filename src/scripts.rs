//! Page scripts
//!
//! Every piece of JavaScript the tracker runs inside the inspected page lives
//! here. Each script carries a `hoverlens:<name>@v<version>` marker so a
//! script found in a trace can be matched to its template, and each has a
//! fixed return shape that the Rust side decodes into a typed struct.
//!
//! Scripts run against arbitrary page code: every property read that can
//! hit a getter or a proxy is wrapped so it yields `undefined` instead of
//! throwing.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cdp::types::ExceptionDetails;
use crate::error::{Error, Result};

/// A versioned page-script template
#[derive(Debug, Clone, Copy)]
pub struct PageScript {
    pub name: &'static str,
    pub version: u32,
    pub source: &'static str,
}

impl PageScript {
    /// Marker embedded in the source
    pub fn tag(&self) -> String {
        format!("hoverlens:{}@v{}", self.name, self.version)
    }
}

/// Global key the fiber helpers are installed under in the main world
pub const HELPERS_KEY: &str = "__hoverlens_fiber_helpers__";

/// Snapshot of a hovered node: tag, attributes, text and geometry.
///
/// Args: `(elementId: string, textLimit: number)`.
/// Returns `DomSnapshot` or `null` for nodes with no element ancestor.
pub const EXTRACT_ELEMENT: PageScript = PageScript {
    name: "extract-element",
    version: 1,
    source: r#"function (elementId, textLimit) {
    /* hoverlens:extract-element@v1 */
    const el = this.nodeType === 1 ? this : this.parentElement;
    if (!el) return null;
    const attributes = {};
    try {
        for (const attr of Array.from(el.attributes || [])) {
            attributes[attr.name] = String(attr.value);
        }
    } catch (e) {}
    let textContent = null;
    try {
        const raw = typeof el.innerText === 'string' ? el.innerText : el.textContent;
        textContent = typeof raw === 'string' ? raw.slice(0, textLimit) : null;
    } catch (e) {}
    let boundingBox = null;
    try {
        const r = el.getBoundingClientRect();
        boundingBox = { x: r.x, y: r.y, width: r.width, height: r.height };
    } catch (e) {}
    return {
        id: elementId,
        tagName: String(el.tagName || el.nodeName || '').toLowerCase(),
        attributes,
        textContent,
        boundingBox,
    };
}"#,
};

/// Bounded copy of a node's own enumerable data properties.
///
/// Args: `(maxDepth, maxKeys, maxNested, denylist: string[], denyPrefixes: string[])`.
/// Returns `{ properties: object, truncated: boolean }`.
pub const OWN_PROPERTIES: PageScript = PageScript {
    name: "own-properties",
    version: 1,
    source: r#"function (maxDepth, maxKeys, maxNested, denylist, denyPrefixes) {
    /* hoverlens:own-properties@v1 */
    const deny = new Set(denylist);
    const denied = (k) => deny.has(k) || denyPrefixes.some((p) => k.startsWith(p));
    const seen = new WeakSet();
    const keysOf = (o) => { try { return Object.keys(o); } catch (e) { return null; } };
    const copy = (value, depth) => {
        if (value === null) return null;
        const t = typeof value;
        if (t === 'string' || t === 'boolean') return value;
        if (t === 'number') return Number.isFinite(value) ? value : String(value);
        if (t === 'bigint') return value.toString();
        if (t !== 'object') return undefined;
        if (depth > maxDepth) return Array.isArray(value) ? '[Array]' : '[Object]';
        if (seen.has(value)) return '[Circular]';
        try {
            if (typeof Node !== 'undefined' && value instanceof Node) return '[' + value.nodeName + ']';
        } catch (e) {}
        seen.add(value);
        if (Array.isArray(value)) {
            const out = [];
            const n = Math.min(value.length, maxNested);
            for (let i = 0; i < n; i++) {
                let item;
                try { item = copy(value[i], depth + 1); } catch (e) { item = undefined; }
                out.push(item === undefined ? null : item);
            }
            return out;
        }
        const keys = keysOf(value);
        if (keys === null) return '[Unreadable]';
        const out = {};
        let count = 0;
        for (const k of keys) {
            if (count >= maxNested) break;
            if (denied(k)) continue;
            let v;
            try { v = copy(value[k], depth + 1); } catch (e) { continue; }
            if (v !== undefined) { out[k] = v; count++; }
        }
        return out;
    };
    const properties = {};
    let count = 0;
    let truncated = false;
    for (const k of keysOf(this) || []) {
        if (denied(k)) continue;
        if (count >= maxKeys) { truncated = true; break; }
        let raw;
        try { raw = this[k]; } catch (e) { continue; }
        if (typeof raw === 'function') continue;
        const v = copy(raw, 1);
        if (v !== undefined) { properties[k] = v; count++; }
    }
    return { properties, truncated };
}"#,
};

/// Walk from a DOM node to its framework fiber and sample the `return` chain.
///
/// Called as `walk(node, maxHops, maxAncestors)`.
/// Returns `{ found: boolean, samples: FiberSample[] }`.
pub const FIBER_WALK: PageScript = PageScript {
    name: "fiber-walk",
    version: 1,
    source: r#"function (node, maxHops, maxAncestors) {
    /* hoverlens:fiber-walk@v1 */
    const str = (read) => {
        try {
            const v = read();
            return typeof v === 'string' && v.length > 0 ? v : undefined;
        } catch (e) {
            return undefined;
        }
    };
    const fiberOf = (n) => {
        let keys;
        try { keys = Object.keys(n); } catch (e) { return null; }
        for (const k of keys) {
            if (k.startsWith('__reactFiber$') || k.startsWith('__reactInternalInstance$')) {
                try {
                    const f = n[k];
                    if (f && typeof f === 'object') return f;
                } catch (e) {}
            }
        }
        return null;
    };
    let current = node;
    let fiber = null;
    for (let i = 0; current && i <= maxAncestors; i++) {
        fiber = fiberOf(current);
        if (fiber) break;
        try { current = current.parentNode; } catch (e) { current = null; }
    }
    if (!fiber) return { found: false, samples: [] };
    const seen = new Set();
    const samples = [];
    let f = fiber;
    for (let hop = 0; f && hop < maxHops && !seen.has(f); hop++) {
        seen.add(f);
        samples.push({
            typeName: str(() => f.type && f.type.name),
            typeDisplayName: str(() => f.type && f.type.displayName),
            elementTypeName: str(() => f.elementType && f.elementType.name),
            elementTypeDisplayName: str(() => f.elementType && f.elementType.displayName),
            ownerName: str(() => f._debugOwner && f._debugOwner.name),
            ownerEnv: str(() => f._debugOwner && f._debugOwner.env),
        });
        try { f = f.return; } catch (e) { f = null; }
    }
    return { found: true, samples };
}"#,
};

/// Install the fiber helpers under [`HELPERS_KEY`], non-enumerable.
/// Evaluates to `true`.
pub fn install_fiber_helpers() -> String {
    format!(
        "(() => {{\n/* {tag} install */\nconst walk = {source};\nObject.defineProperty(globalThis, '{key}', {{ value: Object.freeze({{ version: {version}, walk }}), enumerable: false, configurable: true, writable: false }});\nreturn true;\n}})()",
        tag = FIBER_WALK.tag(),
        source = FIBER_WALK.source,
        key = HELPERS_KEY,
        version = FIBER_WALK.version,
    )
}

/// Call the installed helpers on `this`. Returns `{ helpersMissing: true }`
/// when the page no longer has them (or has an incompatible version).
pub fn fiber_walk_via_helpers() -> String {
    format!(
        "function (maxHops, maxAncestors) {{\n/* {tag} call */\nconst h = globalThis['{key}'];\nif (!h || h.version !== {version} || typeof h.walk !== 'function') return {{ helpersMissing: true }};\nreturn h.walk(this, maxHops, maxAncestors);\n}}",
        tag = FIBER_WALK.tag(),
        key = HELPERS_KEY,
        version = FIBER_WALK.version,
    )
}

/// Self-contained walk for pages where the helpers could not be installed
pub fn fiber_walk_inline() -> String {
    format!(
        "function (maxHops, maxAncestors) {{\n/* {tag} inline */\nreturn ({source})(this, maxHops, maxAncestors);\n}}",
        tag = FIBER_WALK.tag(),
        source = FIBER_WALK.source,
    )
}

/// `document.title` of the context's frame
pub const DOCUMENT_TITLE: PageScript = PageScript {
    name: "document-title",
    version: 1,
    source: "/* hoverlens:document-title@v1 */ document.title",
};

/// Whether the node is still in its document
pub const IS_CONNECTED: PageScript = PageScript {
    name: "is-connected",
    version: 1,
    source: "function () { /* hoverlens:is-connected@v1 */ return this.isConnected === true; }",
};

/// Smoothly scroll the node's element into the middle of the viewport
pub const SCROLL_INTO_VIEW: PageScript = PageScript {
    name: "scroll-into-view",
    version: 1,
    source: r#"function () {
    /* hoverlens:scroll-into-view@v1 */
    const el = this.nodeType === 1 ? this : this.parentElement;
    if (!el || !el.isConnected) return false;
    el.scrollIntoView({ behavior: 'smooth', block: 'center', inline: 'nearest' });
    return true;
}"#,
};

/// Draw (or refresh) a persistent selection box over the node.
///
/// Runs in the isolated world so the bookkeeping is invisible to the page.
/// Args: `(elementId)`. Returns `true` when drawn.
pub const SHOW_SELECTION: PageScript = PageScript {
    name: "show-selection",
    version: 2,
    source: r#"function (elementId) {
    /* hoverlens:show-selection@v2 */
    const target = this.nodeType === 1 ? this : this.parentElement;
    if (!target) return false;
    const doc = target.ownerDocument;
    let state = globalThis.__hoverlensSelection;
    if (!state) {
        const layer = doc.createElement('div');
        layer.style.cssText = 'position:fixed;inset:0;pointer-events:none;z-index:2147483647;';
        const place = (el, box) => {
            const r = el.getBoundingClientRect();
            box.style.transform = 'translate(' + r.left + 'px,' + r.top + 'px)';
            box.style.width = r.width + 'px';
            box.style.height = r.height + 'px';
        };
        state = { layer, entries: new Map(), place };
        const refresh = () => {
            for (const e of state.entries.values()) {
                if (e.target.isConnected) state.place(e.target, e.box);
            }
        };
        doc.defaultView.addEventListener('scroll', refresh, true);
        doc.defaultView.addEventListener('resize', refresh);
        globalThis.__hoverlensSelection = state;
    }
    if (!state.layer.isConnected) (doc.body || doc.documentElement).appendChild(state.layer);
    const existing = state.entries.get(elementId);
    const box = existing ? existing.box : doc.createElement('div');
    box.style.cssText = 'position:absolute;left:0;top:0;box-sizing:border-box;border:2px solid rgba(59,130,246,0.9);background:rgba(59,130,246,0.08);border-radius:2px;';
    box.dataset.hoverlensSelection = elementId;
    for (const other of Array.from(doc.querySelectorAll('[data-hoverlens-selection]'))) {
        if (other !== box && other.dataset.hoverlensSelection === elementId) other.remove();
    }
    state.layer.appendChild(box);
    state.entries.set(elementId, { target, box });
    state.place(target, box);
    return true;
}"#,
};

/// Remove a selection box. Called with `this` = the isolated world's global.
///
/// Boxes are also found through the document, so a box drawn from an
/// earlier isolated world of the same document is removed too.
/// Args: `(elementId)`. Returns `true` if a box was removed.
pub const HIDE_SELECTION: PageScript = PageScript {
    name: "hide-selection",
    version: 2,
    source: r#"function (elementId) {
    /* hoverlens:hide-selection@v2 */
    let removed = false;
    const state = globalThis.__hoverlensSelection;
    const entry = state && state.entries.get(elementId);
    if (entry) {
        entry.box.remove();
        state.entries.delete(elementId);
        removed = true;
    }
    for (const box of Array.from(document.querySelectorAll('[data-hoverlens-selection]'))) {
        if (box.dataset.hoverlensSelection === elementId) {
            box.remove();
            removed = true;
        }
    }
    return removed;
}"#,
};

/// Decode a by-value script result into its contract type.
///
/// A thrown exception is an [`Error::Script`], `null`/`undefined` is
/// `Ok(None)`, and a value of the wrong shape is an [`Error::Payload`].
pub fn decode<T: DeserializeOwned>(
    script: &str,
    value: Option<Value>,
    exception: Option<ExceptionDetails>,
) -> Result<Option<T>> {
    if let Some(exception) = exception {
        return Err(Error::script(script, exception.message()));
    }
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::payload(script, e.to_string())),
    }
}
