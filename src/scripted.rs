//! A deterministic, in-memory page
//!
//! `ScriptedPage` implements [`PageSession`] over a tiny block-layout model:
//! elements stack vertically in document order, a section is as tall as its
//! children, and the stitch container is laid out at the document origin on
//! top of the flow. It records what the engine did (viewports, scrolls,
//! screenshots) and can be told to fail, which makes the capture engine
//! testable without a browser.
//!
//! Selector matching runs on `scraper`: the attached tree is serialized to
//! HTML with each element's arena index in a `data-node` attribute, so any
//! selector `scraper` understands works here. Nesting therefore has to be
//! valid HTML (no blocks inside a `p`). Screenshots return a PNG signature and IHDR chunk whose size is the
//! clip in physical pixels; no pixel data follows.

use crate::geometry::ElementBox;
use crate::session::{ElementHandle, NodeMove, PageSession, ScreenshotParams, ScrollMetrics, StitchLayout};
use crate::{Error, Result, Viewport};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type ScreenshotFailure = Box<dyn FnMut(&ScreenshotParams) -> Option<String> + Send>;

const BODY: usize = 0;

/// Attribute carrying the arena index of each serialized element
const NODE_ATTR: &str = "data-node";

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeKind {
    Body,
    Element,
    Placeholder,
    Container { gap: f64, padding: f64 },
    Wrapper,
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    kind: NodeKind,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Own height; a section adds its children on top
    height: f64,
    width: Option<f64>,
}

impl Node {
    fn element(spec: &BlockSpec, height: f64, width: Option<f64>) -> Self {
        Self {
            tag: spec.tag.clone().unwrap_or_else(|| "div".to_string()),
            id: spec.id.clone(),
            classes: spec.classes.clone(),
            kind: NodeKind::Element,
            parent: None,
            children: Vec::new(),
            height,
            width,
        }
    }

    fn synthetic(tag: &str, kind: NodeKind) -> Self {
        Self {
            tag: tag.to_string(),
            id: None,
            classes: Vec::new(),
            kind,
            parent: None,
            children: Vec::new(),
            height: 0.0,
            width: None,
        }
    }

    fn label(&self) -> String {
        let mut out = self.tag.clone();
        if let Some(id) = &self.id {
            out.push('#');
            out.push_str(id);
        }
        for class in &self.classes {
            out.push('.');
            out.push_str(class);
        }
        out
    }
}

/// Builder shorthand `tag#id.class` for one block
#[derive(Debug, Clone, Default, PartialEq)]
struct BlockSpec {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl BlockSpec {
    fn parse(text: &str) -> Self {
        let text = text.trim();
        let mut spec = BlockSpec::default();

        let tag_end = text.find(['#', '.']).unwrap_or(text.len());
        if tag_end > 0 {
            spec.tag = Some(text[..tag_end].to_ascii_lowercase());
        }

        let mut rest = &text[tag_end..];
        while let Some(marker) = rest.chars().next() {
            let body = &rest[1..];
            let end = body.find(['#', '.']).unwrap_or(body.len());
            let name = &body[..end];
            if !name.is_empty() {
                match marker {
                    '#' => spec.id = Some(name.to_string()),
                    _ => spec.classes.push(name.to_string()),
                }
            }
            rest = &body[end..];
        }
        spec
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| Error::ScriptError(format!("invalid selector {:?}: {:?}", selector, e)))
}

fn node_index(element: &ElementRef<'_>) -> Option<usize> {
    element.value().attr(NODE_ATTR)?.parse().ok()
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

struct State {
    nodes: Vec<Node>,
    viewport: Viewport,
    scroll_y: f64,
    scroll_frozen: bool,
    scroll_history: Vec<f64>,
    viewport_history: Vec<Viewport>,
    screenshots: Vec<ScreenshotParams>,
    failed_screenshots: usize,
    screenshot_failure: Option<ScreenshotFailure>,
    wraps_left: Option<usize>,
    eval_results: HashMap<String, serde_json::Value>,
    asset_waits: usize,
    /// Blocks hidden around a stitch container
    hidden: Vec<usize>,
    handle_releases: usize,
}

struct Layout {
    boxes: Vec<Option<ElementBox>>,
    height: f64,
    width: f64,
}

impl State {
    fn attached(&self, id: usize) -> bool {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n == BODY {
                return true;
            }
            cur = self.nodes.get(n).and_then(|node| node.parent);
        }
        false
    }

    fn layout(&self) -> Layout {
        let mut boxes = vec![None; self.nodes.len()];
        let width = self.viewport.width as f64;
        let flow = self.place(BODY, 0.0, 0.0, width, &mut boxes);

        let mut height = flow;
        let mut doc_width = width;
        for &child in &self.nodes[BODY].children {
            if let NodeKind::Container { gap, padding } = self.nodes[child].kind {
                let (w, h) = self.place_container(child, gap, padding, width, &mut boxes);
                height = height.max(h);
                doc_width = doc_width.max(w);
            }
        }
        for b in boxes.iter().flatten() {
            doc_width = doc_width.max(b.right());
        }

        Layout {
            boxes,
            height,
            width: doc_width,
        }
    }

    fn place(&self, id: usize, x: f64, y: f64, avail: f64, boxes: &mut [Option<ElementBox>]) -> f64 {
        let node = &self.nodes[id];
        if node.kind == NodeKind::Placeholder {
            boxes[id] = Some(ElementBox::new(x, y, 0.0, 0.0));
            return 0.0;
        }
        let width = node.width.unwrap_or(avail);
        let mut cursor = y + node.height;
        for &child in &node.children {
            if matches!(self.nodes[child].kind, NodeKind::Container { .. }) {
                continue;
            }
            cursor += self.place(child, x, cursor, width, boxes);
        }
        let height = cursor - y;
        boxes[id] = Some(ElementBox::new(x, y, width, height));
        height
    }

    fn place_container(
        &self,
        id: usize,
        gap: f64,
        padding: f64,
        avail: f64,
        boxes: &mut [Option<ElementBox>],
    ) -> (f64, f64) {
        let node = &self.nodes[id];
        let mut cursor = padding;
        let mut inner_width: f64 = 0.0;
        for (i, &wrapper) in node.children.iter().enumerate() {
            if i > 0 {
                cursor += gap;
            }
            let content = self.nodes[wrapper]
                .children
                .first()
                .and_then(|&c| self.nodes[c].width)
                .unwrap_or(avail);
            cursor += self.place(wrapper, padding, cursor, content, boxes);
            inner_width = inner_width.max(content);
        }
        let height = cursor + padding;
        let width = inner_width + padding * 2.0;
        boxes[id] = Some(ElementBox::new(0.0, 0.0, width, height));
        (width, height)
    }

    fn metrics(&self) -> ScrollMetrics {
        let layout = self.layout();
        let vw = self.viewport.width as f64;
        let vh = self.viewport.height as f64;
        ScrollMetrics {
            scroll_x: 0.0,
            scroll_y: self.scroll_y,
            scroll_width: layout.width.max(vw),
            scroll_height: layout.height.max(vh),
            viewport_width: vw,
            viewport_height: vh,
        }
    }

    fn scroll_to(&mut self, y: f64) {
        if !self.scroll_frozen {
            let m = self.metrics();
            let max = (m.scroll_height - m.viewport_height).max(0.0);
            self.scroll_y = y.clamp(0.0, max);
        }
        self.scroll_history.push(self.scroll_y);
    }

    /// The attached tree as an HTML document, every element tagged with its index
    fn to_html(&self) -> String {
        let mut out = String::from("<!DOCTYPE html><html><head></head>");
        self.write_html(BODY, &mut out);
        out.push_str("</html>");
        out
    }

    fn write_html(&self, id: usize, out: &mut String) {
        let node = &self.nodes[id];
        if node.kind == NodeKind::Placeholder {
            out.push_str("<!--placeholder-->");
            return;
        }
        out.push_str(&format!("<{} {}=\"{}\"", node.tag, NODE_ATTR, id));
        if let Some(html_id) = &node.id {
            out.push_str(&format!(" id=\"{}\"", escape_attr(html_id)));
        }
        if !node.classes.is_empty() {
            out.push_str(&format!(" class=\"{}\"", escape_attr(&node.classes.join(" "))));
        }
        out.push('>');
        for &child in &node.children {
            self.write_html(child, out);
        }
        out.push_str(&format!("</{}>", node.tag));
    }

    fn node_id(&self, handle: &ElementHandle) -> Result<usize> {
        handle
            .id()
            .strip_prefix("node:")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n < self.nodes.len())
            .ok_or_else(|| Error::ScriptError(format!("unknown element handle {}", handle.id())))
    }

    fn detach(&mut self, id: usize) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|c| *c != id);
        }
    }

    fn push_node(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn snapshot(&self, id: usize, out: &mut String) {
        let node = &self.nodes[id];
        match node.kind {
            NodeKind::Placeholder => out.push_str("<placeholder>"),
            NodeKind::Container { .. } => out.push_str("<stitch>"),
            NodeKind::Wrapper => out.push_str("<wrapper>"),
            NodeKind::Body | NodeKind::Element => out.push_str(&node.label()),
        }
        if self.hidden.contains(&id) {
            out.push_str("(hidden)");
        }
        if !node.children.is_empty() {
            out.push('[');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.snapshot(child, out);
            }
            out.push(']');
        }
    }
}

fn handle(id: usize) -> ElementHandle {
    ElementHandle::new(format!("node:{}", id))
}

/// Minimal PNG prefix: signature plus an IHDR chunk for `width`x`height`
fn png_header(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(33);
    out.extend_from_slice(b"\x89PNG\r\n\x1a\n");
    out.extend_from_slice(&13u32.to_be_bytes());
    out.extend_from_slice(b"IHDR");
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&[8, 6, 0, 0, 0]);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out
}

/// In-memory page session
pub struct ScriptedPage {
    state: Mutex<State>,
}

impl ScriptedPage {
    pub fn builder() -> ScriptedPageBuilder {
        ScriptedPageBuilder::new()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The `id` attribute of the element behind `handle`
    pub fn element_id(&self, handle: &ElementHandle) -> Option<String> {
        let state = self.state();
        let id = state.node_id(handle).ok()?;
        state.nodes[id].id.clone()
    }

    /// Serialized tree of everything attached under `body`
    pub fn dom_snapshot(&self) -> String {
        let state = self.state();
        let mut out = String::new();
        state.snapshot(BODY, &mut out);
        out
    }

    /// Parameters of every successful screenshot, in order
    pub fn screenshots(&self) -> Vec<ScreenshotParams> {
        self.state().screenshots.clone()
    }

    pub fn failed_screenshot_count(&self) -> usize {
        self.state().failed_screenshots
    }

    pub fn viewport_history(&self) -> Vec<Viewport> {
        self.state().viewport_history.clone()
    }

    /// Scroll offset after every `scroll_to`
    pub fn scroll_history(&self) -> Vec<f64> {
        self.state().scroll_history.clone()
    }

    /// `id` attributes of the blocks currently hidden by `hide_outside`
    pub fn hidden_ids(&self) -> Vec<String> {
        let state = self.state();
        state
            .hidden
            .iter()
            .filter_map(|&n| state.nodes[n].id.clone())
            .collect()
    }

    /// How many times `release_handles` was called
    pub fn handle_releases(&self) -> usize {
        self.state().handle_releases
    }

    pub fn asset_waits(&self) -> usize {
        self.state().asset_waits
    }

    /// Make screenshots fail whenever `rule` returns a message
    pub fn fail_screenshots_when<F>(&self, rule: F)
    where
        F: FnMut(&ScreenshotParams) -> Option<String> + Send + 'static,
    {
        self.state().screenshot_failure = Some(Box::new(rule));
    }

    /// Let `n` stitch moves succeed, then fail the next ones
    pub fn fail_wrap_after(&self, n: usize) {
        self.state().wraps_left = Some(n);
    }

    /// Ignore scroll requests, as a page with a locked scroller would
    pub fn freeze_scrolling(&self) {
        self.state().scroll_frozen = true;
    }

    pub fn set_eval_result(&self, expression: &str, value: serde_json::Value) {
        self.state().eval_results.insert(expression.to_string(), value);
    }
}

impl PageSession for ScriptedPage {
    fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        Ok(self
            .state()
            .eval_results
            .get(expression)
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    fn set_viewport(&self, viewport: &Viewport) -> Result<()> {
        let mut state = self.state();
        state.viewport = *viewport;
        state.viewport_history.push(*viewport);
        Ok(())
    }

    fn scroll_metrics(&self) -> Result<ScrollMetrics> {
        Ok(self.state().metrics())
    }

    fn scroll_to(&self, y: f64) -> Result<()> {
        self.state().scroll_to(y);
        Ok(())
    }

    fn wait_for_assets(&self, _timeout: Duration) -> Result<bool> {
        self.state().asset_waits += 1;
        Ok(true)
    }

    fn next_frame(&self) -> Result<()> {
        Ok(())
    }

    fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        let selector = parse_selector(selector)?;
        let document = Html::parse_document(&self.state().to_html());
        Ok(document
            .select(&selector)
            .filter_map(|el| node_index(&el))
            .map(handle)
            .collect())
    }

    fn has_matching_ancestor(&self, element: &ElementHandle, selector: &str) -> Result<bool> {
        let selector = parse_selector(selector)?;
        let (target, html) = {
            let state = self.state();
            (state.node_id(element)?, state.to_html())
        };
        let document = Html::parse_document(&html);
        let by_index = parse_selector(&format!("[{}=\"{}\"]", NODE_ATTR, target))?;
        let Some(found) = document.select(&by_index).next() else {
            // Detached elements have no ancestors in the document
            return Ok(false);
        };
        Ok(found
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| selector.matches(&ancestor)))
    }

    fn bounding_box(&self, element: &ElementHandle) -> Result<Option<ElementBox>> {
        let state = self.state();
        let id = state.node_id(element)?;
        if !state.attached(id) {
            return Ok(None);
        }
        Ok(state.layout().boxes[id].filter(|b| !b.is_empty()))
    }

    fn scroll_into_view(&self, element: &ElementHandle) -> Result<()> {
        let mut state = self.state();
        let id = state.node_id(element)?;
        if let Some(b) = state.layout().boxes[id] {
            state.scroll_to(b.y);
        }
        Ok(())
    }

    fn create_stitch_container(&self, layout: &StitchLayout) -> Result<ElementHandle> {
        let mut state = self.state();
        let mut node = Node::synthetic(
            "div",
            NodeKind::Container {
                gap: layout.gap,
                padding: layout.padding,
            },
        );
        node.parent = Some(BODY);
        let id = state.push_node(node);
        state.nodes[BODY].children.push(id);
        Ok(handle(id))
    }

    fn wrap_into(&self, container: &ElementHandle, element: &ElementHandle) -> Result<NodeMove> {
        let mut state = self.state();
        if let Some(left) = state.wraps_left.as_mut() {
            if *left == 0 {
                return Err(Error::ScriptError("injected wrap failure".into()));
            }
            *left -= 1;
        }

        let container_id = state.node_id(container)?;
        let element_id = state.node_id(element)?;
        let parent = state.nodes[element_id]
            .parent
            .ok_or_else(|| Error::ScriptError(format!("{} is detached", element.id())))?;
        let slot = state.nodes[parent]
            .children
            .iter()
            .position(|c| *c == element_id)
            .ok_or_else(|| Error::ScriptError("element missing from its parent".into()))?;

        let mut placeholder = Node::synthetic("#comment", NodeKind::Placeholder);
        placeholder.parent = Some(parent);
        let placeholder_id = state.push_node(placeholder);
        state.nodes[parent].children[slot] = placeholder_id;

        let mut wrapper = Node::synthetic("div", NodeKind::Wrapper);
        wrapper.parent = Some(container_id);
        wrapper.children.push(element_id);
        let wrapper_id = state.push_node(wrapper);
        state.nodes[container_id].children.push(wrapper_id);
        state.nodes[element_id].parent = Some(wrapper_id);

        Ok(NodeMove {
            moved: element.clone(),
            placeholder: handle(placeholder_id),
            wrapper: handle(wrapper_id),
        })
    }

    fn unwrap(&self, node_move: &NodeMove) -> Result<()> {
        let mut state = self.state();
        let element_id = state.node_id(&node_move.moved)?;
        let placeholder_id = state.node_id(&node_move.placeholder)?;
        let wrapper_id = state.node_id(&node_move.wrapper)?;

        let parent = state.nodes[placeholder_id]
            .parent
            .ok_or_else(|| Error::ScriptError("placeholder is detached".into()))?;
        let slot = state.nodes[parent]
            .children
            .iter()
            .position(|c| *c == placeholder_id)
            .ok_or_else(|| Error::ScriptError("placeholder missing from its parent".into()))?;

        state.detach(element_id);
        state.nodes[parent].children[slot] = element_id;
        state.nodes[element_id].parent = Some(parent);
        state.nodes[placeholder_id].parent = None;
        state.detach(wrapper_id);
        Ok(())
    }

    fn remove_node(&self, node: &ElementHandle) -> Result<()> {
        let mut state = self.state();
        let id = state.node_id(node)?;
        state.detach(id);
        Ok(())
    }

    fn hide_outside(&self, container: &ElementHandle) -> Result<usize> {
        let mut state = self.state();
        let container_id = state.node_id(container)?;
        let targets: Vec<usize> = state.nodes[BODY]
            .children
            .iter()
            .copied()
            .filter(|&c| c != container_id && state.nodes[c].kind == NodeKind::Element)
            .filter(|c| !state.hidden.contains(c))
            .collect();
        state.hidden.extend(&targets);
        Ok(targets.len())
    }

    fn show_outside(&self) -> Result<()> {
        self.state().hidden.clear();
        Ok(())
    }

    fn release_handles(&self) -> Result<()> {
        // Handles are plain indices here and stay valid
        self.state().handle_releases += 1;
        Ok(())
    }

    fn cut_candidates(&self, region: &ElementBox) -> Result<Vec<f64>> {
        let state = self.state();
        let layout = state.layout();

        let is_flow_element = |id: &usize| state.nodes[*id].kind == NodeKind::Element;
        let mut root = BODY;
        loop {
            let elements: Vec<usize> = state.nodes[root].children.iter().copied().filter(|c| is_flow_element(c)).collect();
            match elements.as_slice() {
                [only] => root = *only,
                _ => break,
            }
        }

        let mut bottoms = Vec::new();
        for &child in state.nodes[root].children.iter().filter(|c| is_flow_element(*c)) {
            let node = &state.nodes[child];
            let items: Vec<usize> = if node.tag == "ul" || node.tag == "ol" {
                node.children
                    .iter()
                    .copied()
                    .filter(|c| state.nodes[*c].tag == "li")
                    .collect()
            } else {
                Vec::new()
            };
            let targets = if items.is_empty() { vec![child] } else { items };
            for id in targets {
                if let Some(b) = layout.boxes[id] {
                    let offset = b.bottom() - region.y;
                    if offset > 0.0 && offset <= region.height {
                        bottoms.push(offset);
                    }
                }
            }
        }
        bottoms.sort_by(|a, b| a.total_cmp(b));
        bottoms.dedup();
        Ok(bottoms)
    }

    fn screenshot(&self, params: &ScreenshotParams) -> Result<Vec<u8>> {
        let mut state = self.state();
        if let Some(rule) = state.screenshot_failure.as_mut() {
            if let Some(message) = rule(params) {
                state.failed_screenshots += 1;
                return Err(Error::ScriptError(message));
            }
        }

        let dsf = state.viewport.device_scale_factor;
        let (w, h) = match params.clip {
            Some(clip) => (clip.width, clip.height),
            None => (state.viewport.width as f64, state.viewport.height as f64),
        };
        let width = (w * dsf).round().max(1.0) as u32;
        let height = (h * dsf).round().max(1.0) as u32;
        state.screenshots.push(params.clone());
        Ok(png_header(width, height))
    }
}

/// Builds the document of a [`ScriptedPage`]
pub struct ScriptedPageBuilder {
    nodes: Vec<Node>,
    parents: Vec<usize>,
    viewport: Viewport,
}

impl Default for ScriptedPageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPageBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::synthetic("body", NodeKind::Body)],
            parents: vec![BODY],
            viewport: Viewport::default(),
        }
    }

    pub fn viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    fn add(&mut self, spec: &str, height: f64, width: Option<f64>) -> usize {
        let mut node = Node::element(&BlockSpec::parse(spec), height, width);
        let parent = self.parents.last().copied().unwrap_or(BODY);
        node.parent = Some(parent);
        self.nodes.push(node);
        let id = self.nodes.len() - 1;
        self.nodes[parent].children.push(id);
        id
    }

    /// A leaf block `height` CSS pixels tall spanning its parent's width
    pub fn block(mut self, spec: &str, height: f64) -> Self {
        self.add(spec, height, None);
        self
    }

    pub fn block_sized(mut self, spec: &str, width: f64, height: f64) -> Self {
        self.add(spec, height, Some(width));
        self
    }

    /// A block whose height is the sum of the children added by `children`
    pub fn section<F>(mut self, spec: &str, children: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        let id = self.add(spec, 0.0, None);
        self.parents.push(id);
        let mut built = children(self);
        built.parents.pop();
        built
    }

    /// A `ul`/`ol` with one `li` per entry of `items`
    pub fn list(self, spec: &str, items: &[f64]) -> Self {
        self.section(spec, |mut b| {
            for &h in items {
                b.add("li", h, None);
            }
            b
        })
    }

    pub fn build(self) -> ScriptedPage {
        ScriptedPage {
            state: Mutex::new(State {
                nodes: self.nodes,
                viewport: self.viewport,
                scroll_y: 0.0,
                scroll_frozen: false,
                scroll_history: Vec::new(),
                viewport_history: Vec::new(),
                screenshots: Vec::new(),
                failed_screenshots: 0,
                screenshot_failure: None,
                wraps_left: None,
                eval_results: HashMap::new(),
                asset_waits: 0,
                hidden: Vec::new(),
                handle_releases: 0,
            }),
        }
    }
}
