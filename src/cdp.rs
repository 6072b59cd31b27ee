//! Chrome DevTools Protocol backend

use crate::geometry::ElementBox;
use crate::session::{ElementHandle, NodeMove, PageSession, ScreenshotParams, ScrollMetrics, StitchLayout};
use crate::{BrowserConfig, Error, Result, Viewport};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page, Runtime};
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Remote objects created by this session; released together after each capture
const OBJECT_GROUP: &str = "docshot";

const WAIT_FOR_ASSETS: &str = r#"(async function(timeoutMs){
    const fonts = (document.fonts && document.fonts.ready) ? document.fonts.ready.catch(function(){}) : Promise.resolve();
    const images = Array.from(document.images).filter(function(img){ return !img.complete; }).map(function(img){
        return new Promise(function(resolve){
            img.addEventListener('load', resolve, { once: true });
            img.addEventListener('error', resolve, { once: true });
        });
    });
    const loaded = Promise.all([fonts].concat(images)).then(function(){ return true; });
    const timer = new Promise(function(resolve){ setTimeout(function(){ resolve(false); }, timeoutMs); });
    return await Promise.race([loaded, timer]);
})({{TIMEOUT_MS}})"#;

const NEXT_FRAME: &str = r#"new Promise(function(resolve){
    requestAnimationFrame(function(){ requestAnimationFrame(function(){ resolve(true); }); });
})"#;

const SCROLL_METRICS: &str = r#"(function(){
    const d = document.documentElement;
    const b = document.body || d;
    return {
        scrollX: window.scrollX,
        scrollY: window.scrollY,
        scrollWidth: Math.max(d.scrollWidth, b.scrollWidth, d.clientWidth),
        scrollHeight: Math.max(d.scrollHeight, b.scrollHeight, d.clientHeight),
        viewportWidth: window.innerWidth,
        viewportHeight: window.innerHeight
    };
})()"#;

const HAS_MATCHING_ANCESTOR: &str = r#"function(selector){
    const parent = this.parentElement;
    return !!(parent && parent.closest(selector));
}"#;

const BOUNDING_BOX: &str = r#"function(){
    if (!this.isConnected) return null;
    const r = this.getBoundingClientRect();
    if (r.width === 0 || r.height === 0) return null;
    return { x: r.left + window.scrollX, y: r.top + window.scrollY, width: r.width, height: r.height };
}"#;

const SCROLL_INTO_VIEW: &str = r#"function(){
    this.scrollIntoView({ block: 'start', inline: 'nearest', behavior: 'instant' });
    return true;
}"#;

const CREATE_STITCH_CONTAINER: &str = r#"(function(gap, padding, transparent){
    const c = document.createElement('div');
    c.setAttribute('data-docshot-stitch', '');
    const bg = getComputedStyle(document.body).backgroundColor;
    const opaque = bg && bg !== 'transparent' && bg !== 'rgba(0, 0, 0, 0)' ? bg : '#ffffff';
    Object.assign(c.style, {
        position: 'absolute', left: '0px', top: '0px', zIndex: '2147483647',
        display: 'flex', flexDirection: 'column', alignItems: 'center',
        gap: gap + 'px', padding: padding + 'px', boxSizing: 'border-box',
        width: 'max-content', minWidth: '0px', margin: '0px',
        background: transparent ? 'transparent' : opaque
    });
    document.body.appendChild(c);
    return c;
})({{GAP}}, {{PADDING}}, {{TRANSPARENT}})"#;

const INSERT_PLACEHOLDER: &str = r#"function(){
    const p = document.createComment('docshot-stitch-placeholder');
    this.parentNode.insertBefore(p, this);
    return p;
}"#;

const WRAP_INTO: &str = r#"function(el){
    const w = document.createElement('div');
    w.style.display = 'flex';
    w.style.justifyContent = 'center';
    w.style.width = '100%';
    this.appendChild(w);
    w.appendChild(el);
    return w;
}"#;

const UNWRAP: &str = r#"function(el, wrapper){
    if (this.parentNode) this.parentNode.replaceChild(el, this);
    if (wrapper && wrapper.parentNode) wrapper.parentNode.removeChild(wrapper);
    return true;
}"#;

const REMOVE_NODE: &str = r#"function(){
    if (this.parentNode) this.parentNode.removeChild(this);
    return true;
}"#;

const HIDE_OUTSIDE: &str = r#"function(){
    let hidden = 0;
    Array.from(document.body.children).forEach(function(el){
        if (el === this || el.hasAttribute('data-docshot-hidden')) return;
        el.setAttribute('data-docshot-hidden', '');
        if (el.hasAttribute('style')) el.setAttribute('data-docshot-style', el.getAttribute('style'));
        el.style.setProperty('visibility', 'hidden', 'important');
        hidden++;
    }, this);
    return hidden;
}"#;

const SHOW_OUTSIDE: &str = r#"(function(){
    document.querySelectorAll('[data-docshot-hidden]').forEach(function(el){
        if (el.hasAttribute('data-docshot-style')) {
            el.setAttribute('style', el.getAttribute('data-docshot-style'));
            el.removeAttribute('data-docshot-style');
        } else {
            el.removeAttribute('style');
        }
        el.removeAttribute('data-docshot-hidden');
    });
    return true;
})()"#;

const CUT_CANDIDATES: &str = r#"(function(top, height){
    let root = document.body;
    while (root && root.children.length === 1) root = root.children[0];
    const out = [];
    const push = function(el){
        const b = el.getBoundingClientRect().bottom + window.scrollY - top;
        if (b > 0 && b <= height) out.push(b);
    };
    Array.from(root ? root.children : []).forEach(function(el){
        const style = getComputedStyle(el);
        if (style.display === 'none' || style.display.indexOf('inline') === 0) return;
        if (style.position === 'absolute' || style.position === 'fixed') return;
        const tag = el.tagName.toLowerCase();
        const items = (tag === 'ul' || tag === 'ol')
            ? Array.from(el.children).filter(function(c){ return c.tagName.toLowerCase() === 'li'; })
            : [];
        if (items.length) items.forEach(push); else push(el);
    });
    return out.sort(function(a, b){ return a - b; });
})({{TOP}}, {{HEIGHT}})"#;

/// Launch headless Chrome with the given configuration
pub fn launch(config: &BrowserConfig) -> Result<Browser> {
    let mut builder = LaunchOptions::default_builder();
    builder
        .headless(true)
        .sandbox(config.sandbox)
        .window_size(Some((config.viewport.width, config.viewport.height)))
        .idle_browser_timeout(Duration::from_millis(config.timeout_ms.max(30_000) * 4));
    if let Some(path) = &config.chrome_path {
        builder.path(Some(path.clone()));
    }
    let launch_options = builder
        .build()
        .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

    Browser::new(launch_options).map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))
}

/// Build a protocol command from its JSON form; unset optional fields stay `None`.
fn command<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::CdpError(format!("Malformed protocol command: {}", e)))
}

fn arg_value(value: Value) -> Value {
    json!({ "value": value })
}

fn arg_node(node: &ElementHandle) -> Value {
    json!({ "objectId": node.id() })
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn exception_message(details: &Runtime::ExceptionDetails) -> String {
    details
        .exception
        .as_ref()
        .and_then(|e| e.description.clone())
        .unwrap_or_else(|| details.text.clone())
}

/// One Chrome tab driven as a [`PageSession`]
///
/// The session exclusively owns its tab; other sessions created from the same
/// `Browser` get their own tabs and can run in parallel.
pub struct CdpSession {
    tab: Arc<Tab>,
    config: BrowserConfig,
}

impl CdpSession {
    /// Open a new tab in `browser`
    pub fn new(browser: &Browser, config: BrowserConfig) -> Result<Self> {
        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;

        tab.set_default_timeout(Duration::from_millis(config.timeout_ms));

        if let Some(user_agent) = &config.user_agent {
            tab.set_user_agent(user_agent, None, None)
                .map_err(|e| Error::InitializationError(format!("Failed to set user agent: {}", e)))?;
        }

        if !config.headers.is_empty() {
            // headless_chrome expects a HashMap<&str, &str>
            let headers: std::collections::HashMap<&str, &str> = config
                .headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();

            tab.set_extra_http_headers(headers)
                .map_err(|e| Error::InitializationError(format!("Failed to set headers: {}", e)))?;
        }

        Ok(Self { tab, config })
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Navigate and wait for the load to finish
    pub fn load_url(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;

        debug!("Loaded {}", url);
        Ok(())
    }

    /// Replace the page with `html`
    pub fn set_content(&self, html: &str) -> Result<()> {
        self.load_url("about:blank")?;
        let script = format!(
            "(function(html){{ document.open(); document.write(html); document.close(); return true; }})({})",
            js_string(html)
        );
        self.evaluate(&script)
            .map_err(|e| Error::LoadError(format!("Failed to write document: {}", e)))?;

        let timeout = Duration::from_millis(self.config.timeout_ms);
        if !self.wait_for_function("document.readyState === 'complete'", timeout)? {
            return Err(Error::Timeout(self.config.timeout_ms));
        }
        Ok(())
    }

    /// Close the tab
    pub fn close(self) -> Result<()> {
        self.tab
            .close(true)
            .map_err(|e| Error::Other(format!("Failed to close tab: {}", e)))?;
        Ok(())
    }

    fn runtime_evaluate(&self, expression: &str, by_value: bool) -> Result<Runtime::RemoteObject> {
        let method: Runtime::Evaluate = command(json!({
            "expression": expression,
            "objectGroup": OBJECT_GROUP,
            "returnByValue": by_value,
            "awaitPromise": true,
        }))?;
        let ret = self.tab.call_method(method)?;
        if let Some(details) = ret.exception_details {
            return Err(Error::ScriptError(exception_message(&details)));
        }
        Ok(ret.result)
    }

    fn call_function(&self, target: &ElementHandle, declaration: &str, args: Vec<Value>, by_value: bool) -> Result<Runtime::RemoteObject> {
        let method: Runtime::CallFunctionOn = command(json!({
            "functionDeclaration": declaration,
            "objectId": target.id(),
            "arguments": args,
            "objectGroup": OBJECT_GROUP,
            "returnByValue": by_value,
            "awaitPromise": true,
        }))?;
        let ret = self.tab.call_method(method)?;
        if let Some(details) = ret.exception_details {
            return Err(Error::ScriptError(exception_message(&details)));
        }
        Ok(ret.result)
    }

    fn call_value(&self, target: &ElementHandle, declaration: &str, args: Vec<Value>) -> Result<Value> {
        Ok(self
            .call_function(target, declaration, args, true)?
            .value
            .unwrap_or(Value::Null))
    }

    fn call_handle(&self, target: &ElementHandle, declaration: &str, args: Vec<Value>) -> Result<ElementHandle> {
        self.call_function(target, declaration, args, false)?
            .object_id
            .map(ElementHandle::new)
            .ok_or_else(|| Error::ScriptError("function did not return a node".into()))
    }

    fn evaluate_handle(&self, expression: &str) -> Result<ElementHandle> {
        self.runtime_evaluate(expression, false)?
            .object_id
            .map(ElementHandle::new)
            .ok_or_else(|| Error::ScriptError("expression did not return an object".into()))
    }

    fn evaluate_as<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
        serde_json::from_value(self.evaluate(expression)?)
            .map_err(|e| Error::ScriptError(format!("Unexpected script result: {}", e)))
    }

    fn set_transparent_background(&self, transparent: bool) -> Result<()> {
        let params = if transparent {
            json!({ "color": { "r": 0, "g": 0, "b": 0, "a": 0 } })
        } else {
            json!({})
        };
        let method: Emulation::SetDefaultBackgroundColorOverride = command(params)?;
        self.tab.call_method(method)?;
        Ok(())
    }
}

impl PageSession for CdpSession {
    fn evaluate(&self, expression: &str) -> Result<Value> {
        Ok(self.runtime_evaluate(expression, true)?.value.unwrap_or(Value::Null))
    }

    fn set_viewport(&self, viewport: &Viewport) -> Result<()> {
        let method: Emulation::SetDeviceMetricsOverride = command(json!({
            "width": viewport.width,
            "height": viewport.height,
            "deviceScaleFactor": viewport.device_scale_factor,
            "mobile": false,
        }))?;
        self.tab.call_method(method)?;
        Ok(())
    }

    fn scroll_metrics(&self) -> Result<ScrollMetrics> {
        self.evaluate_as(SCROLL_METRICS)
    }

    fn scroll_to(&self, y: f64) -> Result<()> {
        self.evaluate(&format!(
            "(function(){{ window.scrollTo({{ top: {}, left: 0, behavior: 'instant' }}); return window.scrollY; }})()",
            y
        ))?;
        Ok(())
    }

    fn wait_for_assets(&self, timeout: Duration) -> Result<bool> {
        let script = WAIT_FOR_ASSETS.replace("{{TIMEOUT_MS}}", &timeout.as_millis().to_string());
        Ok(crate::session::is_truthy(&self.evaluate(&script)?))
    }

    fn next_frame(&self) -> Result<()> {
        self.evaluate(NEXT_FRAME)?;
        Ok(())
    }

    fn query_selector_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        let array = self.evaluate_handle(&format!(
            "Array.from(document.querySelectorAll({}))",
            js_string(selector)
        ))?;

        let method: Runtime::GetProperties = command(json!({
            "objectId": array.id(),
            "ownProperties": true,
        }))?;
        let props = self.tab.call_method(method)?;

        let mut indexed: Vec<(usize, ElementHandle)> = props
            .result
            .into_iter()
            .filter_map(|p| {
                let index = p.name.parse::<usize>().ok()?;
                let object_id = p.value?.object_id?;
                Some((index, ElementHandle::new(object_id)))
            })
            .collect();
        indexed.sort_by_key(|(i, _)| *i);
        Ok(indexed.into_iter().map(|(_, h)| h).collect())
    }

    fn has_matching_ancestor(&self, element: &ElementHandle, selector: &str) -> Result<bool> {
        let v = self.call_value(element, HAS_MATCHING_ANCESTOR, vec![arg_value(json!(selector))])?;
        Ok(v.as_bool().unwrap_or(false))
    }

    fn bounding_box(&self, element: &ElementHandle) -> Result<Option<ElementBox>> {
        let v = self.call_value(element, BOUNDING_BOX, Vec::new())?;
        if v.is_null() {
            return Ok(None);
        }
        serde_json::from_value(v)
            .map(Some)
            .map_err(|e| Error::ScriptError(format!("Unexpected bounding box: {}", e)))
    }

    fn scroll_into_view(&self, element: &ElementHandle) -> Result<()> {
        self.call_value(element, SCROLL_INTO_VIEW, Vec::new())?;
        Ok(())
    }

    fn create_stitch_container(&self, layout: &StitchLayout) -> Result<ElementHandle> {
        let script = CREATE_STITCH_CONTAINER
            .replace("{{GAP}}", &layout.gap.to_string())
            .replace("{{PADDING}}", &layout.padding.to_string())
            .replace("{{TRANSPARENT}}", if layout.transparent { "true" } else { "false" });
        self.evaluate_handle(&script)
    }

    fn wrap_into(&self, container: &ElementHandle, element: &ElementHandle) -> Result<NodeMove> {
        let placeholder = self.call_handle(element, INSERT_PLACEHOLDER, Vec::new())?;
        let wrapper = match self.call_handle(container, WRAP_INTO, vec![arg_node(element)]) {
            Ok(w) => w,
            Err(e) => {
                // Nothing moved yet; drop the lone placeholder
                if let Err(cleanup) = self.call_value(&placeholder, REMOVE_NODE, Vec::new()) {
                    warn!("Failed to remove stitch placeholder {}: {}", placeholder.id(), cleanup);
                }
                return Err(e);
            }
        };
        Ok(NodeMove {
            moved: element.clone(),
            placeholder,
            wrapper,
        })
    }

    fn unwrap(&self, node_move: &NodeMove) -> Result<()> {
        self.call_value(
            &node_move.placeholder,
            UNWRAP,
            vec![arg_node(&node_move.moved), arg_node(&node_move.wrapper)],
        )?;
        Ok(())
    }

    fn remove_node(&self, node: &ElementHandle) -> Result<()> {
        self.call_value(node, REMOVE_NODE, Vec::new())?;
        Ok(())
    }

    fn hide_outside(&self, container: &ElementHandle) -> Result<usize> {
        let v = self.call_value(container, HIDE_OUTSIDE, Vec::new())?;
        Ok(v.as_u64().unwrap_or(0) as usize)
    }

    fn show_outside(&self) -> Result<()> {
        self.evaluate(SHOW_OUTSIDE)?;
        Ok(())
    }

    fn release_handles(&self) -> Result<()> {
        let method: Runtime::ReleaseObjectGroup = command(json!({ "objectGroup": OBJECT_GROUP }))?;
        self.tab.call_method(method)?;
        Ok(())
    }

    fn cut_candidates(&self, region: &ElementBox) -> Result<Vec<f64>> {
        let script = CUT_CANDIDATES
            .replace("{{TOP}}", &region.y.to_string())
            .replace("{{HEIGHT}}", &region.height.to_string());
        self.evaluate_as(&script)
    }

    fn screenshot(&self, params: &ScreenshotParams) -> Result<Vec<u8>> {
        let mut request = json!({ "format": params.format.protocol_name() });
        if let Some(q) = params.quality {
            request["quality"] = json!(q);
        }
        if let Some(clip) = params.clip {
            request["clip"] = json!({
                "x": clip.x,
                "y": clip.y,
                "width": clip.width,
                "height": clip.height,
                "scale": 1,
            });
        }
        if let Some(beyond) = params.capture_beyond_viewport {
            request["captureBeyondViewport"] = json!(beyond);
        }
        if let Some(surface) = params.from_surface {
            request["fromSurface"] = json!(surface);
        }
        let method: Page::CaptureScreenshot = command(request)?;

        if params.omit_background {
            self.set_transparent_background(true)?;
        }
        let result = self.tab.call_method(method);
        if params.omit_background {
            if let Err(e) = self.set_transparent_background(false) {
                warn!("Failed to reset background override: {}", e);
            }
        }

        let data = result.map_err(|e| Error::CdpError(format!("Screenshot failed: {}", e)))?.data;
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| Error::CdpError(format!("Screenshot data was not base64: {}", e)))
    }
}
