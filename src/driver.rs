//! Browsing-driver seam
//!
//! The workflow stages are written against the [`Page`] trait so they can be
//! exercised by a scripted fake in tests. [`ChromeSession`] is the production
//! implementation: headless Chromium over the DevTools protocol, with the
//! optional proxy's credentials answered through the Fetch auth-challenge
//! flow (Chromium's `--proxy-server` switch does not carry credentials).

use std::time::Duration;

use chromiumoxide::browser::HeadlessMode;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{GetLayoutMetricsParams, ReloadParams};
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ProxyDescriptor;

const NAV_TIMEOUT: Duration = Duration::from_secs(25);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("failed to navigate to {url}: {details}")]
    Navigate { url: String, details: String },
    #[error("driver call timed out: {0}")]
    Timeout(&'static str),
    #[error("script evaluation failed: {0}")]
    Eval(String),
    #[error("driver internal error: {0}")]
    Internal(String),
}

/// Viewport-relative box of a rendered element.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Navigation, DOM-query, and interaction primitives the workflow needs.
///
/// Every method is awaited strictly in sequence by the caller; no two stages
/// ever act concurrently on the same page.
#[allow(async_fn_in_trait)]
pub trait Page {
    async fn goto(&self, url: &str) -> Result<(), DriverError>;
    async fn reload(&self) -> Result<(), DriverError>;
    async fn current_url(&self) -> Result<String, DriverError>;
    /// Full visible text of the document body.
    async fn body_text(&self) -> Result<String, DriverError>;
    /// Text content of the first match, `None` when the selector matches nothing.
    async fn text(&self, selector: &str) -> Result<Option<String>, DriverError>;
    async fn inner_html(&self, selector: &str) -> Result<Option<String>, DriverError>;
    async fn attribute(&self, selector: &str, name: &str)
        -> Result<Option<String>, DriverError>;
    async fn is_visible(&self, selector: &str) -> Result<bool, DriverError>;
    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError>;
    async fn click(&self, selector: &str) -> Result<(), DriverError>;
    async fn bounds(&self, selector: &str) -> Result<Option<Bounds>, DriverError>;
    async fn scroll_by(&self, delta_y: f64) -> Result<(), DriverError>;
    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), DriverError>;
    /// Pointer press at the given position held for `hold` before release.
    async fn mouse_press(&self, x: f64, y: f64, hold: Duration) -> Result<(), DriverError>;
    /// Evaluate a script in the page, returning its JSON value.
    async fn eval(&self, script: &str) -> Result<Value, DriverError>;
}

/// An authenticated browsing context plus its teardown.
#[allow(async_fn_in_trait)]
pub trait Session {
    type Page: Page;
    fn page(&self) -> &Self::Page;
    async fn close(self) -> Result<(), DriverError>;
}

// ============================================================================
// Chromium implementation
// ============================================================================

pub struct ChromePage {
    page: chromiumoxide::Page,
}

pub struct ChromeSession {
    browser: Browser,
    page: ChromePage,
    tasks: Vec<JoinHandle<()>>,
}

fn internal(err: impl std::fmt::Display) -> DriverError {
    DriverError::Internal(err.to_string())
}

/// Embed a Rust string into a script as a JSON literal.
fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

impl ChromeSession {
    /// Launch headless Chromium, spawn the CDP event loop, and open a blank
    /// page. When the proxy carries credentials, the Fetch domain is enabled
    /// so auth challenges are answered with them.
    pub async fn launch(
        proxy: Option<&ProxyDescriptor>,
        no_sandbox: bool,
    ) -> Result<Self, DriverError> {
        let mut builder = BrowserConfig::builder()
            .headless_mode(HeadlessMode::New)
            .window_size(1366, 900);
        if no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(p) = proxy {
            builder = builder.arg(p.server_arg());
        }
        let config = builder.build().map_err(DriverError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        let mut tasks = vec![tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        })];

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        if let Some(p) = proxy.filter(|p| p.has_credentials()) {
            tasks.extend(answer_auth_challenges(&page, p).await?);
        }

        debug!("browser session ready");
        Ok(Self {
            browser,
            page: ChromePage { page },
            tasks,
        })
    }
}

impl Session for ChromeSession {
    type Page = ChromePage;

    fn page(&self) -> &ChromePage {
        &self.page
    }

    async fn close(mut self) -> Result<(), DriverError> {
        let result = self.browser.close().await.map(|_| ()).map_err(internal);
        let _ = self.browser.wait().await;
        for task in &self.tasks {
            task.abort();
        }
        result
    }
}

/// With `Fetch.enable(handleAuthRequests)` every request pauses until it is
/// resumed, and proxy auth challenges surface as events; both streams must be
/// serviced for the lifetime of the session.
async fn answer_auth_challenges(
    page: &chromiumoxide::Page,
    proxy: &ProxyDescriptor,
) -> Result<Vec<JoinHandle<()>>, DriverError> {
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(internal)?;
    let mut challenges = page
        .event_listener::<EventAuthRequired>()
        .await
        .map_err(internal)?;
    let enable = fetch::EnableParams {
        handle_auth_requests: Some(true),
        ..Default::default()
    };
    page.execute(enable).await.map_err(internal)?;

    let resume_page = page.clone();
    let resume = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let _ = resume_page
                .execute(ContinueRequestParams::new(event.request_id.clone()))
                .await;
        }
    });

    let username = proxy.username.clone().unwrap_or_default();
    let password = proxy.password.clone().unwrap_or_default();
    let answer_page = page.clone();
    let answer = tokio::spawn(async move {
        while let Some(event) = challenges.next().await {
            let response = match AuthChallengeResponse::builder()
                .response(AuthChallengeResponseResponse::ProvideCredentials)
                .username(username.clone())
                .password(password.clone())
                .build()
            {
                Ok(r) => r,
                Err(err) => {
                    warn!(%err, "could not build auth challenge response");
                    continue;
                }
            };
            match ContinueWithAuthParams::builder()
                .request_id(event.request_id.clone())
                .auth_challenge_response(response)
                .build()
            {
                Ok(params) => {
                    let _ = answer_page.execute(params).await;
                }
                Err(err) => warn!(%err, "could not continue auth challenge"),
            }
        }
    });

    Ok(vec![resume, answer])
}

impl ChromePage {
    async fn eval_value(&self, script: String) -> Result<Value, DriverError> {
        let result = timeout(CALL_TIMEOUT, self.page.evaluate(script))
            .await
            .map_err(|_| DriverError::Timeout("evaluate"))?
            .map_err(|e| DriverError::Eval(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn dispatch_mouse(&self, params: DispatchMouseEventParams) -> Result<(), DriverError> {
        self.page.execute(params).await.map_err(internal)?;
        Ok(())
    }
}

impl Page for ChromePage {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        timeout(NAV_TIMEOUT, async {
            self.page
                .goto(url)
                .await
                .map_err(|e| DriverError::Navigate {
                    url: url.to_string(),
                    details: e.to_string(),
                })?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| DriverError::Navigate {
                    url: url.to_string(),
                    details: e.to_string(),
                })?;
            Ok(())
        })
        .await
        .map_err(|_| DriverError::Timeout("navigation"))?
    }

    async fn reload(&self) -> Result<(), DriverError> {
        timeout(NAV_TIMEOUT, async {
            self.page
                .execute(ReloadParams::default())
                .await
                .map_err(internal)?;
            self.page.wait_for_navigation().await.map_err(internal)?;
            Ok(())
        })
        .await
        .map_err(|_| DriverError::Timeout("reload"))?
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let url = self.page.url().await.map_err(internal)?;
        Ok(url.unwrap_or_default())
    }

    async fn body_text(&self) -> Result<String, DriverError> {
        let value = self
            .eval_value("document.body ? document.body.innerText : ''".to_string())
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); return el ? el.textContent : null; }})()",
            sel = js_string(selector)
        );
        let value = self.eval_value(script).await?;
        Ok(value.as_str().map(|s| s.to_string()))
    }

    async fn inner_html(&self, selector: &str) -> Result<Option<String>, DriverError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); return el ? el.innerHTML : null; }})()",
            sel = js_string(selector)
        );
        let value = self.eval_value(script).await?;
        Ok(value.as_str().map(|s| s.to_string()))
    }

    async fn attribute(
        &self,
        selector: &str,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); return el ? el.getAttribute({attr}) : null; }})()",
            sel = js_string(selector),
            attr = js_string(name)
        );
        let value = self.eval_value(script).await?;
        Ok(value.as_str().map(|s| s.to_string()))
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, DriverError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             const r = el.getBoundingClientRect(); \
             return r.width > 0 && r.height > 0 && el.offsetParent !== null; }})()",
            sel = js_string(selector)
        );
        let value = self.eval_value(script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        let element = timeout(CALL_TIMEOUT, self.page.find_element(selector))
            .await
            .map_err(|_| DriverError::Timeout("find element"))?
            .map_err(|e| DriverError::Internal(format!("element '{}' not found: {}", selector, e)))?;
        element.click().await.map_err(internal)?;
        element.type_str(value).await.map_err(internal)?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let element = timeout(CALL_TIMEOUT, self.page.find_element(selector))
            .await
            .map_err(|_| DriverError::Timeout("find element"))?
            .map_err(|e| DriverError::Internal(format!("element '{}' not found: {}", selector, e)))?;
        element.click().await.map_err(internal)?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    async fn bounds(&self, selector: &str) -> Result<Option<Bounds>, DriverError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return null; \
             const r = el.getBoundingClientRect(); \
             return {{ x: r.x, y: r.y, width: r.width, height: r.height }}; }})()",
            sel = js_string(selector)
        );
        let value = self.eval_value(script).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| DriverError::Eval(format!("bad bounding box: {}", e)))
    }

    async fn scroll_by(&self, delta_y: f64) -> Result<(), DriverError> {
        let metrics = self
            .page
            .execute(GetLayoutMetricsParams::default())
            .await
            .map_err(internal)?;
        let viewport = &metrics.css_layout_viewport;
        let cx = viewport.client_width as f64 / 2.0;
        let cy = viewport.client_height as f64 / 2.0;

        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(cx)
            .y(cy)
            .delta_x(0.0)
            .delta_y(delta_y)
            .build()
            .map_err(DriverError::Internal)?;
        self.dispatch_mouse(params).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), DriverError> {
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .build()
            .map_err(DriverError::Internal)?;
        self.dispatch_mouse(params).await
    }

    async fn mouse_press(&self, x: f64, y: f64, hold: Duration) -> Result<(), DriverError> {
        let down = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .button(MouseButton::Left)
            .x(x)
            .y(y)
            .click_count(1)
            .build()
            .map_err(DriverError::Internal)?;
        self.dispatch_mouse(down).await?;

        tokio::time::sleep(hold).await;

        let up = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .button(MouseButton::Left)
            .x(x)
            .y(y)
            .click_count(1)
            .build()
            .map_err(DriverError::Internal)?;
        self.dispatch_mouse(up).await
    }

    async fn eval(&self, script: &str) -> Result<Value, DriverError> {
        self.eval_value(script.to_string()).await
    }
}

// ============================================================================
// Scripted test double
// ============================================================================

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Everything the workflow did to the page, in order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Action {
        Goto(String),
        Reload,
        Click(String),
        Fill(String),
        Scroll,
        MouseMove,
        MousePress,
        Eval(String),
    }

    #[derive(Default)]
    struct Inner {
        url: String,
        routes: HashMap<String, String>,
        fail_goto: HashSet<String>,
        texts: HashMap<String, VecDeque<String>>,
        html: HashMap<String, String>,
        attrs: HashMap<(String, String), String>,
        visible: HashSet<String>,
        bounds: HashMap<String, Bounds>,
        body: String,
        detail_href: Option<String>,
        fail_inner_html: bool,
        fail_attributes: bool,
        panic_clicks: HashSet<String>,
        actions: Vec<Action>,
    }

    /// Scripted [`Page`] double: selector-keyed responses configured up
    /// front, every interaction recorded.
    #[derive(Default)]
    pub struct FakePage {
        inner: Mutex<Inner>,
    }

    impl FakePage {
        pub fn new() -> Self {
            Self::default()
        }

        /// Map a `goto` target to the URL the page ends up on.
        pub fn route(&self, target: &str, lands_on: &str) {
            let mut inner = self.inner.lock().unwrap();
            inner.routes.insert(target.to_string(), lands_on.to_string());
        }

        pub fn fail_goto(&self, target: &str) {
            self.inner.lock().unwrap().fail_goto.insert(target.to_string());
        }

        /// Queue a text response for a selector; the last one sticks.
        pub fn push_text(&self, selector: &str, text: &str) {
            let mut inner = self.inner.lock().unwrap();
            inner
                .texts
                .entry(selector.to_string())
                .or_default()
                .push_back(text.to_string());
        }

        pub fn set_html(&self, selector: &str, html: &str) {
            self.inner
                .lock()
                .unwrap()
                .html
                .insert(selector.to_string(), html.to_string());
        }

        pub fn set_attr(&self, selector: &str, name: &str, value: &str) {
            self.inner
                .lock()
                .unwrap()
                .attrs
                .insert((selector.to_string(), name.to_string()), value.to_string());
        }

        pub fn set_visible(&self, selector: &str) {
            self.inner.lock().unwrap().visible.insert(selector.to_string());
        }

        pub fn set_bounds(&self, selector: &str, bounds: Bounds) {
            self.inner.lock().unwrap().bounds.insert(selector.to_string(), bounds);
        }

        pub fn set_body(&self, text: &str) {
            self.inner.lock().unwrap().body = text.to_string();
        }

        pub fn set_detail_href(&self, href: &str) {
            self.inner.lock().unwrap().detail_href = Some(href.to_string());
        }

        /// Make `inner_html` fail, simulating a detached renderer mid-run.
        pub fn break_inner_html(&self) {
            self.inner.lock().unwrap().fail_inner_html = true;
        }

        /// Make every attribute read fail.
        pub fn break_attributes(&self) {
            self.inner.lock().unwrap().fail_attributes = true;
        }

        /// Panic when the given selector is clicked.
        pub fn panic_on_click(&self, selector: &str) {
            self.inner
                .lock()
                .unwrap()
                .panic_clicks
                .insert(selector.to_string());
        }

        pub fn actions(&self) -> Vec<Action> {
            self.inner.lock().unwrap().actions.clone()
        }

        fn record(&self, action: Action) {
            self.inner.lock().unwrap().actions.push(action);
        }
    }

    impl Page for FakePage {
        async fn goto(&self, url: &str) -> Result<(), DriverError> {
            self.record(Action::Goto(url.to_string()));
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_goto.contains(url) {
                return Err(DriverError::Navigate {
                    url: url.to_string(),
                    details: "scripted failure".to_string(),
                });
            }
            inner.url = inner.routes.get(url).cloned().unwrap_or_else(|| url.to_string());
            Ok(())
        }

        async fn reload(&self) -> Result<(), DriverError> {
            self.record(Action::Reload);
            Ok(())
        }

        async fn current_url(&self) -> Result<String, DriverError> {
            Ok(self.inner.lock().unwrap().url.clone())
        }

        async fn body_text(&self) -> Result<String, DriverError> {
            Ok(self.inner.lock().unwrap().body.clone())
        }

        async fn text(&self, selector: &str) -> Result<Option<String>, DriverError> {
            let mut inner = self.inner.lock().unwrap();
            match inner.texts.get_mut(selector) {
                Some(queue) if queue.len() > 1 => Ok(queue.pop_front()),
                Some(queue) => Ok(queue.front().cloned()),
                None => Ok(None),
            }
        }

        async fn inner_html(&self, selector: &str) -> Result<Option<String>, DriverError> {
            let inner = self.inner.lock().unwrap();
            if inner.fail_inner_html {
                return Err(DriverError::Internal("renderer detached".to_string()));
            }
            Ok(inner.html.get(selector).cloned())
        }

        async fn attribute(
            &self,
            selector: &str,
            name: &str,
        ) -> Result<Option<String>, DriverError> {
            let inner = self.inner.lock().unwrap();
            if inner.fail_attributes {
                return Err(DriverError::Internal("attribute read failed".to_string()));
            }
            Ok(inner
                .attrs
                .get(&(selector.to_string(), name.to_string()))
                .cloned())
        }

        async fn is_visible(&self, selector: &str) -> Result<bool, DriverError> {
            Ok(self.inner.lock().unwrap().visible.contains(selector))
        }

        async fn fill(&self, selector: &str, _value: &str) -> Result<(), DriverError> {
            self.record(Action::Fill(selector.to_string()));
            Ok(())
        }

        async fn click(&self, selector: &str) -> Result<(), DriverError> {
            // The lock is released before panicking so that later calls do
            // not see a poisoned mutex.
            let scripted_panic = {
                let mut inner = self.inner.lock().unwrap();
                inner.actions.push(Action::Click(selector.to_string()));
                inner.panic_clicks.contains(selector)
            };
            if scripted_panic {
                panic!("scripted panic on click of {}", selector);
            }
            Ok(())
        }

        async fn bounds(&self, selector: &str) -> Result<Option<Bounds>, DriverError> {
            Ok(self.inner.lock().unwrap().bounds.get(selector).copied())
        }

        async fn scroll_by(&self, _delta_y: f64) -> Result<(), DriverError> {
            self.record(Action::Scroll);
            Ok(())
        }

        async fn mouse_move(&self, _x: f64, _y: f64) -> Result<(), DriverError> {
            self.record(Action::MouseMove);
            Ok(())
        }

        async fn mouse_press(
            &self,
            _x: f64,
            _y: f64,
            _hold: Duration,
        ) -> Result<(), DriverError> {
            self.record(Action::MousePress);
            Ok(())
        }

        async fn eval(&self, script: &str) -> Result<Value, DriverError> {
            self.record(Action::Eval(script.to_string()));
            let inner = self.inner.lock().unwrap();
            if script.contains("View Details") {
                return Ok(inner
                    .detail_href
                    .as_ref()
                    .map(|h| Value::String(h.clone()))
                    .unwrap_or(Value::Null));
            }
            Ok(Value::Bool(true))
        }
    }

    /// [`Session`] double with a shared close counter.
    pub struct FakeSession {
        pub page: Arc<FakePage>,
        pub closes: Arc<AtomicUsize>,
    }

    impl FakeSession {
        pub fn new(page: Arc<FakePage>) -> Self {
            Self {
                page,
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Session for FakeSession {
        type Page = FakePage;

        fn page(&self) -> &FakePage {
            self.page.as_ref()
        }

        async fn close(self) -> Result<(), DriverError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
