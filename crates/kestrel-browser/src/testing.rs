//! Scripted in-memory implementations of the driver traits.
//!
//! Handles are cheap clones over shared state, so a test keeps a clone to
//! inspect clicks, navigations and probe counts after handing one to the
//! code under test.

use crate::driver::{
    BrowserSession, DialogLog, DomScope, ElementProbe, FrameHandle, Locator, SessionCookie,
    TabCreated, TabHandle, TabId,
};
use async_trait::async_trait;
use futures::StreamExt;
use kestrel_core::{Error, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Side effect run when a fake element is clicked
pub type ClickEffect = Arc<dyn Fn() + Send + Sync>;

/// A scripted element
#[derive(Clone)]
pub struct FakeElement {
    selector: String,
    text: String,
    visible: bool,
    hidden_for: u32,
    hidden_after: Option<u32>,
    after_navigations: u32,
    probes: Arc<AtomicU32>,
    effect: Option<ClickEffect>,
}

impl FakeElement {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text: String::new(),
            visible: true,
            hidden_for: 0,
            hidden_after: None,
            after_navigations: 0,
            probes: Arc::new(AtomicU32::new(0)),
            effect: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Present but never rendered
    pub fn invisible(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Not rendered for the first `probes` probes
    pub fn hidden_for_probes(mut self, probes: u32) -> Self {
        self.hidden_for = probes;
        self
    }

    /// Rendered for the first `probes` probes, hidden afterwards
    pub fn hidden_after_probes(mut self, probes: u32) -> Self {
        self.hidden_after = Some(probes);
        self
    }

    /// Only exists once the owning tab has navigated `count` times
    pub fn after_navigations(mut self, count: u32) -> Self {
        self.after_navigations = count;
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    fn matches(&self, selector: &str) -> bool {
        self.selector == selector
    }

    fn probe(&self) -> ElementProbe {
        let seen = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        let rendered = self.visible
            && seen > self.hidden_for
            && self.hidden_after.is_none_or(|limit| seen <= limit);
        ElementProbe {
            present: true,
            visible: rendered,
        }
    }
}

/// Elements, clicks and script results of one document
#[derive(Default)]
struct FakeDocument {
    elements: Mutex<Vec<FakeElement>>,
    clicks: Mutex<Vec<String>>,
    evals: Mutex<Vec<(String, Value)>>,
    evaluated: Mutex<Vec<String>>,
}

impl FakeDocument {
    fn active(&self, navigations: u32) -> Vec<FakeElement> {
        lock(&self.elements)
            .iter()
            .filter(|e| e.after_navigations <= navigations)
            .cloned()
            .collect()
    }

    fn locate(&self, locator: &Locator, navigations: u32) -> Option<FakeElement> {
        let mut candidates = self.active(navigations).into_iter();
        match locator {
            Locator::Css(selector) => candidates.find(|e| e.matches(selector)),
            Locator::Text { container, labels } => candidates.find(|e| {
                e.matches(container) && labels.iter().any(|l| e.text.contains(l.as_str()))
            }),
            Locator::ExactText { container, text } => {
                candidates.find(|e| e.matches(container) && e.text.trim() == text)
            }
            Locator::Nth { container, index } => {
                candidates.filter(|e| e.matches(container)).nth(*index)
            }
        }
    }

    fn probe(&self, locator: &Locator, navigations: u32) -> ElementProbe {
        self.locate(locator, navigations)
            .map(|e| e.probe())
            .unwrap_or_default()
    }

    fn click(&self, locator: &Locator, navigations: u32) -> bool {
        let Some(element) = self.locate(locator, navigations) else {
            return false;
        };
        lock(&self.clicks).push(locator.to_string());
        if let Some(effect) = &element.effect {
            effect();
        }
        true
    }

    fn texts(&self, selector: &str, navigations: u32) -> Vec<String> {
        self.active(navigations)
            .iter()
            .filter(|e| e.matches(selector))
            .map(|e| e.text.trim().to_string())
            .collect()
    }

    fn evaluate(&self, expression: &str) -> Value {
        lock(&self.evaluated).push(expression.to_string());
        lock(&self.evals)
            .iter()
            .find(|(needle, _)| expression.contains(needle.as_str()))
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null)
    }

    fn content(&self, navigations: u32) -> String {
        let body: String = self
            .active(navigations)
            .iter()
            .map(|e| format!("<div data-selector=\"{}\">{}</div>", e.selector, e.text))
            .collect();
        format!("<html><body>{}</body></html>", body)
    }
}

struct FrameState {
    name: String,
    url: String,
    detached: AtomicBool,
    loading_for: u32,
    script_fails: bool,
    probe_fails_for: u32,
    appears_after: u32,
    ready_probes: AtomicU32,
    element_probes: AtomicU32,
    navigations: Mutex<Arc<AtomicU32>>,
    document: FakeDocument,
}

/// A scripted frame
#[derive(Clone)]
pub struct FakeFrame {
    state: Arc<FrameState>,
}

impl FakeFrame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(FrameState {
                name: name.into(),
                url: "about:blank".to_string(),
                detached: AtomicBool::new(false),
                loading_for: 0,
                script_fails: false,
                probe_fails_for: 0,
                appears_after: 0,
                ready_probes: AtomicU32::new(0),
                element_probes: AtomicU32::new(0),
                navigations: Mutex::new(Arc::new(AtomicU32::new(0))),
                document: FakeDocument::default(),
            }),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut FrameState)) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            f(state);
        }
        self
    }

    pub fn with_url(self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.configure(|s| s.url = url)
    }

    /// `document.readyState` is "loading" for the first `probes` checks
    pub fn loading_for(self, probes: u32) -> Self {
        self.configure(|s| s.loading_for = probes)
    }

    /// Every readiness script fails
    pub fn script_fails(self) -> Self {
        self.configure(|s| s.script_fails = true)
    }

    /// The first `probes` element probes fail
    pub fn probe_fails_for(self, probes: u32) -> Self {
        self.configure(|s| s.probe_fails_for = probes)
    }

    pub fn detached(self) -> Self {
        self.state.detached.store(true, Ordering::SeqCst);
        self
    }

    /// Missing from the frame tree for the tab's first `lookups` lookups
    pub fn appears_after_lookups(self, lookups: u32) -> Self {
        self.configure(|s| s.appears_after = lookups)
    }

    pub fn add_element(&self, element: FakeElement) {
        lock(&self.state.document.elements).push(element);
    }

    /// Answer any evaluated expression containing `needle` with `value`
    pub fn with_eval(self, needle: impl Into<String>, value: Value) -> Self {
        lock(&self.state.document.evals).push((needle.into(), value));
        self
    }

    pub fn clicks(&self) -> Vec<String> {
        lock(&self.state.document.clicks).clone()
    }

    pub fn ready_probes(&self) -> u32 {
        self.state.ready_probes.load(Ordering::SeqCst)
    }

    fn navigations(&self) -> u32 {
        lock(&self.state.navigations).load(Ordering::SeqCst)
    }

    fn adopt(&self, navigations: Arc<AtomicU32>) {
        *lock(&self.state.navigations) = navigations;
    }
}

#[async_trait]
impl DomScope for FakeFrame {
    fn label(&self) -> String {
        format!("frame \"{}\"", self.state.name)
    }

    async fn probe(&self, locator: &Locator) -> Result<ElementProbe> {
        let seen = self.state.element_probes.fetch_add(1, Ordering::SeqCst) + 1;
        if seen <= self.state.probe_fails_for {
            return Err(Error::Driver("Execution context was destroyed".to_string()));
        }
        Ok(self.state.document.probe(locator, self.navigations()))
    }

    async fn click(&self, locator: &Locator) -> Result<bool> {
        Ok(self.state.document.click(locator, self.navigations()))
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        Ok(self.state.document.texts(selector, self.navigations()))
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        Ok(self.state.document.evaluate(expression))
    }

    async fn content(&self) -> Result<String> {
        Ok(self.state.document.content(self.navigations()))
    }
}

#[async_trait]
impl FrameHandle for FakeFrame {
    fn name(&self) -> &str {
        &self.state.name
    }

    async fn url(&self) -> Result<String> {
        Ok(self.state.url.clone())
    }

    async fn is_detached(&self) -> bool {
        self.state.detached.load(Ordering::SeqCst)
    }

    async fn ready_state(&self) -> Result<String> {
        let seen = self.state.ready_probes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state.script_fails {
            return Err(Error::Driver("Cannot find context with specified id".to_string()));
        }
        if seen <= self.state.loading_for {
            Ok("loading".to_string())
        } else {
            Ok("complete".to_string())
        }
    }
}

struct TabState {
    id: TabId,
    url: Mutex<String>,
    title: Mutex<String>,
    cookies: Mutex<Vec<SessionCookie>>,
    unresponsive: AtomicBool,
    navigations: Arc<AtomicU32>,
    frames: Mutex<Vec<FakeFrame>>,
    frame_lookups: AtomicU32,
    gotos: Mutex<Vec<String>>,
    typed: Mutex<Vec<(String, String)>>,
    front: AtomicBool,
    dialogs: Mutex<Option<DialogLog>>,
    document: FakeDocument,
}

/// A scripted tab
#[derive(Clone)]
pub struct FakeTab {
    state: Arc<TabState>,
}

impl FakeTab {
    pub fn new(id: impl Into<TabId>, url: impl Into<String>) -> Self {
        Self {
            state: Arc::new(TabState {
                id: id.into(),
                url: Mutex::new(url.into()),
                title: Mutex::new(String::new()),
                cookies: Mutex::new(Vec::new()),
                unresponsive: AtomicBool::new(false),
                navigations: Arc::new(AtomicU32::new(0)),
                frames: Mutex::new(Vec::new()),
                frame_lookups: AtomicU32::new(0),
                gotos: Mutex::new(Vec::new()),
                typed: Mutex::new(Vec::new()),
                front: AtomicBool::new(false),
                dialogs: Mutex::new(None),
                document: FakeDocument::default(),
            }),
        }
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        *lock(&self.state.title) = title.into();
        self
    }

    pub fn with_cookie(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        lock(&self.state.cookies).push(SessionCookie {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Every script and property read fails
    pub fn unresponsive(self) -> Self {
        self.state.unresponsive.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_eval(self, needle: impl Into<String>, value: Value) -> Self {
        lock(&self.state.document.evals).push((needle.into(), value));
        self
    }

    pub fn add_element(&self, element: FakeElement) {
        lock(&self.state.document.elements).push(element);
    }

    /// Attach a frame; its elements follow this tab's navigation count
    pub fn add_frame(&self, frame: FakeFrame) {
        frame.adopt(self.state.navigations.clone());
        lock(&self.state.frames).push(frame);
    }

    /// Effect that raises a native dialog on this tab
    pub fn dialog_on_click(&self, message: impl Into<String>) -> ClickEffect {
        let tab = self.clone();
        let message = message.into();
        Arc::new(move || {
            tab.raise_dialog(message.clone());
        })
    }

    /// Deliver a dialog; true when a handler accepted it
    pub fn raise_dialog(&self, message: impl Into<String>) -> bool {
        match lock(&self.state.dialogs).as_ref() {
            Some(log) => {
                log.push(message);
                true
            }
            None => false,
        }
    }

    pub fn navigations(&self) -> u32 {
        self.state.navigations.load(Ordering::SeqCst)
    }

    pub fn frame_lookups(&self) -> u32 {
        self.state.frame_lookups.load(Ordering::SeqCst)
    }

    pub fn gotos(&self) -> Vec<String> {
        lock(&self.state.gotos).clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        lock(&self.state.typed).clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        lock(&self.state.document.clicks).clone()
    }

    pub fn evaluated(&self) -> Vec<String> {
        lock(&self.state.document.evaluated).clone()
    }

    pub fn is_in_front(&self) -> bool {
        self.state.front.load(Ordering::SeqCst)
    }

    pub fn accepts_dialogs(&self) -> bool {
        lock(&self.state.dialogs).is_some()
    }

    fn check_responsive(&self) -> Result<()> {
        if self.state.unresponsive.load(Ordering::SeqCst) {
            return Err(Error::Driver(format!("Target {} closed", self.state.id)));
        }
        Ok(())
    }

    fn navigated(&self) {
        self.state.navigations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DomScope for FakeTab {
    fn label(&self) -> String {
        format!("tab {}", self.state.id)
    }

    async fn probe(&self, locator: &Locator) -> Result<ElementProbe> {
        self.check_responsive()?;
        Ok(self.state.document.probe(locator, self.navigations()))
    }

    async fn click(&self, locator: &Locator) -> Result<bool> {
        self.check_responsive()?;
        Ok(self.state.document.click(locator, self.navigations()))
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        self.check_responsive()?;
        Ok(self.state.document.texts(selector, self.navigations()))
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.check_responsive()?;
        Ok(self.state.document.evaluate(expression))
    }

    async fn content(&self) -> Result<String> {
        self.check_responsive()?;
        Ok(self.state.document.content(self.navigations()))
    }
}

#[async_trait]
impl TabHandle for FakeTab {
    fn id(&self) -> &str {
        &self.state.id
    }

    async fn url(&self) -> Result<String> {
        self.check_responsive()?;
        Ok(lock(&self.state.url).clone())
    }

    async fn title(&self) -> Result<String> {
        self.check_responsive()?;
        Ok(lock(&self.state.title).clone())
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>> {
        self.check_responsive()?;
        Ok(lock(&self.state.cookies).clone())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.check_responsive()?;
        *lock(&self.state.url) = url.to_string();
        lock(&self.state.gotos).push(url.to_string());
        self.navigated();
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        self.check_responsive()?;
        if !self.state.document.probe(&Locator::css(selector), self.navigations()).present {
            return Err(Error::ElementNotFound {
                target: selector.to_string(),
                attempts: vec!["type".to_string()],
            });
        }
        lock(&self.state.typed).push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn click_and_wait_for_navigation(&self, selector: &str) -> Result<()> {
        self.check_responsive()?;
        if !self.state.document.click(&Locator::css(selector), self.navigations()) {
            return Err(Error::ElementNotFound {
                target: selector.to_string(),
                attempts: vec!["click".to_string()],
            });
        }
        self.navigated();
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<()> {
        self.check_responsive()?;
        self.state.front.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn frame(&self, name: &str) -> Result<Option<Arc<dyn FrameHandle>>> {
        self.check_responsive()?;
        let seen = self.state.frame_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.state.frames)
            .iter()
            .find(|f| f.name() == name && seen >= f.state.appears_after)
            .map(|f| Arc::new(f.clone()) as Arc<dyn FrameHandle>))
    }

    async fn frames(&self) -> Result<Vec<Arc<dyn FrameHandle>>> {
        self.check_responsive()?;
        Ok(lock(&self.state.frames)
            .iter()
            .map(|f| Arc::new(f.clone()) as Arc<dyn FrameHandle>)
            .collect())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.check_responsive()?;
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    async fn auto_accept_dialogs(&self, log: DialogLog) -> Result<()> {
        self.check_responsive()?;
        *lock(&self.state.dialogs) = Some(log);
        Ok(())
    }
}

struct SessionState {
    started: Instant,
    tabs: Mutex<Vec<(Duration, FakeTab)>>,
    events: Mutex<Vec<(Duration, TabId)>>,
    live: Arc<AtomicUsize>,
    opened: AtomicUsize,
    closed: AtomicBool,
}

impl SessionState {
    fn register(&self, tab: FakeTab, at: Duration) {
        lock(&self.tabs).push((at, tab));
    }
}

/// Decrements the live subscription count when the stream is dropped
struct SubscriptionGuard(Arc<AtomicUsize>);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A scripted browser session
#[derive(Clone)]
pub struct FakeSession {
    state: Arc<SessionState>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SessionState {
                started: Instant::now(),
                tabs: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
                live: Arc::new(AtomicUsize::new(0)),
                opened: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn add_tab(&self, tab: FakeTab) {
        self.state.register(tab, Duration::ZERO);
    }

    /// Tab listed only once `at` has passed since the session started
    pub fn add_tab_at(&self, tab: FakeTab, at: Duration) {
        self.state.register(tab, at);
    }

    /// Announce creation of `id` to subscriptions live at `at`
    pub fn emit_tab_created_at(&self, id: impl Into<TabId>, at: Duration) {
        lock(&self.state.events).push((at, id.into()));
    }

    /// Effect that opens `tab` and announces it, as a link with a target would
    pub fn open_on_click(&self, tab: FakeTab) -> ClickEffect {
        let state = self.state.clone();
        Arc::new(move || {
            let now = state.started.elapsed();
            lock(&state.events).push((now, tab.id().to_string()));
            state.register(tab.clone(), now);
        })
    }

    pub fn live_subscriptions(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn subscriptions_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl Default for FakeSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn tabs(&self) -> Result<Vec<Arc<dyn TabHandle>>> {
        let now = self.state.started.elapsed();
        Ok(lock(&self.state.tabs)
            .iter()
            .filter(|(at, _)| *at <= now)
            .map(|(_, tab)| Arc::new(tab.clone()) as Arc<dyn TabHandle>)
            .collect())
    }

    async fn subscribe_tab_created(&self) -> Result<TabCreated> {
        let started = self.state.started;
        let now = started.elapsed();

        let mut pending: Vec<(Duration, TabId)> = lock(&self.state.events)
            .iter()
            .filter(|(at, _)| *at >= now)
            .cloned()
            .collect();
        pending.sort_by_key(|(at, _)| *at);

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        self.state.live.fetch_add(1, Ordering::SeqCst);
        let guard = SubscriptionGuard(self.state.live.clone());

        let events = futures::stream::iter(pending)
            .then(move |(at, id)| async move {
                tokio::time::sleep_until(started + at).await;
                id
            })
            .map(move |id| {
                let _held = &guard;
                id
            })
            .boxed();

        Ok(TabCreated::new(events))
    }

    async fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elements_gated_by_navigation() {
        let tab = FakeTab::new("T1", "about:blank");
        let frame = FakeFrame::new("menu");
        frame.add_element(FakeElement::new("#submenu_06").after_navigations(1));
        tab.add_frame(frame.clone());

        let selector = Locator::css("#submenu_06");
        assert!(!frame.probe(&selector).await.unwrap().present);

        tab.goto("https://erp.example/").await.unwrap();

        assert!(frame.probe(&selector).await.unwrap().present);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_dropped_releases_count() {
        let session = FakeSession::new();
        let sub = session.subscribe_tab_created().await.unwrap();
        assert_eq!(session.live_subscriptions(), 1);

        drop(sub);

        assert_eq!(session.live_subscriptions(), 0);
        assert_eq!(session.subscriptions_opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_marks_session_closed() {
        let session = FakeSession::new();
        assert!(!session.is_closed());

        session.close().await.unwrap();

        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_on_click_registers_tab_and_event() {
        let session = FakeSession::new();
        let tab = FakeTab::new("T1", "about:blank");
        tab.add_element(
            FakeElement::new("#BotonIrBuzon")
                .on_click(session.open_on_click(FakeTab::new("T2", "https://erp.example/buzon"))),
        );
        session.add_tab(tab.clone());

        let mut sub = session.subscribe_tab_created().await.unwrap();
        assert!(tab.click(&Locator::css("#BotonIrBuzon")).await.unwrap());

        let ids: Vec<String> = session
            .tabs()
            .await
            .unwrap()
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        assert_eq!(ids, vec!["T1".to_string(), "T2".to_string()]);

        // Existing subscriptions only see events scheduled when they started
        let late = tokio::time::timeout(Duration::from_millis(10), sub.next()).await;
        assert!(matches!(late, Err(_) | Ok(None)));

        let mut fresh = session.subscribe_tab_created().await.unwrap();
        assert_eq!(fresh.next().await, Some("T2".to_string()));
    }
}
