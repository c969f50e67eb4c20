//! Driver abstraction over a browser session.
//!
//! The resilience layer (frame resolution, selector actions, tab discovery)
//! and the workflow only talk to these traits. `cdp_session` and `cdp_page`
//! implement them on top of chromiumoxide; `testing` provides scripted fakes.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kestrel_core::Result;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Identity of a top-level browsing context (the DevTools target id)
pub type TabId = String;

/// Result of looking an element up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct ElementProbe {
    pub present: bool,
    pub visible: bool,
}

/// How an element is looked up inside a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// First match of a CSS selector
    Css(String),
    /// First element under `container` whose text contains any label
    Text {
        container: String,
        labels: Vec<String>,
    },
    /// First element under `container` whose trimmed text equals `text`
    ExactText { container: String, text: String },
    /// The `index`-th (0-based) match of `container`
    Nth { container: String, index: usize },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "{}", selector),
            Locator::Text { container, labels } => {
                write!(f, "{} containing [{}]", container, labels.join("|"))
            }
            Locator::ExactText { container, text } => write!(f, "{} with text \"{}\"", container, text),
            Locator::Nth { container, index } => write!(f, "{}[{}]", container, index),
        }
    }
}

/// Cookie of a tab's session, reduced to what a request header needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

/// Messages of native dialogs that were auto-accepted
#[derive(Debug, Clone, Default)]
pub struct DialogLog(Arc<Mutex<Vec<String>>>);

impl DialogLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: impl Into<String>) {
        let mut messages = self.0.lock().unwrap_or_else(|p| p.into_inner());
        messages.push(message.into());
    }

    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// A document that elements can be looked up and clicked in
#[async_trait]
pub trait DomScope: Send + Sync {
    /// Short description used in errors and logs
    fn label(&self) -> String;

    async fn probe(&self, locator: &Locator) -> Result<ElementProbe>;

    /// Scroll the element into view and click it; `false` when nothing matched
    async fn click(&self, locator: &Locator) -> Result<bool>;

    /// Trimmed text content of every match of `selector`
    async fn texts(&self, selector: &str) -> Result<Vec<String>>;

    /// Evaluate a JavaScript expression and return its JSON value
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Serialized HTML of the document
    async fn content(&self) -> Result<String>;
}

/// A named frame inside a tab. Handles are transient: resolve again after
/// any navigation.
#[async_trait]
pub trait FrameHandle: DomScope {
    fn name(&self) -> &str;

    async fn url(&self) -> Result<String>;

    async fn is_detached(&self) -> bool;

    /// `document.readyState` evaluated inside the frame
    async fn ready_state(&self) -> Result<String>;
}

#[async_trait]
pub trait TabHandle: DomScope {
    fn id(&self) -> &str;

    async fn url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    async fn cookies(&self) -> Result<Vec<SessionCookie>>;

    async fn goto(&self, url: &str) -> Result<()>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;

    async fn click_and_wait_for_navigation(&self, selector: &str) -> Result<()>;

    async fn bring_to_front(&self) -> Result<()>;

    /// Current frame with this name, if the frame tree has one
    async fn frame(&self, name: &str) -> Result<Option<Arc<dyn FrameHandle>>>;

    /// Every child frame of the tab
    async fn frames(&self) -> Result<Vec<Arc<dyn FrameHandle>>>;

    /// Full-page PNG screenshot
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Accept every native dialog from now on, recording its message
    async fn auto_accept_dialogs(&self, log: DialogLog) -> Result<()>;
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Every open tab
    async fn tabs(&self) -> Result<Vec<Arc<dyn TabHandle>>>;

    /// Start listening for tab creation. Dropping the subscription ends it.
    async fn subscribe_tab_created(&self) -> Result<TabCreated>;

    async fn close(&self) -> Result<()>;
}

/// Scoped subscription to tab-creation notifications
pub struct TabCreated {
    events: BoxStream<'static, TabId>,
}

impl TabCreated {
    pub fn new(events: BoxStream<'static, TabId>) -> Self {
        Self { events }
    }

    pub async fn next(&mut self) -> Option<TabId> {
        self.events.next().await
    }
}

impl Drop for TabCreated {
    fn drop(&mut self) {
        tracing::trace!("Tab creation subscription released");
    }
}
