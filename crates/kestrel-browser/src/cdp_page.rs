use crate::driver::{
    DialogLog, DomScope, ElementProbe, FrameHandle, Locator, SessionCookie, TabHandle,
};
use crate::{scripts, Error};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CreateIsolatedWorldParams, EventJavascriptDialogOpening, Frame,
    FrameId, FrameTree, GetFrameTreeParams, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const WORLD_NAME: &str = "kestrel";

/// Evaluate in the page's main world, or in `context` when given
async fn evaluate_in(
    page: &Page,
    expression: &str,
    context: Option<ExecutionContextId>,
) -> crate::Result<Value> {
    let mut builder = EvaluateParams::builder()
        .expression(expression)
        .return_by_value(true)
        .await_promise(true);
    if let Some(context) = context {
        builder = builder.context_id(context);
    }
    let params = builder.build().map_err(Error::Cdp)?;

    let result = page.evaluate_expression(params).await?;
    Ok(result.value().cloned().unwrap_or(Value::Null))
}

async fn probe_in(page: &Page, locator: &Locator) -> kestrel_core::Result<ElementProbe> {
    let value = evaluate_in(page, &scripts::probe(locator), None).await?;
    Ok(serde_json::from_value(value)?)
}

async fn click_in(page: &Page, locator: &Locator) -> kestrel_core::Result<bool> {
    let value = evaluate_in(page, &scripts::click(locator), None).await?;
    Ok(value.as_bool().unwrap_or(false))
}

async fn texts_in(page: &Page, selector: &str) -> kestrel_core::Result<Vec<String>> {
    let value = evaluate_in(page, &scripts::texts(selector), None).await?;
    Ok(serde_json::from_value(value)?)
}

/// Create a fresh isolated world in `frame_id`
async fn isolated_world(page: &Page, frame_id: &FrameId) -> crate::Result<ExecutionContextId> {
    let params = CreateIsolatedWorldParams::builder()
        .frame_id(frame_id.clone())
        .world_name(WORLD_NAME)
        .build()
        .map_err(Error::Cdp)?;
    let response = page.execute(params).await?;
    Ok(response.result.execution_context_id)
}

/// Whether an evaluation failed because its execution context went away
fn is_stale_context(err: &Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("cannot find context")
        || message.contains("execution context was destroyed")
        || message.contains("no execution context")
}

/// Flattened frame tree of a page, main frame first
async fn frame_tree(page: &Page) -> crate::Result<Vec<Frame>> {
    fn flatten(tree: FrameTree, out: &mut Vec<Frame>) {
        out.push(tree.frame);
        for child in tree.child_frames.unwrap_or_default() {
            flatten(child, out);
        }
    }

    let response = page.execute(GetFrameTreeParams::default()).await?;
    let mut frames = Vec::new();
    flatten(response.result.frame_tree, &mut frames);
    Ok(frames)
}

/// A tab backed by a chromiumoxide page
pub struct CdpTab {
    page: Page,
    id: String,
    nav_timeout: Duration,
}

impl CdpTab {
    pub fn new(page: Page, nav_timeout: Duration) -> Self {
        let id = page.target_id().inner().clone();
        Self {
            page,
            id,
            nav_timeout,
        }
    }

    fn frame_handle(&self, frame: Frame) -> CdpFrame {
        CdpFrame {
            page: self.page.clone(),
            frame_id: frame.id,
            name: frame.name.unwrap_or_default(),
            context: Mutex::new(None),
        }
    }

    async fn navigation_deadline<F, T>(&self, what: &str, fut: F) -> kestrel_core::Result<T>
    where
        F: std::future::Future<Output = chromiumoxide::error::Result<T>>,
    {
        match tokio::time::timeout(self.nav_timeout, fut).await {
            Ok(result) => result.map_err(|e| Error::from(e).into()),
            Err(_) => Err(Error::Browser(format!(
                "{} did not finish within {:?}",
                what, self.nav_timeout
            ))
            .into()),
        }
    }
}

#[async_trait]
impl DomScope for CdpTab {
    fn label(&self) -> String {
        format!("tab {}", self.id)
    }

    async fn probe(&self, locator: &Locator) -> kestrel_core::Result<ElementProbe> {
        probe_in(&self.page, locator).await
    }

    async fn click(&self, locator: &Locator) -> kestrel_core::Result<bool> {
        click_in(&self.page, locator).await
    }

    async fn texts(&self, selector: &str) -> kestrel_core::Result<Vec<String>> {
        texts_in(&self.page, selector).await
    }

    async fn evaluate(&self, expression: &str) -> kestrel_core::Result<Value> {
        Ok(evaluate_in(&self.page, expression, None).await?)
    }

    async fn content(&self) -> kestrel_core::Result<String> {
        Ok(self.page.content().await.map_err(Error::from)?)
    }
}

#[async_trait]
impl TabHandle for CdpTab {
    fn id(&self) -> &str {
        &self.id
    }

    async fn url(&self) -> kestrel_core::Result<String> {
        Ok(self.page.url().await.map_err(Error::from)?.unwrap_or_default())
    }

    async fn title(&self) -> kestrel_core::Result<String> {
        Ok(self
            .page
            .get_title()
            .await
            .map_err(Error::from)?
            .unwrap_or_default())
    }

    async fn cookies(&self) -> kestrel_core::Result<Vec<SessionCookie>> {
        let cookies = self.page.get_cookies().await.map_err(Error::from)?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
            })
            .collect())
    }

    async fn goto(&self, url: &str) -> kestrel_core::Result<()> {
        tracing::debug!("Navigating {} to {}", self.id, url);
        self.navigation_deadline("Navigation", self.page.goto(url))
            .await
            .map(|_| ())
    }

    async fn type_text(&self, selector: &str, text: &str) -> kestrel_core::Result<()> {
        let element = self.page.find_element(selector).await.map_err(Error::from)?;
        element.click().await.map_err(Error::from)?;
        element.type_str(text).await.map_err(Error::from)?;
        Ok(())
    }

    async fn click_and_wait_for_navigation(&self, selector: &str) -> kestrel_core::Result<()> {
        let element = self.page.find_element(selector).await.map_err(Error::from)?;
        element.click().await.map_err(Error::from)?;
        self.navigation_deadline("Navigation after click", self.page.wait_for_navigation())
            .await
            .map(|_| ())
    }

    async fn bring_to_front(&self) -> kestrel_core::Result<()> {
        self.page.bring_to_front().await.map_err(Error::from)?;
        Ok(())
    }

    async fn frame(&self, name: &str) -> kestrel_core::Result<Option<Arc<dyn FrameHandle>>> {
        let frames = frame_tree(&self.page).await?;
        let Some(frame) = frames
            .into_iter()
            .skip(1)
            .find(|f| f.name.as_deref() == Some(name))
        else {
            return Ok(None);
        };

        Ok(Some(Arc::new(self.frame_handle(frame))))
    }

    async fn frames(&self) -> kestrel_core::Result<Vec<Arc<dyn FrameHandle>>> {
        let frames = frame_tree(&self.page).await?;
        let mut handles: Vec<Arc<dyn FrameHandle>> = Vec::new();
        for frame in frames.into_iter().skip(1) {
            handles.push(Arc::new(self.frame_handle(frame)));
        }
        Ok(handles)
    }

    async fn screenshot(&self) -> kestrel_core::Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        Ok(self.page.screenshot(params).await.map_err(Error::from)?)
    }

    async fn auto_accept_dialogs(&self, log: DialogLog) -> kestrel_core::Result<()> {
        let mut dialogs = self
            .page
            .event_listener::<EventJavascriptDialogOpening>()
            .await
            .map_err(Error::from)?;
        let page = self.page.clone();

        tokio::spawn(async move {
            while let Some(dialog) = dialogs.next().await {
                tracing::info!("Accepting dialog: {}", dialog.message);
                log.push(dialog.message.clone());
                if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(true)).await {
                    tracing::warn!("Failed to accept dialog: {}", e);
                }
            }
        });

        Ok(())
    }
}

/// A child frame evaluated through its own isolated world.
///
/// The world is created on first use and again whenever the frame navigates
/// away from it, so a handle keeps working across reloads of the same frame.
pub struct CdpFrame {
    page: Page,
    frame_id: FrameId,
    name: String,
    context: Mutex<Option<ExecutionContextId>>,
}

impl CdpFrame {
    async fn context(&self, refresh: bool) -> crate::Result<ExecutionContextId> {
        let mut context = self.context.lock().await;
        if let Some(id) = context.as_ref().filter(|_| !refresh) {
            return Ok(id.clone());
        }

        let id = isolated_world(&self.page, &self.frame_id)
            .await
            .map_err(|e| {
                Error::Browser(format!(
                    "Frame \"{}\" has no execution context: {}",
                    self.name, e
                ))
            })?;
        *context = Some(id.clone());
        Ok(id)
    }

    async fn run(&self, expression: &str) -> crate::Result<Value> {
        let context = self.context(false).await?;
        match evaluate_in(&self.page, expression, Some(context)).await {
            Err(e) if is_stale_context(&e) => {
                tracing::debug!("Frame \"{}\" navigated, recreating its world", self.name);
                let context = self.context(true).await?;
                evaluate_in(&self.page, expression, Some(context)).await
            }
            other => other,
        }
    }

    async fn current(&self) -> crate::Result<Option<Frame>> {
        let frames = frame_tree(&self.page).await?;
        Ok(frames.into_iter().find(|f| f.id == self.frame_id))
    }
}

#[async_trait]
impl DomScope for CdpFrame {
    fn label(&self) -> String {
        format!("frame \"{}\"", self.name)
    }

    async fn probe(&self, locator: &Locator) -> kestrel_core::Result<ElementProbe> {
        let value = self.run(&scripts::probe(locator)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn click(&self, locator: &Locator) -> kestrel_core::Result<bool> {
        let value = self.run(&scripts::click(locator)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn texts(&self, selector: &str) -> kestrel_core::Result<Vec<String>> {
        let value = self.run(&scripts::texts(selector)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn evaluate(&self, expression: &str) -> kestrel_core::Result<Value> {
        Ok(self.run(expression).await?)
    }

    async fn content(&self) -> kestrel_core::Result<String> {
        let value = self.evaluate(scripts::OUTER_HTML).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl FrameHandle for CdpFrame {
    fn name(&self) -> &str {
        &self.name
    }

    async fn url(&self) -> kestrel_core::Result<String> {
        Ok(self.current().await?.map(|f| f.url).unwrap_or_default())
    }

    async fn is_detached(&self) -> bool {
        !matches!(self.current().await, Ok(Some(_)))
    }

    async fn ready_state(&self) -> kestrel_core::Result<String> {
        let value = self.evaluate(scripts::READY_STATE).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}
