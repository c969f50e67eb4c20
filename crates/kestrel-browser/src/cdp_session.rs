use crate::cdp_page::CdpTab;
use crate::driver::{BrowserSession, TabCreated, TabHandle};
use crate::{Error, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::target::EventTargetCreated;
use futures::StreamExt;
use std::path::Path;
use std::process::Child;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const CONNECT_ATTEMPTS: u32 = 5;

/// Chrome DevTools Protocol session driving one browser
pub struct CdpSession {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
    chrome_process: Mutex<Option<Child>>,
    nav_timeout: Duration,
}

impl CdpSession {
    /// Connect to Chrome listening on `debugging_port`
    ///
    /// Retries a few times because Chrome may not be accepting connections
    /// right after its process starts.
    pub async fn connect(debugging_port: u16, nav_timeout: Duration) -> Result<Self> {
        tracing::info!(
            "CDP session: connecting to Chrome on port {}",
            debugging_port
        );

        let ws_url = format!("http://localhost:{}", debugging_port);
        let (browser, mut handler) = {
            let mut retries = CONNECT_ATTEMPTS;
            loop {
                tracing::debug!("Attempting CDP connection to {}...", ws_url);
                match Browser::connect(&ws_url).await {
                    Ok(result) => {
                        tracing::info!("CDP connection established");
                        break result;
                    }
                    Err(e) => {
                        retries -= 1;
                        if retries == 0 {
                            return Err(Error::Cdp(format!(
                                "Failed to connect to Chrome after {} attempts: {}",
                                CONNECT_ATTEMPTS, e
                            )));
                        }
                        tracing::info!(
                            "CDP connection attempt failed, retrying... ({} left)",
                            retries
                        );
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        };

        // The handler must be polled for any command to complete
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("CDP handler event error (continuing): {}", e);
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler_task,
            chrome_process: Mutex::new(None),
            nav_timeout,
        })
    }

    /// Take ownership of the Chrome process so `close` can terminate it
    pub async fn attach_process(&self, child: Child) {
        *self.chrome_process.lock().await = Some(child);
    }

    /// Route browser-native downloads into `dir`
    pub async fn set_download_dir(&self, dir: &Path) -> Result<()> {
        let dir = std::fs::canonicalize(dir)?;
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.display().to_string())
            .build()
            .map_err(Error::Cdp)?;

        self.browser.lock().await.execute(params).await?;
        tracing::debug!("Browser downloads go to {}", dir.display());
        Ok(())
    }

    /// The tab the workflow starts in: the first open page, or a new blank one
    pub async fn main_tab(&self) -> Result<Arc<dyn TabHandle>> {
        // Chrome may still be creating its initial page
        tokio::time::sleep(Duration::from_millis(500)).await;

        let browser = self.browser.lock().await;
        let page = match browser.pages().await?.into_iter().next() {
            Some(page) => {
                tracing::debug!("CDP: using existing page");
                page
            }
            None => {
                tracing::debug!("CDP: no existing pages, creating new page");
                browser.new_page("about:blank").await?
            }
        };

        Ok(Arc::new(CdpTab::new(page, self.nav_timeout)))
    }
}

#[async_trait]
impl BrowserSession for CdpSession {
    async fn tabs(&self) -> kestrel_core::Result<Vec<Arc<dyn TabHandle>>> {
        let pages = self.browser.lock().await.pages().await.map_err(Error::from)?;
        Ok(pages
            .into_iter()
            .map(|page| Arc::new(CdpTab::new(page, self.nav_timeout)) as Arc<dyn TabHandle>)
            .collect())
    }

    async fn subscribe_tab_created(&self) -> kestrel_core::Result<TabCreated> {
        let events = self
            .browser
            .lock()
            .await
            .event_listener::<EventTargetCreated>()
            .await
            .map_err(Error::from)?;

        let pages = events
            .filter_map(|event| async move {
                (event.target_info.r#type == "page")
                    .then(|| event.target_info.target_id.inner().clone())
            })
            .boxed();

        Ok(TabCreated::new(pages))
    }

    async fn close(&self) -> kestrel_core::Result<()> {
        if let Err(e) = self.browser.lock().await.close().await {
            tracing::debug!("Browser.close failed: {}", e);
        }

        if let Some(mut child) = self.chrome_process.lock().await.take() {
            if let Err(e) = child.kill() {
                tracing::debug!("Chrome process already gone: {}", e);
            }
            let _ = child.wait();
        }

        self.handler_task.abort();
        Ok(())
    }
}
