//! Finding the tab a click opened.
//!
//! Tab-creation notifications are unreliable on their own, so every tick
//! combines the event with three polling signals and the first positive one
//! wins.

use crate::driver::{BrowserSession, Locator, TabHandle, TabId};
use futures::future::join_all;
use kestrel_core::{Error, Result, Timings};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Title fragment of the result mailbox tab
pub const RESULT_TITLE_MARKER: &str = "Buzón";

/// Download action present on every row of the result mailbox
pub const RESULT_ACTION_SELECTOR: &str = "a[id=\"accionDescargar\"]";

/// URL fragments of the result mailbox
pub const RESULT_URL_FRAGMENTS: &[&str] = &["buzon", "informes"];

/// Evidence that a tab is the new one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// A tab-creation notification arrived within the event window
    Event,
    /// A tab exists that was not open before the click
    SetDifference,
    /// A new tab has the result title or the result action element
    ContentProbe,
    /// A new tab's URL contains a result fragment
    UrlPattern,
}

impl Signal {
    pub const ALL: [Signal; 4] = [
        Signal::Event,
        Signal::SetDifference,
        Signal::ContentProbe,
        Signal::UrlPattern,
    ];
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Event => "event",
            Signal::SetDifference => "set difference",
            Signal::ContentProbe => "content probe",
            Signal::UrlPattern => "url pattern",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub deadline: Duration,
    pub tick: Duration,
    pub event_window: Duration,
    /// Signals evaluated each tick, in order
    pub signals: Vec<Signal>,
}

impl DiscoveryOptions {
    pub fn from_timings(timings: &Timings) -> Self {
        Self {
            deadline: timings.tab_deadline,
            tick: timings.tab_poll_interval,
            event_window: timings.tab_event_window,
            signals: Signal::ALL.to_vec(),
        }
    }

    /// Evaluate a single signal
    pub fn only(mut self, signal: Signal) -> Self {
        self.signals = vec![signal];
        self
    }

    pub fn signals(mut self, signals: impl IntoIterator<Item = Signal>) -> Self {
        self.signals = signals.into_iter().collect();
        self
    }
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from_timings(&Timings::default())
    }
}

pub struct DiscoveredTab {
    pub tab: Arc<dyn TabHandle>,
    pub signal: Signal,
    /// 1-based tick the signal fired on
    pub ticks: u32,
}

impl fmt::Debug for DiscoveredTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveredTab")
            .field("tab", &self.tab.id())
            .field("signal", &self.signal)
            .field("ticks", &self.ticks)
            .finish()
    }
}

pub struct TabDiscovery<'a> {
    session: &'a dyn BrowserSession,
    options: DiscoveryOptions,
}

impl<'a> TabDiscovery<'a> {
    pub fn new(session: &'a dyn BrowserSession, options: DiscoveryOptions) -> Self {
        Self { session, options }
    }

    /// Wait for a tab whose id is not in `reference`
    pub async fn discover(&self, reference: &HashSet<TabId>) -> Result<DiscoveredTab> {
        let started = Instant::now();
        let mut ticks = 0;

        tracing::debug!(
            "Looking for a new tab ({} open before), signals: {:?}",
            reference.len(),
            self.options.signals
        );

        loop {
            ticks += 1;

            for &signal in &self.options.signals {
                match self.check(signal, reference).await {
                    Ok(Some(tab)) => {
                        tracing::info!(
                            "New tab {} found by {} on tick {}",
                            tab.id(),
                            signal,
                            ticks
                        );
                        return Ok(DiscoveredTab { tab, signal, ticks });
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!("Signal {} failed on tick {}: {}", signal, ticks, e),
                }
            }

            if started.elapsed() >= self.options.deadline {
                break;
            }
            tokio::time::sleep(self.options.tick).await;
        }

        let open_urls = self.open_urls().await;
        tracing::warn!("No new tab after {} ticks; open: {:?}", ticks, open_urls);

        Err(Error::TabDiscoveryTimeout {
            elapsed: started.elapsed(),
            open_urls,
        })
    }

    async fn check(
        &self,
        signal: Signal,
        reference: &HashSet<TabId>,
    ) -> Result<Option<Arc<dyn TabHandle>>> {
        match signal {
            Signal::Event => self.by_event(reference).await,
            Signal::SetDifference => Ok(self.new_tabs(reference).await?.into_iter().next()),
            Signal::ContentProbe => self.by_content(reference).await,
            Signal::UrlPattern => self.by_url(reference).await,
        }
    }

    async fn new_tabs(&self, reference: &HashSet<TabId>) -> Result<Vec<Arc<dyn TabHandle>>> {
        Ok(self
            .session
            .tabs()
            .await?
            .into_iter()
            .filter(|tab| !reference.contains(tab.id()))
            .collect())
    }

    async fn by_event(&self, reference: &HashSet<TabId>) -> Result<Option<Arc<dyn TabHandle>>> {
        let mut subscription = self.session.subscribe_tab_created().await?;
        let deadline = Instant::now() + self.options.event_window;

        loop {
            let id = match tokio::time::timeout_at(deadline, subscription.next()).await {
                Ok(Some(id)) => id,
                Ok(None) | Err(_) => return Ok(None),
            };
            if reference.contains(&id) {
                continue;
            }

            let created = self
                .session
                .tabs()
                .await?
                .into_iter()
                .find(|tab| tab.id() == id);
            if created.is_some() {
                return Ok(created);
            }
            tracing::debug!("Tab {} announced but not listed yet", id);
        }
    }

    async fn by_content(&self, reference: &HashSet<TabId>) -> Result<Option<Arc<dyn TabHandle>>> {
        let candidates = self.new_tabs(reference).await?;
        let action = Locator::css(RESULT_ACTION_SELECTOR);

        let verdicts = join_all(candidates.iter().map(|tab| {
            let action = &action;
            async move {
                if let Ok(title) = tab.title().await {
                    if title.contains(RESULT_TITLE_MARKER) {
                        return true;
                    }
                }
                match tab.probe(action).await {
                    Ok(probe) => probe.present,
                    Err(e) => {
                        tracing::debug!("Content probe of {} failed: {}", tab.id(), e);
                        false
                    }
                }
            }
        }))
        .await;

        Ok(candidates
            .into_iter()
            .zip(verdicts)
            .find_map(|(tab, matched)| matched.then_some(tab)))
    }

    async fn by_url(&self, reference: &HashSet<TabId>) -> Result<Option<Arc<dyn TabHandle>>> {
        for tab in self.new_tabs(reference).await? {
            let url = match tab.url().await {
                Ok(url) => url.to_lowercase(),
                Err(_) => continue,
            };
            if RESULT_URL_FRAGMENTS.iter().any(|fragment| url.contains(fragment)) {
                return Ok(Some(tab));
            }
        }
        Ok(None)
    }

    async fn open_urls(&self) -> Vec<String> {
        let tabs = match self.session.tabs().await {
            Ok(tabs) => tabs,
            Err(e) => return vec![format!("<tab listing failed: {}>", e)],
        };

        let mut urls = Vec::with_capacity(tabs.len());
        for tab in tabs {
            urls.push(tab.url().await.unwrap_or_else(|_| "<unknown>".to_string()));
        }
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeElement, FakeSession, FakeTab};

    fn reference(ids: &[&str]) -> HashSet<TabId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn options() -> DiscoveryOptions {
        DiscoveryOptions::default()
    }

    fn session_with_main_tab() -> FakeSession {
        let session = FakeSession::new();
        session.add_tab(FakeTab::new("T1", "https://erp.example/menu.jsp"));
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_signal_in_isolation() {
        let session = session_with_main_tab();
        session.add_tab(FakeTab::new("T2", "about:blank"));
        session.emit_tab_created_at("T2", Duration::from_millis(400));

        let found = TabDiscovery::new(&session, options().only(Signal::Event))
            .discover(&reference(&["T1"]))
            .await
            .unwrap();

        assert_eq!(found.tab.id(), "T2");
        assert_eq!(found.signal, Signal::Event);
        assert_eq!(found.ticks, 1);
        assert_eq!(session.live_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_for_reference_tab_is_ignored() {
        let session = session_with_main_tab();
        session.emit_tab_created_at("T1", Duration::from_millis(100));

        let err = TabDiscovery::new(
            &session,
            DiscoveryOptions {
                deadline: Duration::from_secs(3),
                ..options().only(Signal::Event)
            },
        )
        .discover(&reference(&["T1"]))
        .await
        .unwrap_err();

        assert!(matches!(err, Error::TabDiscoveryTimeout { .. }));
        assert_eq!(session.live_subscriptions(), 0);
        assert!(session.subscriptions_opened() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_difference_signal_in_isolation() {
        let session = session_with_main_tab();
        session.add_tab(FakeTab::new("T2", "about:blank"));

        let found = TabDiscovery::new(&session, options().only(Signal::SetDifference))
            .discover(&reference(&["T1"]))
            .await
            .unwrap();

        assert_eq!(found.tab.id(), "T2");
        assert_eq!(found.signal, Signal::SetDifference);
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_probe_by_title_in_isolation() {
        let session = session_with_main_tab();
        session.add_tab(FakeTab::new("T2", "about:blank"));
        session.add_tab(FakeTab::new("T3", "about:blank").with_title("Buzón de informes"));

        let found = TabDiscovery::new(&session, options().only(Signal::ContentProbe))
            .discover(&reference(&["T1"]))
            .await
            .unwrap();

        assert_eq!(found.tab.id(), "T3");
        assert_eq!(found.signal, Signal::ContentProbe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_probe_by_action_element_tolerates_failing_tabs() {
        let session = session_with_main_tab();
        session.add_tab(FakeTab::new("T2", "about:blank").unresponsive());
        let mailbox = FakeTab::new("T3", "https://erp.example/x");
        mailbox.add_element(FakeElement::new(RESULT_ACTION_SELECTOR));
        session.add_tab(mailbox);

        let found = TabDiscovery::new(&session, options().only(Signal::ContentProbe))
            .discover(&reference(&["T1"]))
            .await
            .unwrap();

        assert_eq!(found.tab.id(), "T3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_probe_ignores_reference_tabs() {
        let session = FakeSession::new();
        session.add_tab(FakeTab::new("T1", "about:blank").with_title("Buzón"));

        let err = TabDiscovery::new(
            &session,
            DiscoveryOptions {
                deadline: Duration::from_secs(2),
                ..options().only(Signal::ContentProbe)
            },
        )
        .discover(&reference(&["T1"]))
        .await
        .unwrap_err();

        assert!(matches!(err, Error::TabDiscoveryTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_signal_finds_tab_appearing_on_third_tick() {
        let session = session_with_main_tab();
        session.add_tab_at(
            FakeTab::new("T2", "https://erp.example/Buzon/listado.jsp"),
            Duration::from_secs(2),
        );

        let found = TabDiscovery::new(&session, options().only(Signal::UrlPattern))
            .discover(&reference(&["T1"]))
            .await
            .unwrap();

        assert_eq!(found.tab.id(), "T2");
        assert_eq!(found.signal, Signal::UrlPattern);
        assert!(found.ticks <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_signal_skips_unrelated_tabs() {
        let session = session_with_main_tab();
        session.add_tab(FakeTab::new("T2", "https://ads.example/"));
        session.add_tab(FakeTab::new("T3", "https://erp.example/informes/ver"));

        let found = TabDiscovery::new(&session, options().only(Signal::UrlPattern))
            .discover(&reference(&["T1"]))
            .await
            .unwrap();

        assert_eq!(found.tab.id(), "T3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_event_signal_opens_no_subscription() {
        let session = session_with_main_tab();
        session.add_tab(FakeTab::new("T2", "https://erp.example/buzon"));
        session.emit_tab_created_at("T2", Duration::ZERO);

        let found = TabDiscovery::new(
            &session,
            options().signals([Signal::SetDifference, Signal::UrlPattern]),
        )
        .discover(&reference(&["T1"]))
        .await
        .unwrap();

        assert_eq!(found.signal, Signal::SetDifference);
        assert_eq!(session.subscriptions_opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_signals_prefer_event() {
        let session = session_with_main_tab();
        session.add_tab(FakeTab::new("T2", "https://erp.example/buzon"));
        session.emit_tab_created_at("T2", Duration::ZERO);

        let found = TabDiscovery::new(&session, options())
            .discover(&reference(&["T1"]))
            .await
            .unwrap();

        assert_eq!(found.signal, Signal::Event);
        assert_eq!(session.live_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_lists_every_open_url() {
        let session = session_with_main_tab();
        session.add_tab(FakeTab::new("T9", "about:blank"));
        let started = Instant::now();

        let err = TabDiscovery::new(&session, options())
            .discover(&reference(&["T1", "T9"]))
            .await
            .unwrap_err();

        match err {
            Error::TabDiscoveryTimeout { elapsed, open_urls } => {
                assert!(elapsed >= Duration::from_secs(30));
                assert_eq!(
                    open_urls,
                    vec![
                        "https://erp.example/menu.jsp".to_string(),
                        "about:blank".to_string()
                    ]
                );
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(33));
        assert_eq!(session.live_subscriptions(), 0);
    }
}
