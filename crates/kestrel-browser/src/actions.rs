//! Waiting on and clicking elements inside a frame or tab.

use crate::driver::{DomScope, Locator};
use kestrel_core::fallback::Fallback;
use kestrel_core::{Error, Result};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Condition an element must meet for a wait to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Present in the document
    Attached,
    /// Present and rendered with a non-empty box
    Visible,
    /// Absent or not rendered
    Hidden,
}

impl Visibility {
    fn as_str(&self) -> &'static str {
        match self {
            Visibility::Attached => "attached",
            Visibility::Visible => "visible",
            Visibility::Hidden => "hidden",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Whether the element was ever seen visible while waiting. Always true for
    /// `Attached` and `Visible` waits.
    pub observed: bool,
    pub waited: Duration,
}

/// Which strategy of a [`ClickPlan`] clicked the element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickStrategy {
    Selector,
    Text(String),
    Position(usize),
}

impl fmt::Display for ClickStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClickStrategy::Selector => write!(f, "selector"),
            ClickStrategy::Text(label) => write!(f, "text \"{}\"", label),
            ClickStrategy::Position(index) => write!(f, "position {}", index),
        }
    }
}

/// Ordered ways of finding one element to click
#[derive(Debug, Clone)]
pub struct ClickPlan {
    selector: String,
    timeout: Duration,
    text: Option<(String, Vec<String>)>,
    nth: Option<(String, usize)>,
}

impl ClickPlan {
    pub fn new(selector: impl Into<String>, timeout: Duration) -> Self {
        Self {
            selector: selector.into(),
            timeout,
            text: None,
            nth: None,
        }
    }

    /// Fall back to an element under `container` whose text contains any label
    pub fn or_text<I, S>(mut self, container: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.text = Some((container.into(), labels.into_iter().map(Into::into).collect()));
        self
    }

    /// Fall back to the `index`-th (0-based) match of `container`
    pub fn or_nth(mut self, container: impl Into<String>, index: usize) -> Self {
        self.nth = Some((container.into(), index));
        self
    }
}

/// Polling waits and clicks against any [`DomScope`]
#[derive(Debug, Clone, Copy)]
pub struct SelectorActions {
    poll: Duration,
}

impl SelectorActions {
    pub fn new(poll: Duration) -> Self {
        Self { poll }
    }

    /// Poll until `selector` meets `visibility` or `timeout` expires.
    ///
    /// A failing probe counts as "not yet": frames navigate underneath us.
    pub async fn wait_for<S>(
        &self,
        scope: &S,
        selector: &str,
        visibility: Visibility,
        timeout: Duration,
    ) -> Result<WaitOutcome>
    where
        S: DomScope + ?Sized,
    {
        let locator = Locator::css(selector);
        let started = Instant::now();
        let mut observed = false;

        loop {
            match scope.probe(&locator).await {
                Ok(probe) => {
                    let shown = probe.present && probe.visible;
                    observed |= shown;

                    let satisfied = match visibility {
                        Visibility::Attached => probe.present,
                        Visibility::Visible => shown,
                        Visibility::Hidden => !shown,
                    };

                    if satisfied {
                        let outcome = WaitOutcome {
                            observed: visibility != Visibility::Hidden || observed,
                            waited: started.elapsed(),
                        };
                        tracing::debug!(
                            "'{}' {} in {} after {:?}",
                            selector,
                            visibility.as_str(),
                            scope.label(),
                            outcome.waited
                        );
                        return Ok(outcome);
                    }
                }
                Err(e) => {
                    tracing::debug!("Probe of '{}' in {} failed: {}", selector, scope.label(), e);
                }
            }

            if started.elapsed() >= timeout {
                return Err(Error::SelectorTimeout {
                    selector: selector.to_string(),
                    scope: scope.label(),
                    condition: visibility.as_str(),
                    timeout,
                });
            }

            tokio::time::sleep(self.poll).await;
        }
    }

    /// Wait until `selector` is visible, then click it
    pub async fn click<S>(&self, scope: &S, selector: &str, timeout: Duration) -> Result<()>
    where
        S: DomScope + ?Sized,
    {
        self.wait_for(scope, selector, Visibility::Visible, timeout)
            .await?;

        if scope.click(&Locator::css(selector)).await? {
            tracing::debug!("Clicked '{}' in {}", selector, scope.label());
            Ok(())
        } else {
            Err(Error::ElementNotFound {
                target: selector.to_string(),
                attempts: vec![format!("selector: vanished before click in {}", scope.label())],
            })
        }
    }

    /// Click the first element any strategy of `plan` finds
    pub async fn click_with_fallback<S>(&self, scope: &S, plan: &ClickPlan) -> Result<ClickStrategy>
    where
        S: DomScope + ?Sized,
    {
        let mut fallback = Fallback::new(plan.selector.clone()).strategy("selector", move || async move {
            self.click(scope, &plan.selector, plan.timeout).await?;
            Ok::<_, Error>(Some(ClickStrategy::Selector))
        });

        if let Some((container, labels)) = &plan.text {
            fallback = fallback.strategy("text", move || async move {
                let texts = scope.texts(container).await?;
                let label = texts
                    .iter()
                    .find_map(|text| labels.iter().find(|label| text.contains(label.as_str())));
                let Some(label) = label else {
                    return Ok(None);
                };

                let locator = Locator::Text {
                    container: container.clone(),
                    labels: vec![label.clone()],
                };
                let clicked = scope.click(&locator).await?;
                Ok::<_, Error>(clicked.then(|| ClickStrategy::Text(label.clone())))
            });
        }

        if let Some((container, index)) = &plan.nth {
            let index = *index;
            fallback = fallback.strategy("position", move || async move {
                let locator = Locator::Nth {
                    container: container.clone(),
                    index,
                };
                let clicked = scope.click(&locator).await?;
                Ok::<_, Error>(clicked.then_some(ClickStrategy::Position(index)))
            });
        }

        let resolved = fallback.run().await?;
        tracing::debug!("Clicked {} via {}", plan.selector, resolved.value);
        Ok(resolved.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeElement, FakeFrame};

    fn actions() -> SelectorActions {
        SelectorActions::new(Duration::from_millis(100))
    }

    fn generator_plan() -> ClickPlan {
        ClickPlan::new("#submenu_06", Duration::from_secs(30))
            .or_text(".menuItem", ["Xerador", "Generador"])
            .or_nth(".menuItem", 5)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_visible_succeeds_once_element_renders() {
        let frame = FakeFrame::new("menu");
        frame.add_element(FakeElement::new("#menu_05").hidden_for_probes(3));

        let outcome = actions()
            .wait_for(&frame, "#menu_05", Visibility::Visible, Duration::from_secs(40))
            .await
            .unwrap();

        assert!(outcome.observed);
        assert_eq!(outcome.waited, Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_selector_context() {
        let frame = FakeFrame::new("menu");

        let err = actions()
            .wait_for(&frame, "#menu_05", Visibility::Visible, Duration::from_secs(2))
            .await
            .unwrap_err();

        match err {
            Error::SelectorTimeout {
                selector,
                scope,
                condition,
                timeout,
            } => {
                assert_eq!(selector, "#menu_05");
                assert!(scope.contains("menu"));
                assert_eq!(condition, "visible");
                assert_eq!(timeout, Duration::from_secs(2));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attached_wait_ignores_rendering() {
        let frame = FakeFrame::new("leftFrame");
        frame.add_element(FakeElement::new("#tablas").invisible());

        let attached = actions()
            .wait_for(&frame, "#tablas", Visibility::Attached, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(attached.waited, Duration::ZERO);

        let err = actions()
            .wait_for(&frame, "#tablas", Visibility::Visible, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SelectorTimeout { condition: "visible", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_errors_count_as_not_yet() {
        let frame = FakeFrame::new("mainFrame").probe_fails_for(4);
        frame.add_element(FakeElement::new("#BotonObterInforme"));

        let outcome = actions()
            .wait_for(&frame, "#BotonObterInforme", Visibility::Visible, Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(outcome.waited, Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_wait_reports_whether_overlay_was_seen() {
        let frame = FakeFrame::new("mainFrame");
        frame.add_element(FakeElement::new("#loaderOverlay").hidden_after_probes(5));

        let seen = actions()
            .wait_for(&frame, "#loaderOverlay", Visibility::Hidden, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(seen.observed);

        let empty = FakeFrame::new("mainFrame");
        let never = actions()
            .wait_for(&empty, "#loaderOverlay", Visibility::Hidden, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(!never.observed);
        assert_eq!(never.waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_records_selector() {
        let frame = FakeFrame::new("mainFrame");
        frame.add_element(FakeElement::new("#BotonObterInforme"));

        actions()
            .click(&frame, "#BotonObterInforme", Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(frame.clicks(), vec!["#BotonObterInforme".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_prefers_exact_selector() {
        let frame = FakeFrame::new("menu");
        frame.add_element(FakeElement::new("#submenu_06"));
        frame.add_element(FakeElement::new(".menuItem").with_text("Xerador de informes"));

        let strategy = actions()
            .click_with_fallback(&frame, &generator_plan())
            .await
            .unwrap();

        assert_eq!(strategy, ClickStrategy::Selector);
        assert_eq!(frame.clicks(), vec!["#submenu_06".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_uses_text_match() {
        let frame = FakeFrame::new("menu");
        for label in ["Consultas", "Listados", "Generador de informes"] {
            frame.add_element(FakeElement::new(".menuItem").with_text(label));
        }

        let strategy = actions()
            .click_with_fallback(&frame, &generator_plan())
            .await
            .unwrap();

        assert_eq!(strategy, ClickStrategy::Text("Generador".to_string()));
        assert_eq!(
            frame.clicks(),
            vec![".menuItem containing [Generador]".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_uses_position_when_text_misses() {
        let frame = FakeFrame::new("menu");
        for n in 1..=6 {
            frame.add_element(FakeElement::new(".menuItem").with_text(format!("Item {}", n)));
        }

        let strategy = actions()
            .click_with_fallback(&frame, &generator_plan())
            .await
            .unwrap();

        assert_eq!(strategy, ClickStrategy::Position(5));
        assert_eq!(frame.clicks(), vec![".menuItem[5]".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_fails_listing_every_strategy() {
        let frame = FakeFrame::new("menu");

        let err = actions()
            .click_with_fallback(&frame, &generator_plan())
            .await
            .unwrap_err();

        match err {
            Error::ElementNotFound { target, attempts } => {
                assert_eq!(target, "#submenu_06");
                assert_eq!(attempts.len(), 3);
                assert!(attempts[0].starts_with("selector"));
                assert!(attempts[1].starts_with("text"));
                assert!(attempts[2].starts_with("position"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_without_fallbacks_only_tries_selector() {
        let frame = FakeFrame::new("menu");
        frame.add_element(FakeElement::new(".menuItem").with_text("Generador"));

        let plan = ClickPlan::new("#submenu_06", Duration::from_secs(1));
        let err = actions().click_with_fallback(&frame, &plan).await.unwrap_err();

        assert!(matches!(err, Error::ElementNotFound { ref attempts, .. } if attempts.len() == 1));
        assert!(frame.clicks().is_empty());
    }
}
