use async_trait::async_trait;
use kestrel_browser::{SelectorActions, TabHandle, Visibility};
use kestrel_core::{Credentials, Result, Timings};
use std::time::Duration;

pub const USERNAME_FIELD: &str = "#username";
pub const PASSWORD_FIELD: &str = "#password";
pub const LOGIN_BUTTON: &str = "#botonentrarlogin";

/// Brings a tab from any page to an authenticated session
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, tab: &dyn TabHandle, url: &str, credentials: &Credentials) -> Result<()>;
}

/// Fills and submits the application's login form
pub struct FormLogin {
    actions: SelectorActions,
    field_wait: Duration,
}

impl FormLogin {
    pub fn new(timings: &Timings) -> Self {
        Self {
            actions: SelectorActions::new(timings.selector_poll),
            field_wait: timings.login_field_wait,
        }
    }
}

#[async_trait]
impl Authenticator for FormLogin {
    async fn login(&self, tab: &dyn TabHandle, url: &str, credentials: &Credentials) -> Result<()> {
        tracing::debug!("Logging in as {} at {}", credentials.username, url);
        tab.goto(url).await?;

        self.actions
            .wait_for(tab, USERNAME_FIELD, Visibility::Visible, self.field_wait)
            .await?;
        tab.type_text(USERNAME_FIELD, &credentials.username).await?;
        tab.type_text(PASSWORD_FIELD, &credentials.password).await?;
        tab.click_and_wait_for_navigation(LOGIN_BUTTON).await?;

        tracing::info!("Authenticated as {}", credentials.username);
        Ok(())
    }
}
