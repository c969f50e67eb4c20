//! Browser driving for the report workflow: Chrome discovery and launch, the
//! DevTools session, and the resilience layer the workflow steps are built on.

pub mod actions;
mod cdp_page;
mod cdp_session;
mod chrome_finder;
pub mod driver;
mod error;
pub mod frame_resolver;
mod launcher;
mod profile;
pub mod scripts;
pub mod tab_discovery;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use actions::{ClickPlan, ClickStrategy, SelectorActions, Visibility, WaitOutcome};
pub use cdp_page::{CdpFrame, CdpTab};
pub use cdp_session::CdpSession;
pub use chrome_finder::ChromeFinder;
pub use driver::{
    BrowserSession, DialogLog, DomScope, ElementProbe, FrameHandle, Locator, SessionCookie,
    TabCreated, TabHandle, TabId,
};
pub use error::{Error, Result};
pub use frame_resolver::FrameResolver;
pub use launcher::{ChromeLauncher, DEFAULT_DEBUGGING_PORT};
pub use profile::ProfileManager;
pub use tab_discovery::{DiscoveredTab, DiscoveryOptions, Signal, TabDiscovery};
