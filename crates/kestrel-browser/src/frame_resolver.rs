//! Resolution of named frames that may detach and reattach at any time.

use crate::driver::{FrameHandle, TabHandle};
use kestrel_core::retry::retry_with_backoff;
use kestrel_core::{Error, Result, Timings};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Why a resolution attempt produced no usable frame
#[derive(Debug)]
enum Rejection {
    Missing,
    Detached,
    NotReady(String),
    ProbeFailed(Error),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Missing => write!(f, "not in frame tree"),
            Rejection::Detached => write!(f, "detached"),
            Rejection::NotReady(state) => write!(f, "document is {}", state),
            Rejection::ProbeFailed(e) => write!(f, "probe failed: {}", e),
        }
    }
}

/// Looks up a frame by name and only hands it out once it runs script.
///
/// Frame identity is not stable across navigations, so callers resolve again
/// every time they need a frame instead of keeping handles around.
#[derive(Debug, Clone)]
pub struct FrameResolver {
    attempts: u32,
    invalid_backoff: Duration,
    missing_backoff: Duration,
}

impl FrameResolver {
    pub fn new(timings: &Timings) -> Self {
        Self {
            attempts: timings.frame_attempts,
            invalid_backoff: timings.frame_invalid_backoff,
            missing_backoff: timings.frame_missing_backoff,
        }
    }

    pub async fn resolve<T>(&self, tab: &T, name: &str) -> Result<Arc<dyn FrameHandle>>
    where
        T: TabHandle + ?Sized,
    {
        let attempts = self.attempts;

        let result = retry_with_backoff(
            attempts,
            |attempt| async move {
                let outcome = Self::attempt(tab, name).await;
                if let Err(ref rejection) = outcome {
                    tracing::debug!(
                        "Frame \"{}\" attempt {}/{}: {}",
                        name,
                        attempt,
                        attempts,
                        rejection
                    );
                }
                outcome
            },
            |attempt, rejection| {
                if !matches!(rejection, Rejection::Missing | Rejection::Detached) {
                    tracing::warn!("Frame {} error, retry {}/{}", name, attempt, attempts);
                }
                self.backoff(rejection)
            },
        )
        .await;

        result.map_err(|exhausted| Error::FrameUnavailable {
            frame: name.to_string(),
            attempts: exhausted.attempts,
            elapsed: exhausted.elapsed,
        })
    }

    fn backoff(&self, rejection: &Rejection) -> Duration {
        match rejection {
            Rejection::Missing | Rejection::Detached => self.missing_backoff,
            Rejection::NotReady(_) | Rejection::ProbeFailed(_) => self.invalid_backoff,
        }
    }

    async fn attempt<T>(tab: &T, name: &str) -> std::result::Result<Arc<dyn FrameHandle>, Rejection>
    where
        T: TabHandle + ?Sized,
    {
        let frame = match tab.frame(name).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(Rejection::Missing),
            Err(e) => {
                tracing::debug!("Frame tree lookup failed: {}", e);
                return Err(Rejection::Missing);
            }
        };

        if frame.is_detached().await {
            return Err(Rejection::Detached);
        }

        match frame.ready_state().await {
            Ok(state) if state == "interactive" || state == "complete" => Ok(frame),
            Ok(state) => Err(Rejection::NotReady(state)),
            Err(e) => Err(Rejection::ProbeFailed(e)),
        }
    }
}
