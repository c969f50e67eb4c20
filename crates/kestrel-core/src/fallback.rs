//! Ordered fallback primitive.
//!
//! Strategies run lazily in insertion order and the first one that produces a
//! value wins. A strategy that returns `Ok(None)` found nothing; one that
//! returns `Err` failed. Both move on to the next strategy.

use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;

type Strategy<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, Result<Option<T>>> + Send + 'a>;

/// Value produced by the winning strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub strategy: String,
    /// 0-based position of the winning strategy
    pub position: usize,
}

pub struct Fallback<'a, T> {
    target: String,
    strategies: Vec<(String, Strategy<'a, T>)>,
}

impl<'a, T: Send + 'a> Fallback<'a, T> {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            strategies: Vec::new(),
        }
    }

    pub fn strategy<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<Option<T>>> + Send + 'a,
    {
        self.strategies
            .push((name.into(), Box::new(move || f().boxed())));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub async fn run(self) -> Result<Resolved<T>> {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for (position, (name, strategy)) in self.strategies.into_iter().enumerate() {
            match strategy().await {
                Ok(Some(value)) => {
                    if position > 0 {
                        tracing::info!("{}: matched using fallback '{}'", self.target, name);
                    }
                    return Ok(Resolved {
                        value,
                        strategy: name,
                        position,
                    });
                }
                Ok(None) => {
                    tracing::debug!("{}: strategy '{}' found nothing", self.target, name);
                    attempts.push(format!("{}: no match", name));
                }
                Err(e) => {
                    tracing::warn!("{}: strategy '{}' failed: {}", self.target, name, e);
                    attempts.push(format!("{}: {}", name, e));
                }
            }
        }

        Err(Error::ElementNotFound {
            target: self.target,
            attempts,
        })
    }
}
