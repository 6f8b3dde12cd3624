//! Run-wide deadline and cancellation.
//!
//! Every blocking step of a run (navigation, settle waits, disclosure rounds,
//! per-fragment extraction) goes through a [`Deadline`], so an operator can
//! bound the total run time and cancel a run from outside.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Interrupted;

/// An optional absolute expiry paired with a cancellation token.
///
/// Cloning shares the token, so cancelling any clone interrupts all of them.
#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Option<Instant>,
    budget: Duration,
    token: CancellationToken,
}

impl Deadline {
    /// A deadline that only ends by cancellation.
    pub fn unbounded() -> Self {
        Self {
            expires_at: None,
            budget: Duration::MAX,
            token: CancellationToken::new(),
        }
    }

    /// A deadline that expires `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(budget),
            budget,
            token: CancellationToken::new(),
        }
    }

    /// Use an externally owned token (e.g. one cancelled on Ctrl-C).
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Time left before expiry, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the run is already over.
    pub fn check(&self, stage: &'static str) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled { stage });
        }
        match self.expires_at {
            Some(at) if Instant::now() >= at => Err(self.exceeded(stage)),
            _ => Ok(()),
        }
    }

    /// Sleep for `duration`, waking early if the run is interrupted.
    pub async fn sleep(&self, stage: &'static str, duration: Duration) -> Result<(), Interrupted> {
        self.bound(stage, tokio::time::sleep(duration)).await
    }

    /// Race `fut` against expiry and cancellation.
    pub async fn bound<F: Future>(
        &self,
        stage: &'static str,
        fut: F,
    ) -> Result<F::Output, Interrupted> {
        self.check(stage)?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled { stage }),
            _ = expiry(self.expires_at) => Err(self.exceeded(stage)),
            out = fut => Ok(out),
        }
    }

    fn exceeded(&self, stage: &'static str) -> Interrupted {
        Interrupted::DeadlineExceeded {
            stage,
            budget: self.budget,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}

async fn expiry(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
