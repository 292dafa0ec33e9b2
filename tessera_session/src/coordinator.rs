use std::{
    error, fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::{AuthAuthority, SessionStore};

type SharedOutcome = Shared<BoxFuture<'static, RefreshOutcome>>;

/// The settled result of one refresh, as seen by one of its callers
///
/// Every caller of the same refresh receives a clone of the same outcome.
#[derive(Clone, Debug)]
pub struct RefreshOutcome {
    epoch: u64,
    refreshed: bool,
    claimed: Arc<AtomicBool>,
}

impl RefreshOutcome {
    /// Whether a new access token was written to the session store
    pub fn is_refreshed(&self) -> bool {
        self.refreshed
    }

    /// Identifies the refresh this outcome belongs to
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Claims the handling of a failed refresh
    ///
    /// Returns `true` for exactly one of the callers sharing a failed
    /// refresh, and always `false` for a successful one. The claiming caller
    /// is responsible for ending the session.
    pub fn claim_failure(&self) -> bool {
        !self.refreshed && !self.claimed.swap(true, Ordering::AcqRel)
    }
}

struct PendingRefresh {
    epoch: u64,
    outcome: SharedOutcome,
}

#[derive(Default)]
struct RefreshState {
    next_epoch: u64,
    pending: Option<PendingRefresh>,
}

struct Inner {
    authority: Arc<dyn AuthAuthority>,
    store: Arc<dyn SessionStore>,
    state: Mutex<RefreshState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ensures at most one refresh of the access token is in flight
///
/// Every caller that asks for a refresh while one is already running waits
/// for that refresh and observes its outcome. Once a refresh settles, the
/// next caller starts a new one.
///
/// The coordinator writes successful refreshes into the session store, but
/// leaves the handling of failed refreshes to its callers.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("RefreshCoordinator")
            .field("authority", &self.inner.authority)
            .field("store", &self.inner.store)
            .field("next_epoch", &state.next_epoch)
            .field("in_flight", &state.pending.as_ref().map(|p| p.epoch))
            .finish()
    }
}

impl RefreshCoordinator {
    /// Constructs a coordinator that refreshes from `authority` into `store`
    pub fn new(authority: Arc<dyn AuthAuthority>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                authority,
                store,
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    /// The authority tokens are refreshed from
    pub fn authority(&self) -> &Arc<dyn AuthAuthority> {
        &self.inner.authority
    }

    /// The store refreshed tokens are written to
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.state().pending.is_some()
    }

    /// Refreshes the access token, or joins the refresh already in flight
    ///
    /// Returns `true` once a new access token has been written to the session
    /// store. Every failure, including the authority not issuing a token,
    /// yields `false`.
    ///
    /// The refresh itself runs on a spawned task, so this must be called from
    /// within a Tokio runtime. Dropping the returned future does not cancel
    /// the refresh.
    pub async fn refresh(&self) -> bool {
        self.refresh_outcome().await.is_refreshed()
    }

    /// Refreshes the access token like [`refresh()`][Self::refresh()], but
    /// reports the shared outcome
    ///
    /// Callers that act on a failed refresh should use
    /// [`RefreshOutcome::claim_failure()`] so that only one of them does.
    pub async fn refresh_outcome(&self) -> RefreshOutcome {
        self.join_or_start().await
    }

    fn join_or_start(&self) -> SharedOutcome {
        let mut state = self.inner.state();

        if let Some(pending) = &state.pending {
            tracing::debug!(epoch = pending.epoch, "joining in-flight token refresh");
            return pending.outcome.clone();
        }

        let epoch = state.next_epoch;
        state.next_epoch = state.next_epoch.wrapping_add(1);

        tracing::debug!(epoch, "starting token refresh");

        // The settle guard in the task takes this lock, so it cannot clear the
        // slot before the outcome below is stored in it.
        let join = tokio::spawn(run_epoch(Arc::clone(&self.inner), epoch));

        let claimed = Arc::new(AtomicBool::new(false));
        let outcome = async move {
            let refreshed = match join.await {
                Ok(refreshed) => refreshed,
                Err(err) => {
                    if err.is_panic() {
                        tracing::error!(epoch, "token refresh panicked");
                    } else {
                        tracing::info!(epoch, "token refresh was cancelled");
                    }
                    false
                }
            };

            RefreshOutcome {
                epoch,
                refreshed,
                claimed,
            }
        }
        .boxed()
        .shared();

        state.pending = Some(PendingRefresh {
            epoch,
            outcome: outcome.clone(),
        });

        outcome
    }
}

struct SettleGuard {
    inner: Arc<Inner>,
    epoch: u64,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state();
        if state.pending.as_ref().map(|p| p.epoch) == Some(self.epoch) {
            state.pending = None;
            tracing::trace!(epoch = self.epoch, "token refresh settled");
        }
    }
}

async fn run_epoch(inner: Arc<Inner>, epoch: u64) -> bool {
    let settle = SettleGuard { inner, epoch };

    let refreshed = match settle.inner.authority.refresh().await {
        Ok(grant) => {
            let has_user = grant.user.is_some();
            settle.inner.store.establish(grant.access_token, grant.user);
            tracing::info!(epoch, has_user, "access token refreshed");
            true
        }
        Err(error) => {
            tracing::warn!(
                epoch,
                error = (&error as &dyn error::Error),
                "token refresh failed"
            );
            false
        }
    };

    // Session writes above happen before the slot is cleared.
    drop(settle);
    refreshed
}
