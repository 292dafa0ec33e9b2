use std::fmt;

/// Sends the user back to log in after their session has ended
///
/// Navigation is fire-and-forget; the executor does not wait on or
/// inspect its result.
pub trait LoginNavigator: fmt::Debug + Send + Sync {
    /// Directs the user to the login entry point
    fn navigate_to_login(&self);
}

/// A navigator that only records that login is required
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNavigator;

impl LoginNavigator for TracingNavigator {
    fn navigate_to_login(&self) {
        tracing::warn!("session ended, user must log in again");
    }
}

/// A navigator that invokes a callback
#[derive(Clone)]
pub struct FnNavigator<F> {
    navigate: F,
}

impl<F> FnNavigator<F>
where
    F: Fn() + Send + Sync,
{
    /// Constructs a navigator from a callback
    pub fn new(navigate: F) -> Self {
        Self { navigate }
    }
}

impl<F> fmt::Debug for FnNavigator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNavigator").finish_non_exhaustive()
    }
}

impl<F> LoginNavigator for FnNavigator<F>
where
    F: Fn() + Send + Sync,
{
    fn navigate_to_login(&self) {
        (self.navigate)()
    }
}
