/// Route the front-end should show when the session can't be recovered
pub const LOGIN_ROUTE: &str = "/login";

/// Side effect run when re-authentication fails and the session is torn down.
///
/// Front-ends decide what "go to login" means: a browser navigation, a CLI
/// hint, a test counter.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self);
}

impl<F> LoginRedirect for F
where
    F: Fn() + Send + Sync,
{
    fn redirect_to_login(&self) {
        self()
    }
}

/// Redirect that does nothing. Used when no front-end is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRedirect;

impl LoginRedirect for NoRedirect {
    fn redirect_to_login(&self) {}
}
