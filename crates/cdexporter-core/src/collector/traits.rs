//! Transport abstraction over the web services control API.

use crate::collector::fetch::FetchError;
use crate::collector::session::{AuthError, Session, SignOutError};

/// The three upstream calls the collector depends on.
///
/// This trait allows swapping the real HTTP client for [`MockApi`] in tests.
///
/// [`MockApi`]: crate::collector::MockApi
pub trait ControlApi {
    /// Signs on and returns a fully populated session.
    fn sign_on(&self) -> Result<Session, AuthError>;

    /// Issues one queue-status query and returns the raw response body.
    fn query_queue(&self, session: &Session) -> Result<String, FetchError>;

    /// Signs the session out.
    fn sign_out(&self, session: &Session) -> Result<(), SignOutError>;
}

impl<T: ControlApi + ?Sized> ControlApi for &T {
    fn sign_on(&self) -> Result<Session, AuthError> {
        (**self).sign_on()
    }

    fn query_queue(&self, session: &Session) -> Result<String, FetchError> {
        (**self).query_queue(session)
    }

    fn sign_out(&self, session: &Session) -> Result<(), SignOutError> {
        (**self).sign_out(session)
    }
}
