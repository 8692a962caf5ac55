//! Authentication strategies applied to requests right before dispatch.
use crate::transport::Request;
use crate::Error;
use std::fmt;

/// Decorates a request with credentials derived from the dependency.
pub trait Authenticator<D>: Send + Sync {
    /// Whether this request should be authenticated at all.
    fn applies_to(&self, _request: &Request) -> bool {
        true
    }

    fn authenticate(&self, request: &mut Request, dependency: &D) -> Result<(), Error>;
}

/// Sets a fixed header, such as an API key.
#[derive(Clone)]
pub struct StaticHeader {
    name: String,
    value: String,
}

impl StaticHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for StaticHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticHeader")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl<D> Authenticator<D> for StaticHeader {
    fn authenticate(&self, request: &mut Request, _dependency: &D) -> Result<(), Error> {
        request.set_header(self.name.clone(), self.value.clone());
        Ok(())
    }
}

/// Sends `Authorization: Bearer <token>` with the token taken from the
/// dependency. A dependency without a token fails the request with
/// [`Error::DependencyUnresolved`].
pub struct Bearer<F> {
    token: F,
    secure_only: bool,
}

impl<F> Bearer<F> {
    pub fn new(token: F) -> Self {
        Self {
            token,
            secure_only: false,
        }
    }

    /// Only attach the token to `https` requests.
    pub fn secure_only(mut self) -> Self {
        self.secure_only = true;
        self
    }
}

impl<F> fmt::Debug for Bearer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bearer")
            .field("secure_only", &self.secure_only)
            .finish_non_exhaustive()
    }
}

impl<D, F> Authenticator<D> for Bearer<F>
where
    F: Fn(&D) -> Option<String> + Send + Sync,
{
    fn applies_to(&self, request: &Request) -> bool {
        !self.secure_only || request.is_secure()
    }

    fn authenticate(&self, request: &mut Request, dependency: &D) -> Result<(), Error> {
        let token = (self.token)(dependency).ok_or(Error::DependencyUnresolved)?;
        request.set_header("Authorization", format!("Bearer {token}"));
        Ok(())
    }
}
