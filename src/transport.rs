//! The narrow interfaces a transport provider implements, plus the plain
//! request/response values passed across them.
use crate::client::Resolution;
use crate::Error;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// In-flight transport work.
///
/// The listener must be called at most once. Implementations should drop a
/// pending listener when cancelled; a listener that still fires after
/// [`cancel`](WorkHandle::cancel) is ignored by the promise.
pub trait WorkHandle: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn start_completion_listener(
        &self,
        listener: Box<dyn FnOnce(Result<Self::Output, Error>) + Send>,
    );

    fn cancel(&self);
}

impl<T: WorkHandle> WorkHandle for Arc<T> {
    type Output = T::Output;

    fn start_completion_listener(
        &self,
        listener: Box<dyn FnOnce(Result<Self::Output, Error>) + Send>,
    ) {
        (**self).start_completion_listener(listener)
    }

    fn cancel(&self) {
        (**self).cancel()
    }
}

/// A completed transport exchange.
pub trait Response {
    fn status(&self) -> u16;
    fn body(&self) -> &[u8];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

impl Response for HttpResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn body(&self) -> &[u8] {
        &self.body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        })
    }
}

/// A unit of work described before its dependency is known.
///
/// `path` is either relative to the dependency's base URL or already
/// absolute. `url` is empty until the client resolves the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            url: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a header, replacing any existing value (names compare
    /// case-insensitively).
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The lower-cased host of the resolved URL, without port or userinfo.
    pub fn host(&self) -> Option<String> {
        host_of(&self.url)
    }

    pub fn is_secure(&self) -> bool {
        scheme_of(&self.url).is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"))
    }

    /// Resolves `path` against `base`, storing the absolute URL in `url`.
    pub(crate) fn resolve_target(&mut self, base: &str) -> Result<(), Error> {
        let url = if scheme_of(&self.path).is_some() {
            self.path.clone()
        } else {
            if scheme_of(base).is_none() {
                return Err(Error::MalformedTarget(format!(
                    "base url {base:?} has no scheme"
                )));
            }
            match (base.ends_with('/'), self.path.starts_with('/')) {
                (true, true) => format!("{base}{}", &self.path[1..]),
                (false, false) if !self.path.is_empty() => format!("{base}/{}", self.path),
                _ => format!("{base}{}", self.path),
            }
        };
        if url.chars().any(char::is_whitespace) {
            return Err(Error::MalformedTarget(format!("{url:?} contains whitespace")));
        }
        if host_of(&url).is_none() {
            return Err(Error::MalformedTarget(format!("{url:?} has no host")));
        }
        self.url = url;
        Ok(())
    }
}

fn scheme_of(url: &str) -> Option<&str> {
    let (scheme, _) = url.split_once("://")?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

fn host_of(url: &str) -> Option<String> {
    scheme_of(url)?;
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = match host_port.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or_default(),
        None => host_port.split(':').next().unwrap_or_default(),
    };
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

/// A resolved dependency that knows where relative work is sent.
pub trait Dependency: Clone + Send + Sync + 'static {
    fn base_url(&self) -> &str;
}

/// Produces the dependency for a client.
///
/// Each call to [`resolve`](DependencyResolver::resolve) must eventually
/// complete the [`Resolution`] exactly once; dropping it counts as a failure.
pub trait DependencyResolver: Send + Sync + 'static {
    type Dependency: Dependency;
    /// Opaque context handed to the resolver by whoever triggered the update.
    type Update: Send + 'static;

    fn resolve(&self, update: Self::Update, resolution: Resolution<Self::Dependency>);
}

pub trait Deserializer<M> {
    fn deserialize(&self, payload: &[u8]) -> Result<M, Error>;
}

impl<M, F> Deserializer<M> for F
where
    F: Fn(&[u8]) -> Result<M, Error>,
{
    fn deserialize(&self, payload: &[u8]) -> Result<M, Error> {
        self(payload)
    }
}

/// Decodes JSON payloads with `serde_json`.
pub struct Json<M>(PhantomData<fn() -> M>);

impl<M> Json<M> {
    pub fn new() -> Self {
        Json(PhantomData)
    }
}

impl<M> Default for Json<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for Json<M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for Json<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Json")
    }
}

impl<M: DeserializeOwned> Deserializer<M> for Json<M> {
    fn deserialize(&self, payload: &[u8]) -> Result<M, Error> {
        serde_json::from_slice(payload).map_err(|e| Error::DecodeFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_relative_paths() {
        let mut request = Request::get("/users/1");
        request.resolve_target("https://api.example.com/").unwrap();
        assert_eq!(request.url, "https://api.example.com/users/1");

        let mut request = Request::get("users");
        request.resolve_target("https://api.example.com/v2").unwrap();
        assert_eq!(request.url, "https://api.example.com/v2/users");
    }

    #[test]
    fn absolute_paths_ignore_the_base() {
        let mut request = Request::get("http://other.example.org/x");
        request.resolve_target("https://api.example.com").unwrap();
        assert_eq!(request.host().as_deref(), Some("other.example.org"));
        assert!(!request.is_secure());
    }

    #[test]
    fn rejects_unusable_targets() {
        let mut request = Request::get("/x");
        assert!(matches!(
            request.resolve_target("api.example.com"),
            Err(Error::MalformedTarget(_))
        ));
        let mut request = Request::get("/a b");
        assert!(matches!(
            request.resolve_target("https://api.example.com"),
            Err(Error::MalformedTarget(_))
        ));
        let mut request = Request::get("https:///nohost");
        assert!(matches!(
            request.resolve_target("https://api.example.com"),
            Err(Error::MalformedTarget(_))
        ));
    }

    #[test]
    fn host_strips_port_and_userinfo() {
        assert_eq!(
            host_of("https://user:pw@API.Example.com:8443/x").as_deref(),
            Some("api.example.com")
        );
        assert_eq!(host_of("http://[::1]:80/").as_deref(), Some("::1"));
    }

    #[test]
    fn headers_are_case_insensitive() {
        let mut request = Request::get("/").with_header("Accept", "text/plain");
        request.set_header("accept", "application/json");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("ACCEPT"), Some("application/json"));
    }

    #[test]
    fn json_decode_errors_are_decode_failures() {
        let json = Json::<Vec<u32>>::new();
        assert_eq!(json.deserialize(b"[1,2]").unwrap(), vec![1, 2]);
        assert!(matches!(json.deserialize(b"{"), Err(Error::DecodeFailed(_))));
    }
}
