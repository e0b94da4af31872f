use crate::http::{request::Request, response::Response, types::Method};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

/// Application code that turns a [`Request`] into a [`Response`].
///
/// `&self` is shared by every connection, so keep per-request state on the
/// stack and shared state behind the usual `Arc`/locks.
///
/// An `Err` becomes a `500 Internal Server Error` carrying a correlation
/// number that also appears in the error log. Limit violations and socket
/// failures from reading the body are the exception: they close the
/// connection instead.
///
/// # Examples
///
/// ```
/// use hearth_web::{Endpoint, Request, Response};
///
/// struct Greeter {
///     greeting: String,
/// }
///
/// impl Endpoint for Greeter {
///     async fn handle(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
///         let name = request.path().query().get("name").cloned().unwrap_or_default();
///         Ok(Response::html_ok(format!("<p>{} {name}</p>", self.greeting)))
///     }
/// }
/// ```
pub trait Endpoint: Send + Sync + 'static {
    fn handle(
        &self,
        request: &mut Request<'_>,
    ) -> impl Future<Output = anyhow::Result<Response>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe face of [`Endpoint`], so one router can hold many types.
pub(crate) trait DynEndpoint: Send + Sync {
    fn call<'a>(&'a self, request: &'a mut Request<'_>) -> BoxFuture<'a, anyhow::Result<Response>>;
}

impl<E: Endpoint> DynEndpoint for E {
    fn call<'a>(&'a self, request: &'a mut Request<'_>) -> BoxFuture<'a, anyhow::Result<Response>> {
        Box::pin(self.handle(request))
    }
}

/// Runs after every dispatched request, just before the response is sent.
///
/// Receives the request and the response produced for it (including the
/// `404` for unknown paths and the `500` for failed endpoints) and returns
/// the response to send.
pub type LastMinute = Arc<dyn Fn(&Request<'_>, Response) -> Response + Send + Sync>;

/// A registered endpoint and the path it was registered under.
pub struct Route {
    path: String,
    prefix: bool,
    endpoint: Arc<dyn DynEndpoint>,
}

impl Route {
    /// The registered path, lowercased and without a leading `/`.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn is_prefix(&self) -> bool {
        self.prefix
    }

    pub(crate) async fn call(&self, request: &mut Request<'_>) -> anyhow::Result<Response> {
        self.endpoint.call(request).await
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Method and path lookup for endpoints.
///
/// Paths are matched without case and without their leading `/`. An exact
/// registration wins; otherwise the longest registered prefix the path starts
/// with. `HEAD` requests resolve to the `GET` endpoints.
#[derive(Default, Debug)]
pub struct Router {
    exact: HashMap<(Method, String), Route>,
    prefixes: Vec<(Method, Route)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `endpoint` for exactly `path`, replacing an earlier one.
    pub fn route<E: Endpoint>(&mut self, method: Method, path: &str, endpoint: E) -> &mut Self {
        let path = normalize(path);
        let route = Route {
            path: path.clone(),
            prefix: false,
            endpoint: Arc::new(endpoint),
        };

        if self.exact.insert((method, path), route).is_some() {
            tracing::debug!("replaced an endpoint registered twice");
        }
        self
    }

    /// Registers `endpoint` for every path starting with `prefix`.
    pub fn route_prefix<E: Endpoint>(&mut self, method: Method, prefix: &str, endpoint: E) -> &mut Self {
        let route = Route {
            path: normalize(prefix),
            prefix: true,
            endpoint: Arc::new(endpoint),
        };

        self.prefixes.retain(|(m, r)| !(*m == method && r.path == route.path));
        self.prefixes.push((method, route));
        // longest first, so the first hit is the best one
        self.prefixes
            .sort_by(|(_, a), (_, b)| b.path.len().cmp(&a.path.len()));
        self
    }

    /// Finds the endpoint for a request.
    pub fn resolve(&self, method: Method, path: &str) -> Option<&Route> {
        let method = match method {
            Method::Head => Method::Get,
            other => other,
        };
        let path = normalize(path);
        tracing::trace!("seeking an endpoint for {method} {path}");

        if let Some(route) = self.exact.get(&(method, path.clone())) {
            return Some(route);
        }

        self.prefixes
            .iter()
            .find(|(m, route)| *m == method && path.starts_with(&route.path))
            .map(|(_, route)| route)
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[inline]
fn normalize(path: &str) -> String {
    path.strip_prefix('/').unwrap_or(path).to_ascii_lowercase()
}
