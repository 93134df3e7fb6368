//! In-memory [`HttpTransport`] that replays scripted responses.
//!
//! Used to exercise the whole stack (OAuth client, gateway, mail client,
//! services) without a network. Responses are matched by method and URL
//! substring first, then taken from a FIFO queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::transport::{ApiRequest, ApiResponse, HttpTransport, Method};
use crate::error::{Error, Result};

struct Route {
    method: Method,
    url_contains: String,
    responses: VecDeque<Result<ApiResponse>>,
    sticky: Option<Result<ApiResponse>>,
}

/// Scripted transport; see the module docs.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    queue: Mutex<VecDeque<Result<ApiResponse>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    /// Creates a transport with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next unrouted request.
    pub fn push(&self, response: ApiResponse) {
        lock(&self.queue).push_back(Ok(response));
    }

    /// Queues a transport failure for the next unrouted request.
    pub fn push_error(&self, error: Error) {
        lock(&self.queue).push_back(Err(error));
    }

    /// Answers the next matching request once with `response`.
    ///
    /// Several one-shot responses on the same route are served in order.
    pub fn once(&self, method: Method, url_contains: &str, response: ApiResponse) {
        self.route(method, url_contains).responses.push_back(Ok(response));
    }

    /// Fails the next matching request once with `error`.
    pub fn once_error(&self, method: Method, url_contains: &str, error: Error) {
        self.route(method, url_contains).responses.push_back(Err(error));
    }

    /// Answers every matching request with `response` once one-shot
    /// responses on that route are used up.
    pub fn always(&self, method: Method, url_contains: &str, response: ApiResponse) {
        self.route(method, url_contains).sticky = Some(Ok(response));
    }

    /// Every request executed so far, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.requests).clone()
    }

    /// Number of requests executed so far.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Requests whose URL contains `url_contains`.
    pub fn requests_to(&self, method: Method, url_contains: &str) -> Vec<ApiRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.method == method && r.url.contains(url_contains))
            .cloned()
            .collect()
    }

    fn route(&self, method: Method, url_contains: &str) -> RouteGuard<'_> {
        let mut routes = lock(&self.routes);
        let index = match routes
            .iter()
            .position(|r| r.method == method && r.url_contains == url_contains)
        {
            Some(index) => index,
            None => {
                routes.push(Route {
                    method,
                    url_contains: url_contains.to_string(),
                    responses: VecDeque::new(),
                    sticky: None,
                });
                routes.len() - 1
            }
        };
        RouteGuard { routes, index }
    }

    fn next_response(&self, request: &ApiRequest) -> Result<ApiResponse> {
        {
            let mut routes = lock(&self.routes);
            // Longest pattern wins so specific routes shadow general ones.
            let mut candidates: Vec<&mut Route> = routes
                .iter_mut()
                .filter(|r| r.method == request.method && request.url.contains(&r.url_contains))
                .collect();
            candidates.sort_by(|a, b| b.url_contains.len().cmp(&a.url_contains.len()));
            for route in candidates {
                if let Some(response) = route.responses.pop_front() {
                    return response;
                }
                if let Some(sticky) = &route.sticky {
                    return sticky.clone();
                }
            }
        }

        lock(&self.queue).pop_front().unwrap_or_else(|| {
            Err(Error::Network(format!(
                "no scripted response for {:?} {}",
                request.method, request.url
            )))
        })
    }
}

struct RouteGuard<'a> {
    routes: MutexGuard<'a, Vec<Route>>,
    index: usize,
}

impl std::ops::Deref for RouteGuard<'_> {
    type Target = Route;

    fn deref(&self) -> &Route {
        &self.routes[self.index]
    }
}

impl std::ops::DerefMut for RouteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Route {
        &mut self.routes[self.index]
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let response = self.next_response(&request);
        lock(&self.requests).push(request);
        response
    }
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("requests", &self.request_count())
            .finish_non_exhaustive()
    }
}
