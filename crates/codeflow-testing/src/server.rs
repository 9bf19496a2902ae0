use super::expectation::{Expectation, MockResponse, Times};
use super::matcher::{parse_form, RequestMatcher};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

type Shared = Arc<Mutex<ServerState>>;

/// A mock authorization server
///
/// Answers requests from registered expectations, later expectations taking
/// precedence, and records every request it receives. Requests no expectation
/// accepts get a `404`. The listener closes when the server is dropped.
pub struct MockServer {
    addr: SocketAddr,
    state: Shared,
    shutdown: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct ServerState {
    expectations: Vec<Expectation>,
    received: Vec<RecordedRequest>,
    unmatched: Vec<RecordedRequest>,
}

impl ServerState {
    fn answer(&mut self, request: RecordedRequest) -> Response<Full<Bytes>> {
        self.received.push(request.clone());

        let hit = self.expectations.iter_mut().rev().find(|exp| {
            exp.matcher
                .matches(&request.method, &request.path, &request.headers, &request.body)
        });

        match hit {
            Some(exp) => {
                exp.call_count += 1;
                exp.response.to_http()
            }
            None => {
                tracing::debug!(method = %request.method, path = %request.path, "unmatched mock request");
                self.unmatched.push(request);
                MockResponse::new()
                    .status(StatusCode::NOT_FOUND)
                    .body("No expectation matched")
                    .to_http()
            }
        }
    }
}

/// A request as seen by the mock server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: http::Method,
    pub path: String,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    /// The body decoded as form-urlencoded pairs
    pub fn form(&self) -> Vec<(String, String)> {
        parse_form(&self.body)
    }

    /// A single form parameter
    pub fn form_value(&self, key: &str) -> Option<String> {
        self.form()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

impl MockServer {
    /// Bind to a random local port and start serving
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let state = Shared::default();
        let (shutdown, stop) = oneshot::channel();

        tokio::spawn(accept_loop(listener, Arc::clone(&state), stop));
        tracing::debug!(%addr, "mock server listening");

        Self {
            addr,
            state,
            shutdown: Some(shutdown),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Absolute URL for `path` on this server
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Every request received, in arrival order
    pub fn received_requests(&self) -> Vec<RecordedRequest> {
        self.lock().received.clone()
    }

    /// Requests no expectation accepted
    pub fn unmatched_requests(&self) -> Vec<RecordedRequest> {
        self.lock().unmatched.clone()
    }

    /// Start an expectation; it is registered when the builder is dropped
    pub fn expect(&self, matcher: RequestMatcher) -> ExpectationBuilder {
        ExpectationBuilder {
            state: Arc::clone(&self.state),
            expectation: Some(Expectation::new(matcher)),
        }
    }

    /// Panic if any expectation saw a call count outside its budget
    pub fn verify(&self) {
        for exp in self.lock().expectations.iter() {
            assert!(
                exp.is_satisfied(),
                "Expectation {:?} expected {:?} calls, got {}",
                exp.matcher,
                exp.times,
                exp.call_count
            );
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn accept_loop(listener: TcpListener, state: Shared, mut stop: oneshot::Receiver<()>) {
    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "mock server accept error");
                    continue;
                }
            },
            _ = &mut stop => break,
        };

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, Arc::clone(&state)));
            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(error = ?err, "mock server connection error");
            }
        });
    }
}

async fn handle(
    req: Request<Incoming>,
    state: Shared,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let recorded = RecordedRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        headers: parts.headers,
        body: body.collect().await?.to_bytes(),
    };

    Ok(state.lock().unwrap().answer(recorded))
}

/// Registers its expectation when dropped
pub struct ExpectationBuilder {
    state: Shared,
    expectation: Option<Expectation>,
}

impl ExpectationBuilder {
    pub fn respond_with(mut self, response: MockResponse) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            exp.response = response;
        }
        self
    }

    pub fn times(self, n: usize) -> Self {
        self.set_times(Times::Exactly(n))
    }

    pub fn once(self) -> Self {
        self.set_times(Times::Once)
    }

    pub fn any_number(self) -> Self {
        self.set_times(Times::Any)
    }

    pub fn never(self) -> Self {
        self.set_times(Times::Exactly(0))
    }

    fn set_times(mut self, times: Times) -> Self {
        if let Some(exp) = self.expectation.as_mut() {
            exp.times = times;
        }
        self
    }
}

impl Drop for ExpectationBuilder {
    fn drop(&mut self) {
        if let Some(exp) = self.expectation.take() {
            self.state.lock().unwrap().expectations.push(exp);
        }
    }
}
