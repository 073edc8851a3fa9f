use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use stampede_core::prelude::TransportError;
use stampede_runner::prelude::{
    HttpRequest, HttpResponse, Method, RunnerContext, StampedeResult, Transport,
};

/// [Transport] backed by a pooled [reqwest::Client].
///
/// One client is shared by every virtual user, so connections to the service under test are
/// reused across users and iterations.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stampede/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url.as_str());
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let mut out = HttpResponse::new(response.status().as_u16());
        for (name, value) in response.headers() {
            match value.to_str() {
                Ok(value) => out = out.with_header(name.as_str(), value),
                Err(_) => log::trace!("Skipping non-text header {} from {}", name, request.url),
            }
        }
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        Ok(out.with_body(body))
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                after: self.timeout,
            }
        } else if e.is_connect() {
            TransportError::Connect {
                detail: error_chain(&e),
            }
        } else {
            TransportError::Request {
                detail: error_chain(&e),
            }
        }
    }
}

impl Transport for HttpClient {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        self.execute(request).boxed()
    }
}

/// Build the [HttpClient] for a run, using the run's request timeout.
///
/// Pass this to `ScenarioDefinitionBuilder::use_transport`.
pub fn http_transport(ctx: &RunnerContext) -> StampedeResult<Arc<dyn Transport>> {
    Ok(Arc::new(HttpClient::new(ctx.request_timeout())?))
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

// reqwest's own message is terse, the cause usually says what actually went wrong.
fn error_chain(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
