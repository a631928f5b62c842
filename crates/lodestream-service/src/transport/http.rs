//! Support for fetching resources from HTTP servers.

use reqwest::{Client, StatusCode, header};

use crate::caching::ResourceError;
use crate::config::TransportTimeouts;

use super::{CompletionSender, FetchCompletion, FetchRequest, Transport};

/// The user agent sent with every fetch.
pub const USER_AGENT: &str = concat!("lodestream/", env!("CARGO_PKG_VERSION"));

/// Transport implementation fetching from `http`/`https` URLs.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeouts: TransportTimeouts,
    runtime: tokio::runtime::Handle,
}

impl HttpTransport {
    /// Creates a transport with a client configured from the given timeouts.
    ///
    /// All fetches are spawned onto the given runtime; completions are
    /// delivered through the engine's channel, never inline. Fails with
    /// [`ResourceError::TransportInit`] if the client cannot be built, e.g.
    /// because the TLS backend is unavailable.
    pub fn new(
        timeouts: &TransportTimeouts,
        runtime: tokio::runtime::Handle,
    ) -> Result<Self, ResourceError> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.max_fetch)
            .build()
            .map_err(|e| ResourceError::TransportInit(e.to_string()))?;
        Ok(Self {
            client,
            timeouts: *timeouts,
            runtime,
        })
    }

    /// Creates a transport around an existing client.
    ///
    /// The timeouts are only used to report [`ResourceError::Timeout`] with
    /// the right deadline; the client is expected to enforce them itself.
    pub fn with_client(
        client: Client,
        timeouts: TransportTimeouts,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            client,
            timeouts,
            runtime,
        }
    }

    async fn fetch_payload(
        client: &Client,
        timeouts: TransportTimeouts,
        request: &FetchRequest,
    ) -> FetchCompletion {
        tracing::debug!("Fetching resource from `{}`", request.url);

        let builder = client
            .get(request.url.clone())
            .header(header::USER_AGENT, USER_AGENT);

        let to_error = |e: reqwest::Error| {
            if e.is_timeout() {
                ResourceError::Timeout(timeouts.max_fetch)
            } else {
                ResourceError::download_error(&e)
            }
        };

        let outcome = async {
            let response = builder.send().await.map_err(to_error)?;
            match response.status() {
                StatusCode::OK => Ok(response.bytes().await.map_err(to_error)?),
                StatusCode::NOT_FOUND => Err(ResourceError::NotFound),
                status if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED => {
                    let details = response.text().await.unwrap_or_default();
                    Err(ResourceError::PermissionDenied(details))
                }
                status => Err(ResourceError::Status(status.as_u16())),
            }
        }
        .await;

        if let Err(err) = &outcome {
            tracing::debug!("Resource `{}` fetch failed: {}", request.path, err);
        } else {
            tracing::debug!("Resource `{}` fetched successfully", request.path);
        }

        FetchCompletion {
            path: request.path.clone(),
            generation: request.generation,
            outcome,
        }
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, request: FetchRequest, completions: CompletionSender) {
        let client = self.client.clone();
        let timeouts = self.timeouts;
        self.runtime.spawn(async move {
            let completion = Self::fetch_payload(&client, timeouts, &request).await;
            // The engine may have been torn down while the fetch was in
            // flight; there is nobody left to notify then.
            completions.send(completion).ok();
        });
    }
}
