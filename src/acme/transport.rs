use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use tracing::debug;

use crate::acme::error::{AcmeError, AcmeResult};
use crate::acme::jws::{AccountKey, create_jws};

const CONTENT_TYPE_JOSE: &str = "application/jose";
const HEADER_REPLAY_NONCE: &str = "replay-nonce";
const HEADER_LOCATION: &str = "location";
const HEADER_LINK: &str = "link";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response body, classified from `content-type` and length at parse time.
#[derive(Debug, Clone)]
pub enum Body {
    Json(Value),
    Bytes(Vec<u8>),
    Empty,
}

/// What the engine needs from an HTTP exchange: status, the two headers the
/// protocol consumes, and the classified body. The replay nonce never leaves
/// the transport.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub location: Option<String>,
    pub link: Option<String>,
    pub body: Body,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status < 400
    }

    /// The `detail` field of a JSON problem body, when present.
    pub fn detail(&self) -> Option<&str> {
        match &self.body {
            Body::Json(value) => value.get("detail")?.as_str(),
            _ => None,
        }
    }

    pub fn status_error(&self) -> AcmeError {
        AcmeError::Status {
            status: self.status,
            detail: self.detail().map(str::to_string),
        }
    }

    pub fn json(&self) -> AcmeResult<&Value> {
        match &self.body {
            Body::Json(value) => Ok(value),
            _ => Err(AcmeError::Protocol("expected a JSON response body")),
        }
    }
}

/// The capability set the protocol engine is parameterized over.
#[async_trait]
pub trait Transport: Send {
    async fn get(&mut self, url: &str) -> AcmeResult<Response>;

    /// Signs `payload` as a JWS over the cached nonce and POSTs it.
    async fn post(&mut self, url: &str, payload: &Value) -> AcmeResult<Response>;
}

/// Production transport: reqwest over rustls, holding the account key and
/// the single cached replay nonce.
pub struct HttpsTransport {
    client: Client,
    key: AccountKey,
    nonce: Option<String>,
}

impl HttpsTransport {
    /// Builds the HTTPS client around the account key.
    ///
    /// # Errors
    /// Returns an error if the underlying client cannot be constructed.
    pub fn new(key: AccountKey) -> AcmeResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(AcmeError::transport)?;
        Ok(Self {
            client,
            key,
            nonce: None,
        })
    }

    pub fn account_jwk(&self) -> &crate::acme::jws::Jwk {
        self.key.jwk()
    }

    async fn read_response(
        resp: reqwest::Response,
    ) -> AcmeResult<(Response, Option<String>)> {
        let status = resp.status().as_u16();
        let headers = resp.headers();
        let nonce = header_string(headers, HEADER_REPLAY_NONCE);
        let location = header_string(headers, HEADER_LOCATION);
        let link = header_string(headers, HEADER_LINK);
        let is_json = header_string(headers, CONTENT_TYPE.as_str())
            .is_some_and(|value| value.contains("json"));

        let bytes = resp.bytes().await.map_err(AcmeError::transport)?;
        debug!(status, ?location, ?link, body_len = bytes.len(), "response");

        let body = if bytes.is_empty() {
            Body::Empty
        } else if is_json {
            let value = serde_json::from_slice(&bytes)
                .map_err(|source| AcmeError::Decode { status, source })?;
            debug!(body = %value, "response json");
            Body::Json(value)
        } else {
            Body::Bytes(bytes.to_vec())
        };

        Ok((
            Response {
                status,
                location,
                link,
                body,
            },
            nonce,
        ))
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn get(&mut self, url: &str) -> AcmeResult<Response> {
        debug!(%url, "GET");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(AcmeError::transport)?;
        let (response, nonce) = Self::read_response(resp).await?;
        if let Some(nonce) = nonce {
            self.nonce = Some(nonce);
        }
        Ok(response)
    }

    async fn post(&mut self, url: &str, payload: &Value) -> AcmeResult<Response> {
        let token = create_jws(payload, self.nonce.as_deref(), &self.key)?;
        debug!(%url, payload = %payload, "POST");
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, CONTENT_TYPE_JOSE)
            .body(token)
            .send()
            .await
            .map_err(AcmeError::transport)?;
        let (response, nonce) = Self::read_response(resp).await?;
        // The consumed nonce is spent either way; only a fresh one replaces it.
        self.nonce = nonce;
        Ok(response)
    }
}
