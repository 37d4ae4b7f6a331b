use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info};

use crate::acme::error::{AcmeError, AcmeResult};
use crate::acme::jws::Jwk;
use crate::acme::transport::{Body, Response, Transport};
use crate::acme::types::{
    Directory, RESOURCE_NEW_AUTHZ, RESOURCE_NEW_CERT, RESOURCE_NEW_REG, RESOURCE_REG,
    agreement_request, authorization_request, certificate_request, challenge_response,
    registration_request,
};
use crate::encode::tos_link_from_link_header;

// Backoff shared by both pollers: the factor doubles until it passes the
// ceiling, so a perpetually pending resource is probed at most eight times.
const POLL_MAX_FACTOR: u32 = 128;

/// Engine tuning consumed by [`AcmeClient`].
#[derive(Debug, Clone)]
pub struct AcmeSettings {
    pub directory_url: String,
    pub days_valid: i64,
    pub poll_base_delay_ms: u64,
}

/// Stateful driver of the ACME conversation. Owns the directory, the
/// registration link, the terms-of-service link, and the server-confirmed
/// account public key; the transport owns the nonce.
pub struct AcmeClient<T: Transport> {
    pub(crate) transport: T,
    settings: AcmeSettings,
    directory: Option<Directory>,
    reg_link: Option<String>,
    tos_link: Option<String>,
    profile_key: Option<Jwk>,
}

impl<T: Transport> AcmeClient<T> {
    pub fn new(transport: T, settings: AcmeSettings) -> Self {
        Self {
            transport,
            settings,
            directory: None,
            reg_link: None,
            tos_link: None,
            profile_key: None,
        }
    }

    pub fn reg_link(&self) -> Option<&str> {
        self.reg_link.as_deref()
    }

    pub fn tos_link(&self) -> Option<&str> {
        self.tos_link.as_deref()
    }

    /// The account public key as mirrored back by the server.
    pub fn profile_key(&self) -> Option<&Jwk> {
        self.profile_key.as_ref()
    }

    /// Fetches the directory document and replaces the cache.
    ///
    /// # Errors
    /// Returns an error if the request fails or the document is not a JSON
    /// object.
    pub async fn get_directory(&mut self) -> AcmeResult<()> {
        info!("fetching directory from {}", self.settings.directory_url);
        let url = self.settings.directory_url.clone();
        let resp = self.transport.get(&url).await?;
        if !resp.is_ok() {
            return Err(resp.status_error());
        }
        self.directory = Some(Directory::from_json(resp.json()?)?);
        Ok(())
    }

    async fn ensure_directory(&mut self) -> AcmeResult<()> {
        if self.directory.is_none() {
            self.get_directory().await?;
        }
        Ok(())
    }

    fn directory_url(&self, resource: &str) -> AcmeResult<String> {
        self.directory
            .as_ref()
            .ok_or(AcmeError::Protocol("directory not loaded"))?
            .url(resource)
            .map(str::to_string)
    }

    /// POSTs to `new-reg`, forcing `resource = "new-reg"` on the payload.
    /// Serves both as account creation and as a probe for the account URL.
    ///
    /// # Errors
    /// Returns an error if the directory or the request fails.
    pub async fn new_registration(&mut self, payload: Option<Value>) -> AcmeResult<Response> {
        self.ensure_directory().await?;
        let url = self.directory_url(RESOURCE_NEW_REG)?;
        let mut payload = payload.unwrap_or_else(|| json!({}));
        payload["resource"] = json!(RESOURCE_NEW_REG);
        let resp = self.transport.post(&url, &payload).await?;
        if let Some(location) = &resp.location {
            debug!(%location, "registration link");
            self.reg_link = Some(location.clone());
        }
        Ok(resp)
    }

    /// POSTs to the registration URL, forcing `resource = "reg"`. Caches the
    /// mirrored account key from the body and refreshes the terms-of-service
    /// link from the `link` header (clearing it when absent).
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn get_registration(&mut self, uri: &str, mut payload: Value) -> AcmeResult<Response> {
        payload["resource"] = json!(RESOURCE_REG);
        let resp = self.transport.post(uri, &payload).await?;

        if let Body::Json(body) = &resp.body
            && let Some(key) = body.get("key")
            && let Ok(jwk) = serde_json::from_value::<Jwk>(key.clone())
        {
            self.profile_key = Some(jwk);
        }
        self.tos_link = resp
            .link
            .as_deref()
            .and_then(tos_link_from_link_header);
        debug!(tos_link = ?self.tos_link, "terms-of-service link");
        Ok(resp)
    }

    /// Discovers the account URL and fetches the registration profile.
    ///
    /// # Errors
    /// Returns an error if any step of the sequence fails or no account URL
    /// is advertised.
    pub async fn get_profile(&mut self) -> AcmeResult<Value> {
        self.ensure_directory().await?;
        let probe = self.new_registration(None).await?;
        let reg_link = probe
            .location
            .ok_or(AcmeError::MissingHeader("location"))?;
        let resp = self.get_registration(&reg_link, json!({})).await?;
        if !resp.is_ok() {
            return Err(resp.status_error());
        }
        Ok(resp.json()?.clone())
    }

    /// Registers a new account for `email` and returns the account URL.
    ///
    /// # Errors
    /// Returns an error unless the server answers 201 Created with a
    /// `location` header.
    pub async fn create_account(&mut self, email: &str) -> AcmeResult<String> {
        self.ensure_directory().await?;
        info!("registering account for {email}");
        let resp = self.new_registration(Some(registration_request(email))).await?;
        if resp.status != 201 {
            return Err(resp.status_error());
        }
        resp.location.ok_or(AcmeError::MissingHeader("location"))
    }

    /// Records agreement with the terms of service on the registration.
    ///
    /// # Errors
    /// Returns an error if no registration link is cached or the request
    /// fails.
    pub async fn agree_tos(&mut self, tos_link: &str) -> AcmeResult<Response> {
        let reg_link = self
            .reg_link
            .clone()
            .ok_or(AcmeError::Protocol("no registration link cached"))?;
        info!("agreeing to terms of service at {tos_link}");
        self.get_registration(&reg_link, agreement_request(tos_link)).await
    }

    /// Requests a new authorization for a DNS identifier.
    ///
    /// # Errors
    /// Returns an error if the directory or the request fails.
    pub async fn new_authorization(&mut self, domain: &str) -> AcmeResult<Response> {
        self.ensure_directory().await?;
        let url = self.directory_url(RESOURCE_NEW_AUTHZ)?;
        info!("requesting authorization for {domain}");
        let payload = authorization_request(domain);
        self.transport.post(&url, &payload).await
    }

    /// Tells the server the challenge response is in place.
    ///
    /// # Errors
    /// Returns an error if the request fails or is rejected.
    pub async fn accept_challenge(
        &mut self,
        challenge_uri: &str,
        key_authorization: &str,
    ) -> AcmeResult<Response> {
        info!("accepting challenge at {challenge_uri}");
        let payload = challenge_response(key_authorization);
        let resp = self.transport.post(challenge_uri, &payload).await?;
        if !resp.is_ok() {
            return Err(resp.status_error());
        }
        Ok(resp)
    }

    /// Submits a CSR to `new-cert` and obtains the certificate bytes, either
    /// inline or by polling the issuance URL.
    ///
    /// # Errors
    /// Returns an error if the request fails, the server rejects the CSR, or
    /// issuance polling gives up.
    pub async fn request_signing(&mut self, csr_der: &[u8]) -> AcmeResult<Vec<u8>> {
        self.ensure_directory().await?;
        let url = self.directory_url(RESOURCE_NEW_CERT)?;
        info!("submitting certificate request");
        let payload = certificate_request(csr_der, self.settings.days_valid)?;
        let resp = self.transport.post(&url, &payload).await?;
        let accepted = resp.is_ok();
        let failure = resp.status_error();
        let location = resp.location.clone();
        match resp.body {
            Body::Bytes(bytes) if !bytes.is_empty() => Ok(bytes),
            Body::Empty if accepted => {
                let location = location.ok_or(AcmeError::MissingHeader("location"))?;
                info!("certificate not ready, polling {location}");
                self.poll_until_issued(&location).await
            }
            _ => Err(failure),
        }
    }

    /// Polls an authorization URL until its status leaves `pending`, with
    /// doubling backoff, returning the final object.
    ///
    /// # Errors
    /// Returns an error on transport failure, a non-object response, or when
    /// the retry ceiling is reached.
    pub async fn poll_until_valid(&mut self, uri: &str) -> AcmeResult<Value> {
        let mut factor: u32 = 1;
        while factor <= POLL_MAX_FACTOR {
            self.poll_sleep(factor).await;
            let resp = self.transport.get(uri).await?;
            match &resp.body {
                Body::Json(value) if value.is_object() => {
                    if value.get("status").and_then(Value::as_str) == Some("pending") {
                        debug!(factor, "authorization still pending");
                        factor *= 2;
                    } else {
                        return Ok(value.clone());
                    }
                }
                _ => {
                    return Err(AcmeError::Protocol(
                        "authorization poll returned a non-object body",
                    ));
                }
            }
        }
        Err(AcmeError::PollTimeout)
    }

    /// Polls an issuance URL until certificate bytes appear, with doubling
    /// backoff.
    ///
    /// # Errors
    /// Returns an error on transport failure, an error status, or when the
    /// retry ceiling is reached.
    pub async fn poll_until_issued(&mut self, uri: &str) -> AcmeResult<Vec<u8>> {
        let mut factor: u32 = 1;
        while factor <= POLL_MAX_FACTOR {
            self.poll_sleep(factor).await;
            let resp = self.transport.get(uri).await?;
            let pending = resp.is_ok();
            let failure = resp.status_error();
            match resp.body {
                Body::Bytes(bytes) if !bytes.is_empty() => return Ok(bytes),
                _ if pending => {
                    debug!(factor, "certificate still pending");
                    factor *= 2;
                }
                _ => return Err(failure),
            }
        }
        Err(AcmeError::PollTimeout)
    }

    async fn poll_sleep(&self, factor: u32) {
        let delay = self.settings.poll_base_delay_ms * u64::from(factor);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
