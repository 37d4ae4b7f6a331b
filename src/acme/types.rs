use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::acme::error::{AcmeError, AcmeResult};
use crate::encode::b64url;

pub const RESOURCE_NEW_REG: &str = "new-reg";
pub const RESOURCE_NEW_AUTHZ: &str = "new-authz";
pub const RESOURCE_NEW_CERT: &str = "new-cert";
pub const RESOURCE_REG: &str = "reg";
pub const RESOURCE_CHALLENGE: &str = "challenge";

pub const CHALLENGE_HTTP01: &str = "http-01";

/// Resource-name to URL mapping served at the directory endpoint.
#[derive(Debug, Clone, Default)]
pub struct Directory(BTreeMap<String, String>);

impl Directory {
    /// Builds a directory from the JSON document served by the CA.
    ///
    /// # Errors
    /// Returns an error if the document is not a JSON object.
    pub fn from_json(value: &Value) -> AcmeResult<Self> {
        let object = value
            .as_object()
            .ok_or(AcmeError::Protocol("directory response is not a JSON object"))?;
        let entries = object
            .iter()
            .filter_map(|(name, url)| Some((name.clone(), url.as_str()?.to_string())))
            .collect();
        Ok(Self(entries))
    }

    /// Resolves the URL for a resource name.
    ///
    /// # Errors
    /// Returns an error if the directory does not advertise the resource.
    pub fn url(&self, resource: &str) -> AcmeResult<&str> {
        self.0
            .get(resource)
            .map(String::as_str)
            .ok_or_else(|| AcmeError::MissingResource(resource.to_string()))
    }
}

/// One challenge offered inside an authorization object.
#[derive(Debug, Deserialize, Clone)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
    pub token: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizationBody {
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    pub status: Option<String>,
}

impl AuthorizationBody {
    pub fn http01_challenge(&self) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|challenge| challenge.kind == CHALLENGE_HTTP01)
    }
}

pub fn registration_request(email: &str) -> Value {
    json!({
        "resource": RESOURCE_NEW_REG,
        "contact": [format!("mailto:{email}")],
    })
}

// The capitalized field name is what the targeted draft expects.
pub fn agreement_request(tos_link: &str) -> Value {
    json!({
        "resource": RESOURCE_REG,
        "Agreement": tos_link,
    })
}

pub fn authorization_request(domain: &str) -> Value {
    json!({
        "resource": RESOURCE_NEW_AUTHZ,
        "identifier": { "type": "dns", "value": domain },
    })
}

pub fn challenge_response(key_authorization: &str) -> Value {
    json!({
        "resource": RESOURCE_CHALLENGE,
        "keyAuthorization": key_authorization,
    })
}

/// Builds the `new-cert` payload: base64url CSR plus the requested validity
/// window. A zero day count falls back to one day; negatives use the
/// absolute value.
///
/// # Errors
/// Returns an error if the timestamps cannot be formatted.
pub fn certificate_request(csr_der: &[u8], days_valid: i64) -> AcmeResult<Value> {
    let days = if days_valid == 0 { 1 } else { days_valid.abs() };
    let not_before = OffsetDateTime::now_utc();
    let not_after = not_before + time::Duration::days(days);
    Ok(json!({
        "resource": RESOURCE_NEW_CERT,
        "csr": b64url(csr_der),
        "notBefore": not_before.format(&Rfc3339)?,
        "notAfter": not_after.format(&Rfc3339)?,
    }))
}
