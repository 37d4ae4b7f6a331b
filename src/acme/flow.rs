use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::acme::client::AcmeClient;
use crate::acme::jws::make_key_authorization;
use crate::acme::transport::Transport;
use crate::acme::types::AuthorizationBody;
use crate::config::Settings;
use crate::encode::{extract_email, safe_name};
use crate::{cli, fs_util, keygen};

const STATUS_FORBIDDEN: u16 = 403;

/// Runs the full authorization dance for one DNS identifier: profile lookup,
/// `new-authz`, at most one terms-of-service recovery cycle, challenge file
/// publication, challenge acceptance, and status polling. Returns the final
/// authorization object.
///
/// # Errors
/// Returns an error on any protocol failure, when no `http-01` challenge is
/// offered, or when polling gives up.
pub async fn authorize_domain<T: Transport>(
    settings: &Settings,
    client: &mut AcmeClient<T>,
    domain: &str,
) -> Result<Value> {
    client
        .get_profile()
        .await
        .context("profile lookup failed")?;

    let mut resp = client.new_authorization(domain).await?;
    if resp.status == STATUS_FORBIDDEN {
        // One recovery cycle: agree to the advertised terms, then retry.
        let tos_link = client
            .tos_link()
            .context("authorization refused and no terms-of-service link advertised")?
            .to_string();
        let agreement = client.agree_tos(&tos_link).await?;
        if !agreement.is_ok() {
            return Err(agreement.status_error().into());
        }
        resp = client.new_authorization(domain).await?;
    }
    if !resp.is_ok() {
        return Err(resp.status_error().into());
    }

    let poll_uri = resp
        .location
        .clone()
        .context("authorization response carries no location to poll")?;
    let authz: AuthorizationBody = serde_json::from_value(resp.json()?.clone())
        .context("authorization body could not be decoded")?;
    let challenge = authz
        .http01_challenge()
        .context("no http-01 challenge offered")?;
    let token = challenge
        .token
        .as_deref()
        .context("http-01 challenge carries no token")?;
    let profile_key = client
        .profile_key()
        .context("server never confirmed the account public key")?;
    let key_authorization = make_key_authorization(token, profile_key)?;

    let challenge_file =
        fs_util::challenge_file_path(&settings.webroot, &settings.well_known_path, token);
    fs_util::write_challenge_file(&challenge_file, &key_authorization).await?;
    info!("challenge response published at {}", challenge_file.display());

    if settings.with_interaction {
        cli::prompt::pause_for_enter(
            "Challenge file is in place. Press enter once it is served...",
        )?;
    }

    let challenge_uri = challenge.uri.clone();
    client
        .accept_challenge(&challenge_uri, &key_authorization)
        .await?;

    let outcome = client.poll_until_valid(&poll_uri).await?;
    let outcome_status = outcome.get("status").and_then(Value::as_str).unwrap_or("unknown");
    info!("authorization for {domain} finished with status {}", outcome_status);
    Ok(outcome)
}

/// Obtains a certificate for an authorized domain: derives the contact
/// email, has the external tool produce the key pair and DER CSR, submits it
/// to `new-cert`, and writes the issued certificate next to the CSR.
///
/// # Errors
/// Returns an error if any step fails, including the external tool.
pub async fn request_certificate<T: Transport>(
    settings: &Settings,
    client: &mut AcmeClient<T>,
    domain: &str,
) -> Result<PathBuf> {
    let profile = client
        .get_profile()
        .await
        .context("profile lookup failed")?;
    let email = settings
        .email
        .clone()
        .or_else(|| extract_email(&profile))
        .unwrap_or_else(|| format!("{}@{}", settings.email_prefix, domain));
    info!("requesting certificate for {domain} (contact {email})");

    let file_stem = safe_name(domain, false);
    keygen::generate_domain_key_and_csr(
        settings.key_size,
        settings.country.as_deref(),
        settings.organization.as_deref(),
        domain,
        &email,
        &file_stem,
    )
    .await?;

    let csr = fs_util::read_csr(&PathBuf::from(format!("{file_stem}.csr"))).await?;
    let certificate = client.request_signing(&csr).await?;

    let der_path = PathBuf::from(format!("{file_stem}.der"));
    fs_util::write_certificate(&der_path, &certificate).await?;
    log_certificate_summary(&certificate);
    Ok(der_path)
}

fn log_certificate_summary(der: &[u8]) {
    match x509_parser::parse_x509_certificate(der) {
        Ok((_, certificate)) => {
            let validity = certificate.validity();
            info!(
                "issued certificate: subject={} not_before={} not_after={}",
                certificate.subject(),
                validity.not_before,
                validity.not_after
            );
        }
        Err(err) => warn!("issued certificate could not be parsed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::acme::client::AcmeSettings;
    use crate::acme::error::AcmeResult;
    use crate::acme::transport::{Body, Response};

    struct ScriptedTransport {
        responses: VecDeque<Response>,
        posts: Vec<(String, Value)>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Response>) -> Self {
            Self {
                responses: responses.into(),
                posts: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&mut self, _url: &str) -> AcmeResult<Response> {
            Ok(self.responses.pop_front().expect("scripted response"))
        }

        async fn post(&mut self, url: &str, payload: &Value) -> AcmeResult<Response> {
            self.posts.push((url.to_string(), payload.clone()));
            Ok(self.responses.pop_front().expect("scripted response"))
        }
    }

    fn json_response(status: u16, body: Value) -> Response {
        Response {
            status,
            location: None,
            link: None,
            body: Body::Json(body),
        }
    }

    fn test_settings(webroot: &std::path::Path) -> Settings {
        Settings {
            server: "https://ca.example/directory".to_string(),
            email: None,
            email_prefix: "hostmaster".to_string(),
            days_valid: 1,
            key_size: 2048,
            account_key: PathBuf::from("account.key"),
            webroot: webroot.to_path_buf(),
            well_known_path: "/.well-known/acme-challenge/".to_string(),
            with_interaction: false,
            organization: None,
            country: None,
            acme: crate::config::AcmeTuning {
                poll_base_delay_ms: 0,
            },
        }
    }

    fn client(transport: ScriptedTransport) -> AcmeClient<ScriptedTransport> {
        AcmeClient::new(
            transport,
            AcmeSettings {
                directory_url: "https://ca.example/directory".to_string(),
                days_valid: 1,
                poll_base_delay_ms: 0,
            },
        )
    }

    fn profile_sequence() -> Vec<Response> {
        let mut probe = json_response(409, json!({}));
        probe.location = Some("https://ca.example/reg/1".to_string());
        let mut registration = json_response(
            200,
            json!({ "key": { "kty": "RSA", "n": "abc", "e": "AQAB" } }),
        );
        registration.link =
            Some(r#"<https://ca.example/tos>;rel="terms-of-service""#.to_string());
        vec![
            json_response(
                200,
                json!({
                    "new-reg": "https://ca.example/new-reg",
                    "new-authz": "https://ca.example/new-authz",
                    "new-cert": "https://ca.example/new-cert",
                }),
            ),
            probe,
            registration,
        ]
    }

    fn authz_response() -> Response {
        let mut resp = json_response(
            201,
            json!({
                "status": "pending",
                "challenges": [
                    { "type": "dns-01", "uri": "https://ca.example/c/1", "token": "x" },
                    { "type": "http-01", "uri": "https://ca.example/c/2", "token": "tok-1" },
                ],
            }),
        );
        resp.location = Some("https://ca.example/authz/1".to_string());
        resp
    }

    #[tokio::test]
    async fn test_authorize_domain_publishes_challenge_and_polls() {
        let webroot = tempfile::tempdir().expect("tempdir");
        let settings = test_settings(webroot.path());

        let mut responses = profile_sequence();
        responses.push(authz_response());
        responses.push(json_response(202, json!({ "status": "pending" })));
        responses.push(json_response(200, json!({ "status": "valid" })));
        let mut client = client(ScriptedTransport::new(responses));

        let outcome = authorize_domain(&settings, &mut client, "www.example.com")
            .await
            .expect("authorized");
        assert_eq!(outcome["status"], "valid");

        let challenge_file = webroot
            .path()
            .join(".well-known/acme-challenge/tok-1");
        let contents = std::fs::read_to_string(challenge_file).expect("challenge file");
        assert!(contents.starts_with("tok-1."));
        assert_eq!(contents.split('.').count(), 2);

        // The acceptance POST must carry the same key authorization.
        let accept = client
            .transport
            .posts
            .iter()
            .find(|(url, _)| url == "https://ca.example/c/2")
            .expect("challenge accepted");
        assert_eq!(accept.1["resource"], "challenge");
        assert_eq!(accept.1["keyAuthorization"], contents);
    }

    #[tokio::test]
    async fn test_authorize_domain_recovers_from_tos_once() {
        let webroot = tempfile::tempdir().expect("tempdir");
        let settings = test_settings(webroot.path());

        let mut responses = profile_sequence();
        responses.push(json_response(403, json!({ "detail": "agree first" })));
        // Agreement response keeps the link advertised.
        let mut agreement = json_response(
            202,
            json!({ "key": { "kty": "RSA", "n": "abc", "e": "AQAB" } }),
        );
        agreement.link =
            Some(r#"<https://ca.example/tos>;rel="terms-of-service""#.to_string());
        responses.push(agreement);
        responses.push(authz_response());
        responses.push(json_response(202, json!({})));
        responses.push(json_response(200, json!({ "status": "valid" })));
        let mut client = client(ScriptedTransport::new(responses));

        let outcome = authorize_domain(&settings, &mut client, "www.example.com")
            .await
            .expect("authorized after agreement");
        assert_eq!(outcome["status"], "valid");

        let agreement_post = client
            .transport
            .posts
            .iter()
            .find(|(_, payload)| payload.get("Agreement").is_some())
            .expect("agreement sent");
        assert_eq!(agreement_post.1["Agreement"], "https://ca.example/tos");
        assert_eq!(agreement_post.1["resource"], "reg");
    }

    #[tokio::test]
    async fn test_authorize_domain_gives_up_on_second_refusal() {
        let webroot = tempfile::tempdir().expect("tempdir");
        let settings = test_settings(webroot.path());

        let mut responses = profile_sequence();
        responses.push(json_response(403, json!({})));
        let mut agreement = json_response(202, json!({}));
        agreement.link =
            Some(r#"<https://ca.example/tos>;rel="terms-of-service""#.to_string());
        responses.push(agreement);
        responses.push(json_response(403, json!({ "detail": "still refused" })));
        let mut client = client(ScriptedTransport::new(responses));

        let err = authorize_domain(&settings, &mut client, "www.example.com")
            .await
            .expect_err("no second recovery");
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_authorize_domain_requires_http01_offer() {
        let webroot = tempfile::tempdir().expect("tempdir");
        let settings = test_settings(webroot.path());

        let mut responses = profile_sequence();
        let mut resp = json_response(
            201,
            json!({
                "status": "pending",
                "challenges": [
                    { "type": "dns-01", "uri": "https://ca.example/c/1", "token": "x" },
                ],
            }),
        );
        resp.location = Some("https://ca.example/authz/1".to_string());
        responses.push(resp);
        let mut client = client(ScriptedTransport::new(responses));

        let err = authorize_domain(&settings, &mut client, "www.example.com")
            .await
            .expect_err("no http-01");
        assert!(err.to_string().contains("http-01"));
    }

    #[tokio::test]
    async fn test_authorize_domain_requires_poll_location() {
        let webroot = tempfile::tempdir().expect("tempdir");
        let settings = test_settings(webroot.path());

        let mut responses = profile_sequence();
        responses.push(json_response(
            201,
            json!({
                "challenges": [
                    { "type": "http-01", "uri": "https://ca.example/c/2", "token": "tok-1" },
                ],
            }),
        ));
        let mut client = client(ScriptedTransport::new(responses));

        let err = authorize_domain(&settings, &mut client, "www.example.com")
            .await
            .expect_err("no poll uri");
        assert!(err.to_string().contains("location"));
    }
}
