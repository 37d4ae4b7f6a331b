use std::path::Path;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::info;

const OPENSSL: &str = "openssl";

/// Generates the RSA account key with the external tool.
///
/// # Errors
/// Returns an error if the tool cannot be spawned or exits unsuccessfully.
pub async fn generate_account_key(bits: u32, path: &Path) -> Result<()> {
    info!("generating {bits}-bit account key at {}", path.display());
    let args = genrsa_args(bits, path);
    run_openssl(&args, "account key generation").await
}

/// Generates the per-domain key pair and DER CSR: `<stem>.key` and
/// `<stem>.csr` in the working directory.
///
/// # Errors
/// Returns an error if the tool cannot be spawned or exits unsuccessfully.
pub async fn generate_domain_key_and_csr(
    bits: u32,
    country: Option<&str>,
    organization: Option<&str>,
    common_name: &str,
    email: &str,
    file_stem: &str,
) -> Result<()> {
    info!("generating {bits}-bit key and CSR for {common_name}");
    let args = csr_args(bits, country, organization, common_name, email, file_stem);
    run_openssl(&args, "CSR generation").await
}

fn genrsa_args(bits: u32, path: &Path) -> Vec<String> {
    vec![
        "genrsa".to_string(),
        "-out".to_string(),
        path.to_string_lossy().to_string(),
        bits.to_string(),
    ]
}

fn csr_args(
    bits: u32,
    country: Option<&str>,
    organization: Option<&str>,
    common_name: &str,
    email: &str,
    file_stem: &str,
) -> Vec<String> {
    vec![
        "req".to_string(),
        "-new".to_string(),
        "-newkey".to_string(),
        format!("rsa:{bits}"),
        "-nodes".to_string(),
        "-keyout".to_string(),
        format!("{file_stem}.key"),
        "-outform".to_string(),
        "der".to_string(),
        "-out".to_string(),
        format!("{file_stem}.csr"),
        "-subj".to_string(),
        subject(country, organization, common_name, email),
    ]
}

fn subject(
    country: Option<&str>,
    organization: Option<&str>,
    common_name: &str,
    email: &str,
) -> String {
    let mut subject = String::new();
    if let Some(country) = country.filter(|value| !value.is_empty()) {
        subject.push_str(&format!("/C={country}"));
    }
    if let Some(organization) = organization.filter(|value| !value.is_empty()) {
        subject.push_str(&format!("/O={organization}"));
    }
    subject.push_str(&format!("/CN={common_name}/emailAddress={email}"));
    subject
}

async fn run_openssl(args: &[String], context: &str) -> Result<()> {
    let status = Command::new(OPENSSL)
        .args(args)
        .status()
        .await
        .with_context(|| format!("Failed to run openssl for {context}"))?;
    if !status.success() {
        anyhow::bail!("{context} failed with status: {status}");
    }
    Ok(())
}
