use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use certling::acme::client::AcmeClient;
use certling::acme::jws::AccountKey;
use certling::acme::transport::HttpsTransport;
use certling::acme::{authorize_domain, request_certificate};
use certling::cli::args::{Cli, Command};
use certling::cli::output;
use certling::config::Settings;
use certling::encode::safe_name;
use certling::{fs_util, keygen};

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    init_tracing(args.verbose);

    if let Err(err) = run(args).await {
        error!("certling: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "certling=debug"
    } else {
        "certling=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Cli) -> Result<()> {
    let Some(cmd) = args.cmd else {
        return print_help();
    };

    let mut settings = Settings::new(None).context("Failed to load configuration")?;
    settings.merge_with_args(&args);
    settings.validate()?;

    match cmd {
        Command::Help => print_help(),
        Command::Csr => run_csr(&settings, &args).await,
        Command::Reg => run_reg(&settings, &args).await,
        Command::Info => run_info(&settings).await,
        Command::Add => run_add(&settings, &args).await,
    }
}

fn print_help() -> Result<()> {
    Cli::command()
        .print_long_help()
        .context("Failed to print help")?;
    Ok(())
}

async fn run_csr(settings: &Settings, args: &Cli) -> Result<()> {
    let domain = require_domain(args)?;
    let email = resolve_email(settings, Some(&domain))?;
    let file_stem = safe_name(&domain, false);
    keygen::generate_domain_key_and_csr(
        settings.key_size,
        settings.country.as_deref(),
        settings.organization.as_deref(),
        &domain,
        &email,
        &file_stem,
    )
    .await?;
    output::print_csr(&file_stem);
    Ok(())
}

async fn run_reg(settings: &Settings, args: &Cli) -> Result<()> {
    let email = resolve_email(settings, args.domain.as_deref())?;
    let mut client = build_client(settings).await?;
    let account_url = client.create_account(&email).await?;
    output::print_registration(&account_url);
    Ok(())
}

async fn run_info(settings: &Settings) -> Result<()> {
    let mut client = build_client(settings).await?;
    let profile = client.get_profile().await?;
    output::print_profile(&profile);
    Ok(())
}

async fn run_add(settings: &Settings, args: &Cli) -> Result<()> {
    let domain = require_domain(args)?;
    let mut client = build_client(settings).await?;

    // The web server must be able to serve the challenge path before an
    // authorization is attempted.
    let challenge_dir =
        fs_util::challenge_file_path(&settings.webroot, &settings.well_known_path, "");
    tokio::fs::create_dir_all(&challenge_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create challenge dir {}",
                challenge_dir.display()
            )
        })?;

    let authorization = authorize_domain(settings, &mut client, &domain).await?;
    let status = authorization
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    output::print_authorization(&domain, status);
    if status != "valid" {
        anyhow::bail!("authorization for {domain} finished with status {status}");
    }

    let der_path = request_certificate(settings, &mut client, &domain).await?;
    output::print_certificate(&der_path);
    Ok(())
}

fn require_domain(args: &Cli) -> Result<String> {
    args.domain
        .clone()
        .context("a domain is required (-d/--domain)")
}

fn resolve_email(settings: &Settings, domain: Option<&str>) -> Result<String> {
    if let Some(email) = &settings.email {
        return Ok(email.clone());
    }
    if let Some(domain) = domain {
        return Ok(format!("{}@{}", settings.email_prefix, domain));
    }
    anyhow::bail!("an email is required (-e/--email, or -d to derive one)")
}

/// Loads the account key (generating it on first use) and assembles the
/// protocol client around it.
async fn build_client(settings: &Settings) -> Result<AcmeClient<HttpsTransport>> {
    let key_path = &settings.account_key;
    if !key_path.exists() {
        info!("no account key at {}, generating one", key_path.display());
        keygen::generate_account_key(settings.key_size, key_path).await?;
    }
    let key = AccountKey::from_pem_file(key_path)
        .with_context(|| format!("Failed to load account key {}", key_path.display()))?;
    let transport = HttpsTransport::new(key)?;
    Ok(AcmeClient::new(transport, settings.acme_settings()))
}
