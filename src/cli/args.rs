use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(author, version, about = "ACME v01 certificate client", long_about = None)]
pub struct Cli {
    /// Command to run
    #[arg(short = 'c', long = "cmd", value_enum)]
    pub cmd: Option<Command>,

    /// Domain (common name) to operate on
    #[arg(short = 'd', long)]
    pub domain: Option<String>,

    /// Contact email address
    #[arg(short = 'e', long)]
    pub email: Option<String>,

    /// RSA key size in bits
    #[arg(short = 'k', long = "key-size")]
    pub key_size: Option<u32>,

    /// Relative path the key authorization is published under
    #[arg(short = 'l', long = "well-known")]
    pub well_known: Option<String>,

    /// Requested certificate validity in days
    #[arg(short = 'n', long)]
    pub days: Option<i64>,

    /// Organization for the certificate subject
    #[arg(short = 'o', long)]
    pub organization: Option<String>,

    /// Country code for the certificate subject
    #[arg(short = 'r', long)]
    pub country: Option<String>,

    /// ACME directory URL
    #[arg(short = 'u', long)]
    pub url: Option<String>,

    /// Verbose output (echo payloads, headers and bodies)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Webroot the challenge file is written under
    #[arg(short = 'w', long)]
    pub webroot: Option<PathBuf>,

    /// Never pause for interaction
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Authorize the domain and obtain a certificate
    Add,
    /// Generate a key pair and certificate signing request
    Csr,
    /// Show the account profile
    Info,
    /// Register an account
    Reg,
    /// Print usage information
    Help,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_short_flags() {
        let cli = Cli::parse_from([
            "certling",
            "-c",
            "add",
            "-d",
            "www.example.com",
            "-e",
            "info@example.com",
            "-n",
            "90",
            "-k",
            "4096",
            "-o",
            "Example Org",
            "-r",
            "DE",
            "-u",
            "https://ca.example/directory",
            "-w",
            "/var/www",
            "-l",
            "/.well-known/acme-challenge/",
            "-v",
            "-y",
        ]);
        assert_eq!(cli.cmd, Some(Command::Add));
        assert_eq!(cli.domain.as_deref(), Some("www.example.com"));
        assert_eq!(cli.email.as_deref(), Some("info@example.com"));
        assert_eq!(cli.days, Some(90));
        assert_eq!(cli.key_size, Some(4096));
        assert_eq!(cli.organization.as_deref(), Some("Example Org"));
        assert_eq!(cli.country.as_deref(), Some("DE"));
        assert_eq!(cli.url.as_deref(), Some("https://ca.example/directory"));
        assert_eq!(cli.webroot, Some(PathBuf::from("/var/www")));
        assert!(cli.verbose);
        assert!(cli.yes);
    }

    #[test]
    fn test_cli_defaults_to_no_command() {
        let cli = Cli::parse_from(["certling"]);
        assert_eq!(cli.cmd, None);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parses_long_flags() {
        let cli = Cli::parse_from(["certling", "--cmd", "reg", "--email", "a@b.c"]);
        assert_eq!(cli.cmd, Some(Command::Reg));
        assert_eq!(cli.email.as_deref(), Some("a@b.c"));
    }
}
