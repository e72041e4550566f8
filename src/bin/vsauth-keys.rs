//! vsauth key tooling.
//!
//! ```bash
//! # RSA-2048 signing key for SIGNING_KEY_PATH
//! vsauth-keys generate-signing-key --out signing_key.pem
//!
//! # Value for one of the *_ENCRYPTION_KEY variables
//! vsauth-keys generate-secret
//!
//! # Argon2 hash for seeding a user record
//! echo -n 'hunter22' | vsauth-keys hash-password
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use vsauth::oauth::{SigningKey, password::hash_password, types::generate_token};

#[derive(Parser)]
#[command(
    name = "vsauth-keys",
    about = "Key and secret tooling for the vsauth authorization server",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an RSA-2048 PKCS#8 signing key
    GenerateSigningKey {
        /// Write the PEM here instead of stdout
        #[arg(long)]
        out: Option<String>,
        /// Key id published in the JWKS
        #[arg(long)]
        kid: Option<String>,
    },
    /// Hash a password with argon2; reads stdin when no password is given
    HashPassword {
        #[arg(long)]
        password: Option<String>,
    },
    /// Print a random artifact encryption secret
    GenerateSecret,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::GenerateSigningKey { out, kid } => {
            let (key, pem) = SigningKey::generate(kid.as_deref())?;
            match out {
                Some(path) => {
                    std::fs::write(&path, pem.as_bytes())
                        .with_context(|| format!("unable to write {}", path))?;
                    eprintln!("wrote signing key {} to {}", key.kid(), path);
                }
                None => print!("{}", pem),
            }
        }
        Commands::HashPassword { password } => {
            let password = match password {
                Some(password) => password,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("unable to read password from stdin")?;
                    buffer.trim_end_matches(['\r', '\n']).to_string()
                }
            };
            anyhow::ensure!(!password.is_empty(), "password must not be empty");
            println!("{}", hash_password(&password)?);
        }
        Commands::GenerateSecret => println!("{}", generate_token()),
    }
    Ok(())
}
