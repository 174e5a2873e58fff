use alloy::signers::local::PrivateKeySigner;
use eyre::Context as _;
use secrecy::{ExposeSecret as _, SecretString};
use std::io::IsTerminal as _;
use zeroize::Zeroizing;

pub const DEFAULT_KEY_ENV: &str = "VAULTSWAP_PRIVATE_KEY";

/// Load the signing key from `key_env`, or prompt for it when stdin is a terminal.
pub fn load_signer(key_env: &str) -> eyre::Result<PrivateKeySigner> {
    let secret = match std::env::var(key_env) {
        Ok(v) if !v.trim().is_empty() => SecretString::new(v.into()),
        _ => {
            if !std::io::stdin().is_terminal() {
                eyre::bail!("{key_env} is not set and stdin is not a terminal");
            }
            let v = rpassword::prompt_password("private key (hex): ")
                .context("read private key")?;
            SecretString::new(v.into())
        }
    };
    parse_private_key(&secret)
}

/// Accepts 32 bytes of hex, with or without a `0x` prefix. Errors never echo the input.
pub fn parse_private_key(secret: &SecretString) -> eyre::Result<PrivateKeySigner> {
    let s = secret.expose_secret().trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let bytes = Zeroizing::new(
        hex::decode(s)
            .map_err(|e| eyre::eyre!("private key is not valid hex: {}", describe_hex_error(&e)))?,
    );
    if bytes.len() != 32 {
        eyre::bail!("private key must be 32 bytes, got {}", bytes.len());
    }
    PrivateKeySigner::from_slice(&bytes).context("private key is out of range")
}

/// `FromHexError`'s own message quotes the offending character; keep only its position.
fn describe_hex_error(e: &hex::FromHexError) -> String {
    if let hex::FromHexError::InvalidHexCharacter { index, .. } = e {
        format!("invalid character at position {index}")
    } else {
        e.to_string()
    }
}
