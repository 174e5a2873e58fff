use alloy::primitives::U256;
use eyre::Context as _;

fn scale_for(decimals: u8) -> eyre::Result<U256> {
    U256::from(10_u64)
        .checked_pow(U256::from(decimals))
        .ok_or_else(|| eyre::eyre!("decimals too large"))
}

fn is_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a human decimal amount (`"1.5"`) into integer base units for a token with `decimals`
/// fractional digits. Exact: no floating point is involved anywhere on this path.
pub fn parse_amount_ui_to_base(s: &str, decimals: u8) -> eyre::Result<U256> {
    let s = s.trim();
    if s.is_empty() {
        eyre::bail!("empty amount");
    }
    if s.starts_with('-') {
        eyre::bail!("amount must be non-negative");
    }

    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty() && frac.is_empty() {
        eyre::bail!("malformed amount: {s}");
    }
    if !is_digits(whole) || !is_digits(frac) {
        eyre::bail!("malformed amount: {s}");
    }
    if frac.len() > usize::from(decimals) {
        eyre::bail!("too many decimal places for token (decimals={decimals})");
    }

    let whole_v = if whole.is_empty() {
        U256::ZERO
    } else {
        whole.parse::<U256>().context("parse whole")?
    };

    let mut frac_s = frac.to_owned();
    while frac_s.len() < usize::from(decimals) {
        frac_s.push('0');
    }
    let frac_v = if frac_s.is_empty() {
        U256::ZERO
    } else {
        frac_s.parse::<U256>().context("parse fractional")?
    };

    whole_v
        .checked_mul(scale_for(decimals)?)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| eyre::eyre!("amount overflow"))
}

/// Format a base-unit integer amount into a UI decimal string without using floats.
///
/// Examples:
/// - base=1500000, decimals=6 => "1.5"
/// - base=1, decimals=6 => "0.000001"
pub fn format_amount_base_to_ui(base: U256, decimals: u8) -> eyre::Result<String> {
    if decimals == 0 {
        return Ok(base.to_string());
    }
    let scale = scale_for(decimals)?;
    let whole = base / scale;
    let frac = base % scale;
    if frac.is_zero() {
        return Ok(whole.to_string());
    }
    let digits = frac.to_string();
    let pad = usize::from(decimals).saturating_sub(digits.len());
    let mut frac_s = "0".repeat(pad);
    frac_s.push_str(&digits);
    while frac_s.ends_with('0') {
        frac_s.pop();
    }
    Ok(format!("{whole}.{frac_s}"))
}
