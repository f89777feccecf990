//! Canonical <-> Kraken pair translation.
//!
//! Canonical pairs look like `BTC/USDT`. Kraken names a few assets
//! differently (`XBT`, `XDG`). Each alias pair is a transposition, so an asset
//! that already carries an exchange alias is swapped back to its canonical
//! partner. That keeps `to_exchange` and `from_exchange` exact inverses for
//! every input string.

use crate::{Error, Result};

/// (canonical, exchange) asset aliases.
const ASSET_ALIASES: &[(&str, &str)] = &[("BTC", "XBT"), ("DOGE", "XDG")];

/// Base assets treated as cash-like and never traded.
pub const STABLE_COINS: &[&str] = &[
    "USDT", "USDC", "DAI", "BUSD", "UST", "EURT", "TUSD", "GUSD", "PAX", "HUSD", "EURS",
];

fn swap_asset(asset: &str) -> &str {
    for (canonical, exchange) in ASSET_ALIASES {
        if asset == *canonical {
            return exchange;
        }
        if asset == *exchange {
            return canonical;
        }
    }
    asset
}

fn map_pair(symbol: &str) -> String {
    match symbol.split_once('/') {
        Some((base, quote)) => format!("{}/{}", swap_asset(base), swap_asset(quote)),
        None => symbol.to_string(),
    }
}

/// `BTC/USDT` -> `XBT/USDT`.
pub fn to_exchange(symbol: &str) -> String {
    map_pair(symbol)
}

/// `XBT/USDT` -> `BTC/USDT`.
pub fn from_exchange(symbol: &str) -> String {
    // The alias table is symmetric, so the inverse is the same swap.
    map_pair(symbol)
}

/// Pair code used by the REST API: `BTC/USDT` -> `XBTUSDT`.
pub fn to_rest_pair(symbol: &str) -> String {
    to_exchange(symbol).replace('/', "")
}

/// Accepts `BASE/QUOTE` where both parts are non-empty ASCII alphanumerics.
pub fn validate_symbol(symbol: &str) -> Result<()> {
    let well_formed = symbol
        .split_once('/')
        .map(|(base, quote)| is_asset(base) && is_asset(quote))
        .unwrap_or(false);

    if well_formed {
        Ok(())
    } else {
        Err(Error::Validation(format!("malformed symbol '{symbol}'")))
    }
}

fn is_asset(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric())
}

/// True when the base asset is a stablecoin (e.g. `USDT/USD`).
pub fn is_stablecoin_base(symbol: &str) -> bool {
    symbol
        .split_once('/')
        .map(|(base, _)| STABLE_COINS.contains(&base))
        .unwrap_or(false)
}
