//! Symbol identity: canonical ids, markets, and source-specific format variants.
//!
//! Canonical form is `<code>.<EXCHANGE>` (e.g. `600519.SH`, `00700.HK`).
//! Upstream sources want different spellings of the same instrument, so the
//! parsed [`SymbolInfo`] can render itself in any [`SymbolFormat`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SymbolParseError {
    #[error("empty symbol")]
    Empty,

    #[error("unsupported symbol format: '{0}'")]
    Unsupported(String),

    #[error("unknown market: '{0}'")]
    UnknownMarket(String),

    #[error("failed to read symbols file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Market an instrument trades in. Determines default currency and which
/// upstream routes apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Cn,
    Hk,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Cn => "CN",
            Market::Hk => "HK",
        }
    }

    pub fn default_currency(&self) -> &'static str {
        match self {
            Market::Cn => "CNY",
            Market::Hk => "HKD",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = SymbolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CN" => Ok(Market::Cn),
            "HK" => Ok(Market::Hk),
            other => Err(SymbolParseError::UnknownMarket(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Sh,
    Sz,
    Hk,
}

impl Exchange {
    pub fn suffix(&self) -> &'static str {
        match self {
            Exchange::Sh => "SH",
            Exchange::Sz => "SZ",
            Exchange::Hk => "HK",
        }
    }

    pub fn market(&self) -> Market {
        match self {
            Exchange::Sh | Exchange::Sz => Market::Cn,
            Exchange::Hk => Market::Hk,
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "SH" => Some(Exchange::Sh),
            "SZ" => Some(Exchange::Sz),
            "HK" => Some(Exchange::Hk),
            _ => None,
        }
    }
}

/// How a particular upstream source spells a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolFormat {
    /// `600519.SH`, `00700.HK`
    #[default]
    Canonical,
    /// `600519`, `00700`
    Code,
    /// `sh600519`; HK stays as the bare code.
    LowerPrefixed,
    /// `SH600519`; HK stays as the bare code.
    UpperPrefixed,
}

/// A parsed, normalized symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol_id: String,
    pub code: String,
    pub exchange: Exchange,
    pub market: Market,
    pub currency: String,
}

impl SymbolInfo {
    fn new(code: String, exchange: Exchange) -> Self {
        let market = exchange.market();
        Self {
            symbol_id: format!("{code}.{}", exchange.suffix()),
            code,
            exchange,
            market,
            currency: market.default_currency().to_string(),
        }
    }

    /// Render the symbol the way a given upstream source expects it.
    pub fn format(&self, format: SymbolFormat) -> String {
        match (format, self.market) {
            (SymbolFormat::Canonical, _) => self.symbol_id.clone(),
            (SymbolFormat::Code, _) | (_, Market::Hk) => self.code.clone(),
            (SymbolFormat::LowerPrefixed, Market::Cn) => {
                format!("{}{}", self.exchange.suffix().to_ascii_lowercase(), self.code)
            }
            (SymbolFormat::UpperPrefixed, Market::Cn) => {
                format!("{}{}", self.exchange.suffix(), self.code)
            }
        }
    }
}

/// Parse any supported spelling into a canonical [`SymbolInfo`].
///
/// Accepted: `600519.SH`, `000001.SZ`, `700.HK`, `SH600519`, `hk700`,
/// bare 6-digit CN codes and bare HK codes of up to 5 digits.
pub fn parse_symbol(raw: &str) -> Result<SymbolInfo, SymbolParseError> {
    let text = raw.trim().to_ascii_uppercase();
    if text.is_empty() {
        return Err(SymbolParseError::Empty);
    }
    let unsupported = || SymbolParseError::Unsupported(raw.trim().to_string());

    if let Some((code, suffix)) = text.split_once('.') {
        let exchange = Exchange::from_suffix(suffix).ok_or_else(unsupported)?;
        return build(code, exchange).ok_or_else(unsupported);
    }

    if !text.is_ascii() {
        return Err(unsupported());
    }

    if let Some((prefix, rest)) = text.get(..2).zip(text.get(2..)) {
        if let Some(exchange) = Exchange::from_suffix(prefix).filter(|_| !rest.is_empty()) {
            return build(rest, exchange).ok_or_else(unsupported);
        }
    }

    if !is_digits(&text) {
        return Err(unsupported());
    }
    match text.len() {
        6 => {
            let exchange = if matches!(text.as_bytes()[0], b'5' | b'6' | b'9') {
                Exchange::Sh
            } else {
                Exchange::Sz
            };
            Ok(SymbolInfo::new(text, exchange))
        }
        1..=5 => build(&text, Exchange::Hk).ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}

fn build(code: &str, exchange: Exchange) -> Option<SymbolInfo> {
    if !is_digits(code) {
        return None;
    }
    match exchange {
        Exchange::Sh | Exchange::Sz if code.len() == 6 => {
            Some(SymbolInfo::new(code.to_string(), exchange))
        }
        Exchange::Hk if (1..=5).contains(&code.len()) => {
            Some(SymbolInfo::new(format!("{code:0>5}"), exchange))
        }
        _ => None,
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Merge a comma-separated symbol list with an optional newline-delimited
/// file. Blank lines and `#` comments are skipped; entries are uppercased and
/// de-duplicated in first-seen order. Entries are not parsed here.
pub fn load_symbol_list(
    inline: Option<&str>,
    file: Option<&Path>,
) -> Result<Vec<String>, SymbolParseError> {
    let mut entries: Vec<String> = Vec::new();

    if let Some(list) = inline {
        entries.extend(list.split(',').map(|s| s.trim().to_string()));
    }

    if let Some(path) = file {
        let content = std::fs::read_to_string(path).map_err(|e| SymbolParseError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        entries.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#'))
                .map(String::from),
        );
    }

    let mut seen = HashSet::new();
    Ok(entries
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_uppercase())
        .filter(|s| seen.insert(s.clone()))
        .collect())
}

/// Directory-safe form of a symbol id: `600519.SH` → `600519_SH`.
pub fn symbol_dir_name(symbol_id: &str) -> String {
    symbol_id.replace('.', "_")
}
