// Canonical instrument keys: upper-case, separator-free ("BTC/USDT" -> "BTCUSDT").

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The only symbol spelling used for matching and storage.
///
/// Can only be built through [`canonicalize`], so holding one is proof the
/// raw exchange or client spelling has already been normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct CanonicalSymbol(String);

impl CanonicalSymbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '-' || c.is_whitespace()
}

/// Strips `/`, `-` and whitespace and upper-cases the rest.
///
/// Never fails: anything a client sends resolves to some key, even if no
/// exchange will ever publish under it. Idempotent.
pub fn canonicalize(raw: &str) -> CanonicalSymbol {
    let key = raw
        .chars()
        .filter(|c| !is_separator(*c))
        .flat_map(char::to_uppercase)
        .collect();
    CanonicalSymbol(key)
}

impl From<String> for CanonicalSymbol {
    fn from(raw: String) -> Self {
        canonicalize(&raw)
    }
}

impl From<&str> for CanonicalSymbol {
    fn from(raw: &str) -> Self {
        canonicalize(raw)
    }
}

impl From<CanonicalSymbol> for String {
    fn from(symbol: CanonicalSymbol) -> Self {
        symbol.0
    }
}

impl Borrow<str> for CanonicalSymbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for CanonicalSymbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for CanonicalSymbol {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for CanonicalSymbol {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for CanonicalSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
