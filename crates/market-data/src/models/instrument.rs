use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::MarketDataError;

/// Exchange an A-share instrument is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Exchange {
    Shanghai,
    Shenzhen,
    Beijing,
}

impl Exchange {
    /// Lowercase prefix used by most upstream quote APIs.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Shanghai => "sh",
            Self::Shenzhen => "sz",
            Self::Beijing => "bj",
        }
    }
}

/// Six-digit instrument code, stored without exchange prefix.
///
/// Accepts bare (`600519`) and prefixed (`sh600519`, `SZ000001`) forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrumentCode([u8; 6]);

impl InstrumentCode {
    /// Parse a code, stripping any `sh`/`sz`/`bj` prefix.
    pub fn parse(raw: &str) -> Result<Self, MarketDataError> {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        let digits = ["sh", "sz", "bj"]
            .iter()
            .find_map(|p| lower.strip_prefix(*p))
            .unwrap_or(&lower);

        let bytes = digits.as_bytes();
        if bytes.len() != 6 || !bytes.iter().all(u8::is_ascii_digit) {
            return Err(MarketDataError::InvalidCode(raw.to_string()));
        }

        let mut code = [0u8; 6];
        code.copy_from_slice(bytes);
        Ok(Self(code))
    }

    /// The bare six digits.
    pub fn as_str(&self) -> &str {
        // Only ASCII digits are ever stored.
        std::str::from_utf8(&self.0).unwrap_or("000000")
    }

    /// Listing exchange, derived from the leading digit.
    pub fn exchange(&self) -> Exchange {
        match self.0[0] {
            b'6' => Exchange::Shanghai,
            b'4' | b'8' | b'9' => Exchange::Beijing,
            _ => Exchange::Shenzhen,
        }
    }

    /// Prefixed form, e.g. `sh600519`.
    pub fn prefixed(&self) -> String {
        format!("{}{}", self.exchange().prefix(), self.as_str())
    }

    /// ChiNext (30x) and STAR (68x) boards trade with a 20% daily limit.
    pub fn is_growth_board(&self) -> bool {
        matches!(&self.0[..2], b"30" | b"68")
    }
}

impl fmt::Display for InstrumentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentCode {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for InstrumentCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for InstrumentCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
