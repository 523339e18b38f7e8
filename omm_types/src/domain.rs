use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Message model domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainType {
    Login,
    Source,
    Dictionary,
    MarketPrice,
    MarketByOrder,
    MarketByPrice,
    MarketMaker,
    SymbolList,
    Other(u8),
}

impl DomainType {
    /// Numeric domain code as carried on the wire
    pub fn code(self) -> u8 {
        match self {
            DomainType::Login => 1,
            DomainType::Source => 4,
            DomainType::Dictionary => 5,
            DomainType::MarketPrice => 6,
            DomainType::MarketByOrder => 7,
            DomainType::MarketByPrice => 8,
            DomainType::MarketMaker => 9,
            DomainType::SymbolList => 10,
            DomainType::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => DomainType::Login,
            4 => DomainType::Source,
            5 => DomainType::Dictionary,
            6 => DomainType::MarketPrice,
            7 => DomainType::MarketByOrder,
            8 => DomainType::MarketByPrice,
            9 => DomainType::MarketMaker,
            10 => DomainType::SymbolList,
            other => DomainType::Other(other),
        }
    }

    /// Login, directory and dictionary streams are owned by the session, not routed as items
    pub fn is_administrative(self) -> bool {
        matches!(self, DomainType::Login | DomainType::Source | DomainType::Dictionary)
    }
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainType::Other(code) => write!(f, "Domain({code})"),
            other => write!(f, "{other:?}"),
        }
    }
}
