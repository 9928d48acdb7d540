//! Entry sides and settlement layers.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use tally_core::DomainError;

/// Side of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Debit => Direction::Credit,
            Direction::Credit => Direction::Debit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Debit => "DEBIT",
            Direction::Credit => "CREDIT",
        }
    }
}

/// Side on which an account's balance is conventionally positive.
///
/// Fixed at account creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NormalBalance {
    Debit,
    Credit,
}

impl NormalBalance {
    pub fn as_str(self) -> &'static str {
        match self {
            NormalBalance::Debit => "DEBIT",
            NormalBalance::Credit => "CREDIT",
        }
    }
}

impl From<NormalBalance> for Direction {
    fn from(value: NormalBalance) -> Self {
        match value {
            NormalBalance::Debit => Direction::Debit,
            NormalBalance::Credit => Direction::Credit,
        }
    }
}

/// Settlement stage of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Layer {
    Pending,
    Settled,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::Pending, Layer::Settled];

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Pending => "PENDING",
            Layer::Settled => "SETTLED",
        }
    }
}

macro_rules! impl_upper_case_text {
    ($t:ty, $name:literal, [$($text:literal => $variant:expr),+ $(,)?]) => {
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($variant),)+
                    other => Err(DomainError::validation(format!(
                        "unknown {}: '{other}'",
                        $name
                    ))),
                }
            }
        }
    };
}

impl_upper_case_text!(Direction, "direction", ["DEBIT" => Direction::Debit, "CREDIT" => Direction::Credit]);
impl_upper_case_text!(NormalBalance, "normal balance", ["DEBIT" => NormalBalance::Debit, "CREDIT" => NormalBalance::Credit]);
impl_upper_case_text!(Layer, "layer", ["PENDING" => Layer::Pending, "SETTLED" => Layer::Settled]);
