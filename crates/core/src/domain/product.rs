use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seat limits applied to quantity edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRules {
    pub team_quantity_limit: u32,
    pub team_default_quantity: u32,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self { team_quantity_limit: 100, team_default_quantity: 5 }
    }
}

impl PricingRules {
    /// Quantity assigned when team mode is switched on, never above the limit.
    pub fn team_activation_quantity(&self) -> u32 {
        self.team_default_quantity.clamp(1, self.team_quantity_limit.max(1))
    }
}
