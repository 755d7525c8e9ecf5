//! x402 payment challenge metadata attached to HTTP 402 responses.

use serde::{Deserialize, Serialize};

/// Parsed `PAYMENT-REQUIRED` header payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    #[serde(default)]
    pub x402_version: i64,
    #[serde(default)]
    pub accepts: Vec<PaymentRequirement>,
}

/// One acceptable way to pay for the blocked request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub max_amount_required: String,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub pay_to: String,
    #[serde(default)]
    pub resource: String,
}

impl PaymentChallenge {
    /// Parse a header value. Malformed payloads yield `None`; the header's presence is tracked separately.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    /// The first listed requirement, if any.
    pub fn primary(&self) -> Option<&PaymentRequirement> {
        self.accepts.first()
    }
}

impl PaymentRequirement {
    /// Amount to pay, falling back to `maxAmountRequired`.
    pub fn effective_amount(&self) -> &str {
        let amount = self.amount.trim();
        if amount.is_empty() { self.max_amount_required.trim() } else { amount }
    }

    /// Render `(Hints: amount=…, asset=…, network=…)` from the non-empty fields.
    pub fn hint_suffix(&self) -> Option<String> {
        let fields = [
            ("amount", self.effective_amount()),
            ("asset", self.asset.trim()),
            ("network", self.network.trim()),
        ];
        let parts: Vec<String> = fields
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(format!("(Hints: {})", parts.join(", ")))
    }
}
