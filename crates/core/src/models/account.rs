use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoreError;

/// A brokerage account owned by a single user.
///
/// Buy lots and dividend allocations reference accounts by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,

    /// Identifier of the authenticated user owning this account
    pub owner_id: String,

    pub name: String,

    /// ISO-style 3-letter currency code, uppercased (e.g., "USD", "HKD")
    pub currency: String,
}

impl Account {
    pub fn new(
        owner_id: impl Into<String>,
        name: impl Into<String>,
        currency: &str,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "Account name must not be empty".into(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            name,
            currency: normalize_currency(currency)?,
        })
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

/// Trim and uppercase a currency code, rejecting anything that isn't 3 ASCII letters.
pub fn normalize_currency(currency: &str) -> Result<String, CoreError> {
    let trimmed = currency.trim().to_uppercase();
    if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(CoreError::ValidationError(format!(
            "Invalid currency code '{currency}': must be exactly 3 ASCII letters (e.g., USD, CNY, HKD)"
        )));
    }
    Ok(trimmed)
}
