use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::models::query::SortSpec;

/// Engine configuration. Every field has a default, so a partial JSON
/// document (or `{}`) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LedgerSettings {
    /// Page size used when a list request doesn't give one.
    pub default_page_limit: usize,

    /// Upper bound on any requested page size.
    pub max_page_limit: usize,

    /// Sort used when a list request doesn't give one.
    pub default_sort: SortSpec,

    /// Tolerance for quantity comparisons (fractional shares accumulate float noise).
    pub quantity_epsilon: f64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            default_page_limit: 50,
            max_page_limit: 500,
            default_sort: SortSpec::default(),
            quantity_epsilon: 1e-9,
        }
    }
}

impl LedgerSettings {
    /// Parse settings from JSON and validate them.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let settings: LedgerSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.default_page_limit == 0 || self.max_page_limit == 0 {
            return Err(CoreError::ValidationError(
                "Page limits must be at least 1".into(),
            ));
        }
        if self.default_page_limit > self.max_page_limit {
            return Err(CoreError::ValidationError(format!(
                "Default page limit {} exceeds the maximum of {}",
                self.default_page_limit, self.max_page_limit
            )));
        }
        if !self.quantity_epsilon.is_finite() || self.quantity_epsilon < 0.0 {
            return Err(CoreError::ValidationError(format!(
                "Quantity epsilon must be a non-negative number, got {}",
                self.quantity_epsilon
            )));
        }
        Ok(())
    }
}
