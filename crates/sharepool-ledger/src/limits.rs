//! Operational limits.

use serde::{Deserialize, Serialize};

/// Upper bounds on the size of a single call.
///
/// Each limit caps the work one call can do. Exceeding one fails the call
/// with [`crate::LedgerError::LimitExceeded`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLimits {
    /// Entries in one membership batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Assets named in one withdrawal.
    #[serde(default = "default_max_assets_per_withdrawal")]
    pub max_assets_per_withdrawal: usize,
    /// Approved delegates per account, wildcard included.
    #[serde(default = "default_max_delegates")]
    pub max_delegates: usize,
}

fn default_max_batch_size() -> usize {
    256
}

fn default_max_assets_per_withdrawal() -> usize {
    32
}

fn default_max_delegates() -> usize {
    16
}

impl Default for LedgerLimits {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_assets_per_withdrawal: default_max_assets_per_withdrawal(),
            max_delegates: default_max_delegates(),
        }
    }
}

impl LedgerLimits {
    pub(crate) fn check(what: &'static str, actual: usize, max: usize) -> crate::Result<()> {
        if actual > max {
            return Err(crate::LedgerError::LimitExceeded { what, actual, max });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let limits: LedgerLimits = toml::from_str("max_delegates = 4").expect("parse");
        assert_eq!(limits.max_delegates, 4);
        assert_eq!(limits.max_batch_size, 256);
        assert_eq!(limits.max_assets_per_withdrawal, 32);
    }

    #[test]
    fn test_check() {
        assert!(LedgerLimits::check("batch", 3, 3).is_ok());
        assert!(matches!(
            LedgerLimits::check("batch", 4, 3),
            Err(crate::LedgerError::LimitExceeded { actual: 4, max: 3, .. })
        ));
    }
}
