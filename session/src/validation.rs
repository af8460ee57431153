use crate::errors::{SessionError, SessionResult};
use regex::Regex;

/// Validation for identifiers reported by a wallet provider.
#[derive(Debug, Clone)]
pub struct AccountValidator {
    account_pattern: Regex,
}

impl AccountValidator {
    pub fn new() -> SessionResult<Self> {
        let account_pattern = Regex::new(r"^0x[a-fA-F0-9]{40}$").map_err(|e| {
            SessionError::ValidationError(format!("Invalid account regex: {}", e))
        })?;

        Ok(AccountValidator { account_pattern })
    }

    /// Validate an account id (hex address) and return it trimmed.
    pub fn validate_account<'a>(&self, account: &'a str) -> SessionResult<&'a str> {
        let trimmed = account.trim();
        if trimmed.is_empty() {
            return Err(SessionError::InvalidAccount(
                "Account id cannot be empty".to_string(),
            ));
        }

        if !self.account_pattern.is_match(trimmed) {
            return Err(SessionError::InvalidAccount(format!(
                "Account id '{}' is not a hex address",
                trimmed
            )));
        }

        Ok(trimmed)
    }
}

impl Default for AccountValidator {
    fn default() -> Self {
        Self::new().expect("Failed to create AccountValidator")
    }
}

/// Parse a chain id as reported by providers, either decimal or `0x`-prefixed hex.
pub fn parse_chain_id(raw: &str) -> SessionResult<u64> {
    let trimmed = raw.trim();
    let parsed = if let Some(stripped) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(stripped, 16)
    } else {
        trimmed.parse()
    };

    match parsed {
        Ok(0) | Err(_) => Err(SessionError::InvalidChainId(format!(
            "'{}' is not a valid chain id",
            raw
        ))),
        Ok(chain_id) => Ok(chain_id),
    }
}
