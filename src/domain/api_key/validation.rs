//! Credential validation utilities

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::entity::{Environment, KeyType};

/// Maximum length for a credential display name
pub const MAX_CREDENTIAL_NAME_LENGTH: usize = 100;

/// Presented token shape: `<pk|sk>_<environment>_<random>`
static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(pk|sk)_(test|live|sandbox)_([A-Za-z0-9]+)$").unwrap());

/// Errors raised while validating credential input
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CredentialValidationError {
    #[error("Credential ID cannot be empty")]
    EmptyId,

    #[error("Credential ID '{0}' is not a valid UUID")]
    InvalidIdFormat(String),

    #[error("Token does not match the <pk|sk>_<environment>_<random> format")]
    MalformedToken,

    #[error("Credential name exceeds maximum length of {0} characters")]
    NameTooLong(usize),

    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("Unknown key type: {0}")]
    UnknownKeyType(String),

    #[error("Unknown credential status: {0}")]
    UnknownStatus(String),
}

/// Random characters of a private token kept in its stored lookup id
pub const PRIVATE_LOOKUP_CHARS: usize = 12;

/// A presented token split into its components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken<'a> {
    pub key_type: KeyType,
    pub environment: Environment,
    pub random: &'a str,
}

impl ParsedToken<'_> {
    /// Non-secret id under which a private row is stored: `sk_<env>_` plus
    /// the first random characters. Public rows store the full token.
    pub fn lookup_id(&self) -> String {
        match self.key_type {
            KeyType::Public => format!("pk_{}_{}", self.environment.as_str(), self.random),
            KeyType::Private => {
                let head: String = self.random.chars().take(PRIVATE_LOOKUP_CHARS).collect();
                format!("sk_{}_{}", self.environment.as_str(), head)
            }
        }
    }
}

/// Parse a presented public or private token
pub fn parse_token(token: &str) -> Result<ParsedToken<'_>, CredentialValidationError> {
    let captures = TOKEN_PATTERN
        .captures(token)
        .ok_or(CredentialValidationError::MalformedToken)?;

    let key_type = match captures.get(1).map(|m| m.as_str()) {
        Some("pk") => KeyType::Public,
        Some("sk") => KeyType::Private,
        _ => return Err(CredentialValidationError::MalformedToken),
    };

    let environment = captures
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .parse::<Environment>()?;

    let random = captures
        .get(3)
        .map(|m| m.as_str())
        .ok_or(CredentialValidationError::MalformedToken)?;

    Ok(ParsedToken {
        key_type,
        environment,
        random,
    })
}

/// Validate a credential display name
pub fn validate_credential_name(name: &str) -> Result<(), CredentialValidationError> {
    let length = name.chars().count();

    if length > MAX_CREDENTIAL_NAME_LENGTH {
        return Err(CredentialValidationError::NameTooLong(
            MAX_CREDENTIAL_NAME_LENGTH,
        ));
    }

    Ok(())
}
