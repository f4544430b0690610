//! Credential pair generation
//!
//! Generates cryptographically random public and private tokens and the
//! hashes persisted in their place.

use std::fmt;
use std::sync::Arc;

use rand::distributions::{Alphanumeric, DistString};

use super::hasher::SecretHasher;
use crate::domain::api_key::{parse_token, Environment, KeyType};
use crate::domain::DomainError;

/// Random characters in a public token
pub const PUBLIC_RANDOM_LENGTH: usize = 32;

/// Random characters in a private token (about 380 bits of entropy)
pub const PRIVATE_RANDOM_LENGTH: usize = 64;

/// A freshly generated pair. The plaintext tokens exist only here.
#[derive(Clone)]
pub struct GeneratedKeyPair {
    pub public_token: String,
    pub private_token: String,
    /// Key id stored on the private row
    pub private_key_id: String,
    pub public_hash: String,
    pub private_hash: String,
}

impl fmt::Debug for GeneratedKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKeyPair")
            .field("public_token", &self.public_token)
            .field("private_token", &"<redacted>")
            .field("private_key_id", &self.private_key_id)
            .finish()
    }
}

/// Random token with the `<pk|sk>_<env>_` prefix
pub fn random_token(key_type: KeyType, environment: Environment) -> String {
    let length = match key_type {
        KeyType::Public => PUBLIC_RANDOM_LENGTH,
        KeyType::Private => PRIVATE_RANDOM_LENGTH,
    };

    // thread_rng is a CSPRNG seeded from the OS
    let random = Alphanumeric.sample_string(&mut rand::thread_rng(), length);

    format!("{}_{}_{}", key_type.prefix(), environment.as_str(), random)
}

/// Generator for credential pairs
#[derive(Debug, Clone)]
pub struct KeyPairGenerator {
    hasher: Arc<dyn SecretHasher>,
}

impl KeyPairGenerator {
    pub fn new(hasher: Arc<dyn SecretHasher>) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &Arc<dyn SecretHasher> {
        &self.hasher
    }

    /// Generate a pair for an environment
    pub fn generate(&self, environment: Environment) -> Result<GeneratedKeyPair, DomainError> {
        let public_token = random_token(KeyType::Public, environment);
        let private_token = random_token(KeyType::Private, environment);

        let private_key_id = parse_token(&private_token)
            .map_err(|e| DomainError::internal(format!("Generated malformed token: {}", e)))?
            .lookup_id();

        let public_hash = self.hasher.hash(&public_token)?;
        let private_hash = self.hasher.hash(&private_token)?;

        Ok(GeneratedKeyPair {
            public_token,
            private_token,
            private_key_id,
            public_hash,
            private_hash,
        })
    }
}
