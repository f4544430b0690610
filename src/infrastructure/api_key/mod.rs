//! API credential infrastructure
//!
//! Key pair generation and hashing, the credential stores, per-minute rate
//! limiting and the credential lifecycle service.

mod generator;
mod hasher;
mod postgres;
mod rate_limiter;
mod repository;
mod service;

pub use generator::{
    random_token, GeneratedKeyPair, KeyPairGenerator, PRIVATE_RANDOM_LENGTH, PUBLIC_RANDOM_LENGTH,
};
pub use hasher::{fingerprint, Argon2SecretHasher, HashCost, SecretHasher};
pub use postgres::PostgresCredentialRepository;
pub use rate_limiter::{
    bucket_key, bucket_minute, RateLimitDecision, RateLimiter, BUCKET_TTL, RATE_LIMIT_KEY_PREFIX,
};
pub use repository::InMemoryCredentialRepository;
pub use service::{
    CreatePairRequest, CredentialService, CredentialServiceConfig, IssuedPair, KeyUsageStats,
    PairOutcome, SweepFailure, SweepReport, VerifiedIdentity,
};
