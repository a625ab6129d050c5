//! Claims carried inside a sealed token.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

/// Errors while interacting with claims.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum Error {
    #[error("claim not present")]
    MissingClaim,
    #[error("claim in unexpected format")]
    InvalidClaimFormat,
    #[error("cannot set registered claim as custom")]
    RegisteredClaim,
    #[error("cannot serialize value as json")]
    SerializeError,
}

/// Registered claims. These can only be modified through the provided
/// setters, which keep their values well-formed.
pub const REGISTERED_CLAIMS: [&str; 7] = ["iss", "sub", "aud", "exp", "nbf", "iat", "jti"];

/// A collection of claims.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Claims(HashMap<String, Value>);

impl Claims {
    /// Create a new set of claims valid from now until one hour from now.
    pub fn new() -> Self {
        Self::expiring_at(OffsetDateTime::now_utc() + Duration::hours(1))
    }

    /// Create a new set of claims valid from now until `exp`.
    pub fn expiring_at(exp: OffsetDateTime) -> Self {
        let iat = OffsetDateTime::now_utc();

        let mut claims = Self(HashMap::new());
        claims.set_time("exp", exp);
        claims.set_time("nbf", iat);
        claims.set_time("iat", iat);

        claims
    }

    /// Get the JSON value of a claim.
    ///
    /// Returns [`None`] if the claim is not set.
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    /// Deserialize a claim into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim is missing or has a different shape.
    pub fn claim<T: DeserializeOwned>(&self, claim: &str) -> Result<T, Error> {
        let value = self.get(claim).ok_or(Error::MissingClaim)?;

        serde_json::from_value(value.clone()).map_err(|_| Error::InvalidClaimFormat)
    }

    /// Set a non-registered claim to a JSON-serializable value.
    ///
    /// # Errors
    ///
    /// Returns an error when attempting to set a registered claim or when the
    /// provided value can't be serialized to JSON.
    pub fn with_custom_claim<V>(mut self, claim: &str, value: V) -> Result<Self, Error>
    where
        V: Serialize,
    {
        if REGISTERED_CLAIMS.contains(&claim) {
            return Err(Error::RegisteredClaim);
        }

        let value = serde_json::to_value(value).map_err(|_| Error::SerializeError)?;
        self.0.insert(claim.to_string(), value);

        Ok(self)
    }

    /// Get the expiration date.
    pub fn expiration(&self) -> Option<OffsetDateTime> {
        self.time("exp")
    }

    /// Get the not before date.
    pub fn not_before(&self) -> Option<OffsetDateTime> {
        self.time("nbf")
    }

    /// Get the issued at date.
    pub fn issued_at(&self) -> Option<OffsetDateTime> {
        self.time("iat")
    }

    fn time(&self, claim: &str) -> Option<OffsetDateTime> {
        self.get(claim)
            .and_then(Value::as_str)
            .and_then(|t| OffsetDateTime::parse(t, &Rfc3339).ok())
    }

    fn set_time(&mut self, claim: &str, time: OffsetDateTime) {
        // RFC3339 formatting only fails outside of years 0..=9999, in which
        // case the claim is left unset and validation will reject it
        if let Ok(formatted) = time.format(&Rfc3339) {
            self.0.insert(claim.to_string(), Value::String(formatted));
        }
    }
}

impl Default for Claims {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks the time-based claims of a token: "Not Before" and "Issued At"
/// must be set and not in the future, "Expiration" must be set and not in
/// the past.
#[derive(Clone, Copy, Debug)]
pub struct ClaimsValidator {
    now: OffsetDateTime,
}

impl ClaimsValidator {
    /// Validate against the current time.
    pub fn new() -> Self {
        Self::at(OffsetDateTime::now_utc())
    }

    /// Validate against a fixed point in time.
    pub fn at(now: OffsetDateTime) -> Self {
        Self { now }
    }

    pub fn validate(&self, claims: &Claims) -> bool {
        match (claims.expiration(), claims.not_before(), claims.issued_at()) {
            (Some(exp), Some(nbf), Some(iat)) => {
                exp >= self.now && nbf <= self.now && iat <= self.now
            }
            _ => false,
        }
    }
}

impl Default for ClaimsValidator {
    fn default() -> Self {
        Self::new()
    }
}
