use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use precinct_core::PrincipalId;

/// Access-token claims as carried on the wire.
///
/// Role and badge are frozen at issuance: a role change only takes effect once
/// the holder's current token expires and a new one is minted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject / principal identifier.
    pub sub: PrincipalId,

    /// Badge (matricule) of the principal.
    pub badge: String,

    /// Role name at issuance.
    pub role: String,

    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,

    /// Expiration, seconds since the Unix epoch.
    pub exp: i64,
}

impl AccessClaims {
    pub fn issued_at(&self) -> DateTime<Utc> {
        timestamp(self.iat)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp(self.exp)
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Tolerated clock skew between issuer and verifier for `iat`.
const ISSUED_AT_LEEWAY_SECS: i64 = 30;

/// Deterministically validate the time window of decoded claims.
///
/// This validates the *claims* only; signature checking happens in the codec.
pub fn validate_claims(claims: &AccessClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now + ISSUED_AT_LEEWAY_SECS < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(iat: i64, exp: i64) -> AccessClaims {
        AccessClaims {
            sub: PrincipalId::new(),
            badge: "BF-0042".to_string(),
            role: "agent".to_string(),
            iat,
            exp,
        }
    }

    #[test]
    fn accepts_inside_window() {
        let now = Utc::now();
        let c = claims(now.timestamp(), now.timestamp() + 60);
        assert_eq!(validate_claims(&c, now), Ok(()));
    }

    #[test]
    fn rejects_at_expiry_instant() {
        let now = Utc::now();
        let c = claims(now.timestamp() - 60, now.timestamp());
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::Expired));
    }

    #[test]
    fn rejects_future_issuance_beyond_leeway() {
        let now = Utc::now();
        let c = claims(now.timestamp() + 3600, now.timestamp() + 7200);
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::NotYetValid));
    }

    #[test]
    fn rejects_inverted_window() {
        let now = Utc::now();
        let c = claims(now.timestamp(), now.timestamp());
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::InvalidTimeWindow));
    }
}
