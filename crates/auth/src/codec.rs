//! Signed, time-boxed access credentials (HS256 JWT).
//!
//! Stateless on purpose: verification needs only the signing key and a clock,
//! so it runs lock-free on the request hot path. Early revocation happens at the
//! session layer, on refresh.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::warn;

use precinct_core::{Clock, PrincipalId};

use crate::claims::{validate_claims, AccessClaims, TokenValidationError};
use crate::Role;

/// Below this many bytes an HMAC key is accepted but flagged.
const RECOMMENDED_KEY_BYTES: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No usable signing key; raised at construction, never per request.
    #[error("signing key is missing")]
    MissingSigningKey,

    #[error("credential is malformed")]
    Malformed,

    #[error("credential signature is invalid")]
    SignatureInvalid,

    #[error("credential has expired")]
    Expired,
}

/// A freshly minted access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Identity recovered from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    pub principal_id: PrincipalId,
    pub badge: String,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub claims: AccessClaims,
}

/// Verification seam used by the request pipeline.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<VerifiedCredential, CredentialError>;
}

/// Issues and verifies HS256 access tokens with a fixed TTL.
#[derive(Clone)]
pub struct Hs256CredentialCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl core::fmt::Debug for Hs256CredentialCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256CredentialCodec")
            .field("key", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Hs256CredentialCodec {
    pub fn new(secret: &[u8], ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self, CredentialError> {
        if secret.is_empty() {
            return Err(CredentialError::MissingSigningKey);
        }
        if secret.len() < RECOMMENDED_KEY_BYTES {
            warn!(
                key_bytes = secret.len(),
                recommended = RECOMMENDED_KEY_BYTES,
                "signing key is shorter than recommended"
            );
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock in `verify`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
            clock,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(
        &self,
        principal_id: PrincipalId,
        badge: &str,
        role: Role,
    ) -> Result<IssuedCredential, CredentialError> {
        let issued_at = self.clock.now();
        let expires_at = issued_at + self.ttl;

        let claims = AccessClaims {
            sub: principal_id,
            badge: badge.to_string(),
            role: role.as_str().to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| CredentialError::MissingSigningKey)?;

        Ok(IssuedCredential {
            token,
            issued_at: claims.issued_at(),
            expires_at: claims.expires_at(),
        })
    }

    /// Verify against an explicit instant instead of the codec's clock.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedCredential, CredentialError> {
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    CredentialError::SignatureInvalid
                }
                ErrorKind::ExpiredSignature => CredentialError::Expired,
                _ => CredentialError::Malformed,
            })?;
        let claims = data.claims;

        validate_claims(&claims, now).map_err(|e| match e {
            TokenValidationError::Expired => CredentialError::Expired,
            TokenValidationError::NotYetValid | TokenValidationError::InvalidTimeWindow => {
                CredentialError::Malformed
            }
        })?;

        let role = Role::parse(&claims.role).ok_or(CredentialError::Malformed)?;

        Ok(VerifiedCredential {
            principal_id: claims.sub,
            badge: claims.badge.clone(),
            role,
            issued_at: claims.issued_at(),
            expires_at: claims.expires_at(),
            claims,
        })
    }
}

impl CredentialVerifier for Hs256CredentialCodec {
    fn verify(&self, token: &str) -> Result<VerifiedCredential, CredentialError> {
        self.verify_at(token, self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use precinct_core::ManualClock;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn codec(clock: Arc<ManualClock>) -> Hs256CredentialCodec {
        Hs256CredentialCodec::new(SECRET, Duration::minutes(15), clock).unwrap()
    }

    #[test]
    fn issue_then_verify_round_trips() {
        let clock = ManualClock::starting_now();
        let codec = codec(clock.clone());
        let id = PrincipalId::new();

        let issued = codec.issue(id, "BF-0042", Role::Agent).unwrap();
        let verified = codec.verify(&issued.token).unwrap();

        assert_eq!(verified.principal_id, id);
        assert_eq!(verified.badge, "BF-0042");
        assert_eq!(verified.role, Role::Agent);
        assert_eq!(verified.expires_at, issued.expires_at);
    }

    #[test]
    fn expires_after_ttl_on_simulated_clock() {
        let clock = ManualClock::starting_now();
        let codec = codec(clock.clone());
        let issued = codec.issue(PrincipalId::new(), "BF-0042", Role::Officier).unwrap();

        clock.advance(Duration::minutes(14));
        assert!(codec.verify(&issued.token).is_ok());

        clock.advance(Duration::minutes(1));
        assert_eq!(codec.verify(&issued.token), Err(CredentialError::Expired));
    }

    #[test]
    fn wrong_key_is_signature_invalid() {
        let clock = ManualClock::starting_now();
        let issued = codec(clock.clone())
            .issue(PrincipalId::new(), "BF-1", Role::Admin)
            .unwrap();
        let other = Hs256CredentialCodec::new(b"another-secret-another-secret-!!", Duration::minutes(15), clock)
            .unwrap();

        assert_eq!(other.verify(&issued.token), Err(CredentialError::SignatureInvalid));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let clock = ManualClock::starting_now();
        let codec = codec(clock);
        let issued = codec.issue(PrincipalId::new(), "BF-7", Role::Agent).unwrap();

        // Swap the payload for one claiming the admin role, keep the signature.
        let forged = codec.issue(PrincipalId::new(), "BF-7", Role::Admin).unwrap();
        let parts: Vec<&str> = issued.token.split('.').collect();
        let forged_parts: Vec<&str> = forged.token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_parts[1], parts[2]);

        assert_eq!(codec.verify(&tampered), Err(CredentialError::SignatureInvalid));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec(ManualClock::starting_now());
        assert_eq!(codec.verify("not-a-token"), Err(CredentialError::Malformed));
        assert_eq!(codec.verify(""), Err(CredentialError::Malformed));
    }

    #[test]
    fn unknown_role_in_signed_token_is_malformed() {
        let clock = ManualClock::starting_now();
        let codec = codec(clock.clone());
        let now = clock.now();
        let claims = AccessClaims {
            sub: PrincipalId::new(),
            badge: "BF-9".to_string(),
            role: "superuser".to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(5)).timestamp(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert_eq!(codec.verify(&token), Err(CredentialError::Malformed));
    }

    #[test]
    fn empty_key_is_a_configuration_error() {
        let err = Hs256CredentialCodec::new(b"", Duration::minutes(15), ManualClock::starting_now())
            .unwrap_err();
        assert_eq!(err, CredentialError::MissingSigningKey);
    }
}
