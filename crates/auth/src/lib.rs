//! `precinct-auth`: credential codec and authorization model.
//!
//! This crate is intentionally decoupled from HTTP and storage: method and path
//! arrive as plain strings, time arrives through a [`precinct_core::Clock`].

pub mod authorize;
pub mod claims;
pub mod codec;
pub mod infer;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod table;

pub use authorize::{authorize, authorize_role, explain_authorization, AuthorizationExplanation, AuthzError};
pub use claims::{validate_claims, AccessClaims, TokenValidationError};
pub use codec::{CredentialError, CredentialVerifier, Hs256CredentialCodec, IssuedCredential, VerifiedCredential};
pub use infer::{infer_permission, InferError};
pub use password::{hash_password, verify_password, PasswordError, DECOY_PASSWORD_HASH};
pub use permissions::{Action, Permission};
pub use principal::Principal;
pub use roles::Role;
pub use table::{has_permission, permissions_for, RolePermissionTable};
