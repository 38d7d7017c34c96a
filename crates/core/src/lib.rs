//! `precinct-core`: identifiers, errors and time shared by every layer.
//!
//! This crate contains no infrastructure concerns.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{DeviceId, OrgUnitId, PrincipalId, SessionId};
