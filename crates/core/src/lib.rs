//! `lecture-core`: shared building blocks for the lecture platform auth core.
//!
//! This crate contains identifiers, the clock seam and the domain error model
//! (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{GroupId, PrincipalId, ResourceId};
