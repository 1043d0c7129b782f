//! `khata-core` — shared building blocks for every service.
//!
//! Pure types only: identifiers, time, and the validation/domain error model.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult, FieldError, ValidationErrors};
pub use id::{
    BusinessId, InvitationId, PasswordId, ProductCategoryId, SessionId, UserId,
    VerificationRequestId,
};
