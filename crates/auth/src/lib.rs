//! `khata-auth` — account lifecycle: registration, verification, login,
//! password recovery, businesses and invitations.
//!
//! Storage is behind [`store::AccountStore`]; HTTP lives in `khata-api`.

pub mod claims;
pub mod crypto;
pub mod error;
pub mod model;
pub mod password;
pub mod service;
pub mod store;
pub mod token;
pub mod validation;

pub use claims::{AccessClaims, TokenValidationError, validate_claims};
pub use error::{AccountError, AccountResult};
pub use model::{
    Business, BusinessUser, Invitation, OWNER_ROLE, Password, Session, User, VerificationKind,
    VerificationRequest,
};
pub use password::{BcryptHasher, HashError, MAX_PASSWORD_BYTES, MIN_PASSWORD_LEN, PasswordHasher};
pub use service::{
    AccountPolicy, AccountService, BusinessSummary, ChangePasswordInput, ClientInfo,
    CreateBusinessInput, InviteInput, LoginInput, LoginOutcome, Profile, RegisterInput,
    ResetPasswordInput, SideTasks, VerifyInput, parse_business_id,
};
pub use store::{AccountStore, AccountTransaction, InMemoryAccountStore, StoreError, StoreResult};
pub use token::{AccessToken, DEFAULT_ISSUER, TokenError, TokenIssuer, TokenSubject};
