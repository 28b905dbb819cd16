//! Identity and access: token claims, user resolution, and membership checks.

mod guard;
mod resolver;
mod token;

pub use chat_types::{MemoryError, TokenClaims, TokenError};
pub use guard::AccessGuard;
pub use resolver::IdentityResolver;
pub use token::parse_claims;
