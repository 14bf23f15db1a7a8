pub mod access_token;
pub mod user;
pub mod user_identity;

pub use access_token::{AccessToken, AccessTokenRow, TerminationSource, TokenSource};
pub use user::{User, UserResponse};
pub use user_identity::PasswordIdentity;
