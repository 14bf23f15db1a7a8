pub mod authenticator;
pub mod error;
pub mod identity_resolver;
pub mod token_codec;
pub mod token_store;
pub mod users;

pub use authenticator::{Credentials, PasswordAuthenticator};
pub use error::{AuthenticationError, IdentityError, StoreError, TokenError};
pub use identity_resolver::{Evidence, IdentityResolver, Provenance, RequestAuthCache, ResolvedIdentity};
pub use token_codec::{TokenCodec, EXPIRED_COOKIE_VALUE};
pub use token_store::{MemoryTokenStore, PgTokenStore, TokenStore};
pub use users::{MemoryUserDirectory, PgUserDirectory, UserDirectory};
