pub mod password;
pub mod validation;

pub use password::{verify_password, Password, PasswordHashString, PasswordHasher};
pub use validation::ValidatedJson;
