pub mod identity;
pub mod lifecycle;

pub use identity::{CurrentIdentity, MaybeIdentity};
pub use lifecycle::request_lifecycle_middleware;
