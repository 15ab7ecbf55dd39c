pub mod authority;
pub mod error;
pub mod factory;
pub mod identity;
pub mod session;
pub mod token;

pub use authority::{
    AuthorityConfig, AuthorityError, HttpIdentityAuthority, IdentityAuthority, RemoteIdentity,
    SignedIn,
};
pub use error::{SessionError, SessionErrorKind};
pub use factory::build_authority;
pub use identity::{EvictionPolicy, IdentityState, TokenRecord};
pub use session::{LockMode, Session, SessionPolicy, TokenSessions, ValidateOptions};
