pub mod auth;
pub mod error;
pub mod session;
pub mod store;

pub use session::{PendingAuthorization, Session};
pub use store::{CredentialStore, Entry, StoreStats, SweepReport, UnauthorizedSessionError};
