//! Request extractors for device signals and bearer sessions.

mod session;
mod signals;

pub use session::{bearer_token, Session};
pub use signals::{client_address, ClientSignals};
