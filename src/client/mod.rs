mod session;

pub use session::{SessionGuard, SessionState};
