pub mod authority;
pub mod liveness;
pub mod tokens;

pub use authority::{TokenAuthority, TokenPair};
pub use liveness::LivenessStore;
pub use tokens::{AuthError, Claims};
