pub mod connection;
pub mod enrich;
pub mod handlers;
pub mod registry;

use std::sync::Arc;

use chatty_auth::TokenAuthority;
use chatty_db::Database;
use chatty_push::DefaultNotifier;

use registry::Registry;

/// Everything a live connection needs: the process-local session
/// registry plus the shared collaborators.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Registry,
    pub db: Arc<Database>,
    pub authority: Arc<TokenAuthority>,
    pub notifier: Arc<DefaultNotifier>,
}
