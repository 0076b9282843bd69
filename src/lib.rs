// regionup - Crash-safe region file updater engine for game servers
//
// This library implements the update session engine: the confirm/countdown/
// execute protocol, the recycle-bin replacement primitive with transactional
// rollback, and the upstream-extraction abstraction the session drives.
// Command parsing and concrete host-process integration live in the
// embedding layer, which talks to this crate through `ServerHandle` and the
// session's event channel.

pub mod config;
pub mod executor;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod permission;
pub mod recycle;
pub mod server;
pub mod session;
pub mod upstream;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use history::{History, HistoryRecord};
pub use metrics::Metrics;
pub use models::{Config, Region};
pub use permission::{GroupManager, GroupPermission, PermissionDenied};
pub use recycle::{RecycleBin, RecycleError, RecycledSlot};
pub use server::{ServerError, ServerHandle};
pub use session::{SessionError, SessionEvent, SessionOutcome, SessionState, UpdateSession};
pub use upstream::{Upstream, UpstreamError, UpstreamRegistry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
