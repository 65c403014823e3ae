pub mod graceful_shutdown;
pub mod path;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
pub use path::{forward_uri, match_suffix, normalize_path};
