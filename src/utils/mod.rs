pub mod graceful_shutdown;
pub mod headers;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason};
pub use headers::{end_to_end, header_names, is_hop_by_hop, strip_hop_by_hop};
