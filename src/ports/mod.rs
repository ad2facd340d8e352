pub mod capability_loader;
pub mod environment;
pub mod http_client;
pub mod remote_service;
