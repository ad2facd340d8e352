pub mod console_auditor;
pub mod environment;
pub mod http_client;
pub mod http_handler;
pub mod module_registry;
pub mod remote_service;

/// Re-export commonly used types from adapters
pub use console_auditor::ConsoleAuditor;
pub use environment::ProcessEnv;
pub use http_client::HttpClientAdapter;
pub use http_handler::proxy_route;
pub use module_registry::ModuleRegistry;
pub use remote_service::ReqwestRemoteService;
