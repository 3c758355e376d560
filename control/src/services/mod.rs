pub mod fanout;
pub mod local_configs;
pub mod management_key;
pub mod node_registry;
pub mod operation_log;
pub mod orchestrator;

pub use fanout::FanOutExecutor;
pub use local_configs::LocalConfigStore;
pub use management_key::ManagementKeyManager;
pub use node_registry::NodeRegistry;
pub use operation_log::OperationLog;
pub use orchestrator::ConfigOrchestrator;
