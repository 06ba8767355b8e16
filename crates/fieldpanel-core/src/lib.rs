pub mod cleanup;
pub mod config;
pub mod error;
pub mod layout;
pub mod missions;
pub mod results;

pub use cleanup::*;
pub use config::{
    AuthConfig, BatchConfig, ConfigManager, ContainerConfig, DesktopConfig, LoggingConfig,
    ProxyConfig, ReconstructionConfig, RuntimeConfig, ServerConfig, Settings, WorkspaceConfig,
};
pub use error::*;
pub use layout::*;
pub use missions::*;
pub use results::*;
