use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use config as cfg;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::layout::TrialLayout;

/// Environment variables that mark a cloud deployment without a local
/// container engine.
const PRODUCTION_MARKERS: [&str; 3] = ["RAILWAY_ENVIRONMENT", "RENDER", "HEROKU"];

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    /// Directory holding `templates/` and `static/`.
    #[serde(default)]
    pub frontend_dir: Option<PathBuf>,
    /// Public landing page served at `/`.
    #[serde(default)]
    pub landing_page: Option<PathBuf>,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".into()
    }

    fn default_port() -> u16 {
        8000
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            frontend_dir: None,
            landing_page: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_username")]
    pub username: String,
    // Do not serialize secrets; allow deserialization from config/env only.
    #[serde(default = "AuthConfig::default_password", skip_serializing)]
    pub password: SecretString,
}

impl AuthConfig {
    fn default_username() -> String {
        "bakin".to_string()
    }

    fn default_password() -> SecretString {
        SecretString::from("ozhugu".to_string())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: Self::default_username(),
            password: Self::default_password(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Checkout of the aquatic-mapping project.
    #[serde(default = "WorkspaceConfig::default_root")]
    pub root: PathBuf,
}

impl WorkspaceConfig {
    fn default_root() -> PathBuf {
        home_dir().join("workspaces").join("aquatic-mapping")
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "ContainerConfig::default_image")]
    pub image: String,
    #[serde(default = "ContainerConfig::default_command")]
    pub command: String,
    #[serde(default = "ContainerConfig::default_name_prefix")]
    pub name_prefix: String,
    /// Host port for trial N is `vnc_base_port + N`.
    #[serde(default = "ContainerConfig::default_vnc_port")]
    pub vnc_base_port: u16,
    #[serde(default = "ContainerConfig::default_vnc_port")]
    pub container_vnc_port: u16,
    #[serde(default = "ContainerConfig::default_data_dir")]
    pub container_data_dir: String,
    #[serde(default = "ContainerConfig::default_binary")]
    pub docker_binary: String,
    #[serde(default = "ContainerConfig::default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

impl ContainerConfig {
    fn default_image() -> String {
        "aquatic-sim:latest".to_string()
    }

    fn default_command() -> String {
        "mission".to_string()
    }

    fn default_name_prefix() -> String {
        "aquatic-trial-".to_string()
    }

    fn default_vnc_port() -> u16 {
        6080
    }

    fn default_data_dir() -> String {
        "/home/simuser/aquatic-mapping/src/sampling/data/missions".to_string()
    }

    fn default_binary() -> String {
        "docker".to_string()
    }

    fn default_stop_timeout() -> u64 {
        10
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: Self::default_image(),
            command: Self::default_command(),
            name_prefix: Self::default_name_prefix(),
            vnc_base_port: Self::default_vnc_port(),
            container_vnc_port: Self::default_vnc_port(),
            container_data_dir: Self::default_data_dir(),
            docker_binary: Self::default_binary(),
            stop_timeout_secs: Self::default_stop_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "BatchConfig::default_concurrent")]
    pub default_concurrent: usize,
    #[serde(default = "BatchConfig::default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl BatchConfig {
    fn default_concurrent() -> usize {
        3
    }

    fn default_poll_interval() -> u64 {
        5
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_concurrent: Self::default_concurrent(),
            poll_interval_secs: Self::default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Interpreter; defaults to the reconstruction virtualenv.
    #[serde(default)]
    pub python: Option<PathBuf>,
    #[serde(default = "ReconstructionConfig::default_script")]
    pub script: String,
    #[serde(default = "ReconstructionConfig::default_compare_script")]
    pub compare_script: String,
    #[serde(default = "ReconstructionConfig::default_compare_timeout")]
    pub compare_timeout_secs: u64,
    #[serde(default = "ReconstructionConfig::default_grace")]
    pub terminate_grace_secs: u64,
}

impl ReconstructionConfig {
    fn default_script() -> String {
        "run_reconstruction.py".to_string()
    }

    fn default_compare_script() -> String {
        "compare_all_methods.py".to_string()
    }

    fn default_compare_timeout() -> u64 {
        30
    }

    fn default_grace() -> u64 {
        5
    }
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            python: None,
            script: Self::default_script(),
            compare_script: Self::default_compare_script(),
            compare_timeout_secs: Self::default_compare_timeout(),
            terminate_grace_secs: Self::default_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopConfig {
    #[serde(default = "DesktopConfig::default_display")]
    pub display: String,
    #[serde(default = "DesktopConfig::default_vnc_port")]
    pub vnc_port: u16,
    #[serde(default = "DesktopConfig::default_novnc_port")]
    pub novnc_port: u16,
    #[serde(default = "DesktopConfig::default_web_root")]
    pub novnc_web_root: String,
    #[serde(default = "DesktopConfig::default_password_file")]
    pub password_file: PathBuf,
    /// Directory with `start-remote-desktop.sh` / `stop-remote-desktop.sh`.
    #[serde(default)]
    pub scripts_dir: Option<PathBuf>,
    #[serde(default = "DesktopConfig::default_script_timeout")]
    pub script_timeout_secs: u64,
}

impl DesktopConfig {
    fn default_display() -> String {
        ":0".to_string()
    }

    fn default_vnc_port() -> u16 {
        5900
    }

    fn default_novnc_port() -> u16 {
        6080
    }

    fn default_web_root() -> String {
        "/usr/share/novnc/".to_string()
    }

    fn default_password_file() -> PathBuf {
        home_dir().join(".vnc").join("passwd")
    }

    fn default_script_timeout() -> u64 {
        10
    }
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            display: Self::default_display(),
            vnc_port: Self::default_vnc_port(),
            novnc_port: Self::default_novnc_port(),
            novnc_web_root: Self::default_web_root(),
            password_file: Self::default_password_file(),
            scripts_dir: None,
            script_timeout_secs: Self::default_script_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "ProxyConfig::default_host")]
    pub host: String,
    #[serde(default = "ProxyConfig::default_port")]
    pub port: u16,
    #[serde(default = "ProxyConfig::default_base_port")]
    pub base_port: u16,
    #[serde(default = "ProxyConfig::default_upstream_host")]
    pub upstream_host: String,
    #[serde(default = "ProxyConfig::default_domain_hint")]
    pub domain_hint: String,
}

impl ProxyConfig {
    fn default_host() -> String {
        "0.0.0.0".into()
    }

    fn default_port() -> u16 {
        6099
    }

    fn default_base_port() -> u16 {
        6080
    }

    fn default_upstream_host() -> String {
        "127.0.0.1".into()
    }

    fn default_domain_hint() -> String {
        "example.com".into()
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            base_port: Self::default_base_port(),
            upstream_host: Self::default_upstream_host(),
            domain_hint: Self::default_domain_hint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Set automatically on hosted deployments; disables container control.
    #[serde(default)]
    pub production: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub containers: ContainerConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub reconstruction: ReconstructionConfig,
    #[serde(default)]
    pub desktop: DesktopConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.server.host.trim().is_empty(),
            "server.host cannot be empty"
        );
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            !self.proxy.host.trim().is_empty(),
            "proxy.host cannot be empty"
        );
        anyhow::ensure!(self.proxy.port > 0, "proxy.port must be > 0");
        anyhow::ensure!(
            !self.auth.username.is_empty(),
            "auth.username cannot be empty"
        );
        anyhow::ensure!(
            self.batch.default_concurrent > 0,
            "batch.default_concurrent must be > 0"
        );
        anyhow::ensure!(
            self.batch.poll_interval_secs > 0,
            "batch.poll_interval_secs must be > 0"
        );
        anyhow::ensure!(
            !self.containers.name_prefix.is_empty(),
            "containers.name_prefix cannot be empty"
        );
        Ok(())
    }

    pub fn layout(&self) -> TrialLayout {
        TrialLayout::new(&self.workspace.root)
    }

    pub fn frontend_dir(&self) -> PathBuf {
        self.server
            .frontend_dir
            .clone()
            .unwrap_or_else(|| self.workspace.root.join("control-panel").join("frontend"))
    }

    pub fn python_path(&self) -> PathBuf {
        self.reconstruction.python.clone().unwrap_or_else(|| {
            self.layout()
                .reconstruction_dir()
                .join("venv")
                .join("bin")
                .join("python")
        })
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    settings: Settings,
    config_dir: PathBuf,
    env: String,
}

impl ConfigManager {
    pub fn load(config_dir: Option<PathBuf>, env_override: Option<String>) -> Result<Self> {
        let env_name = env_override.unwrap_or_else(default_env);
        let config_dir = config_dir.unwrap_or_else(Self::default_config_dir);
        let settings = Self::load_from_sources(&config_dir, &env_name)?;
        settings.validate()?;
        Ok(Self {
            settings,
            config_dir,
            env: env_name,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn into_settings(self) -> Settings {
        self.settings
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Get the default configuration directory.
    ///
    /// Priority order:
    /// 1. ~/.fieldpanel/ (user-level config)
    /// 2. ./config/ (project-level config)
    /// 3. Current directory (fallback)
    pub fn default_config_dir() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            let user_dir = home.join(".fieldpanel");
            if user_dir.exists() {
                info!("Using config directory: {:?}", user_dir);
                return user_dir;
            }
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }

        info!("Using config directory: {:?}", cwd);
        cwd
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let mut builder = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("FIELDPANEL").separator("__"))
            .set_override_option("auth.username", env::var("SIM_USERNAME").ok())
            .context("applying SIM_USERNAME")?
            .set_override_option("auth.password", env::var("SIM_PASSWORD").ok())
            .context("applying SIM_PASSWORD")?;

        if PRODUCTION_MARKERS.iter().any(|k| env::var_os(k).is_some()) {
            builder = builder
                .set_override("runtime.production", true)
                .context("applying production marker")?;
        }

        let settings: Settings = builder
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }
}

fn default_env() -> String {
    env::var("APP_ENV")
        .ok()
        .or_else(|| env::var("RUST_ENV").ok())
        .unwrap_or_else(|| "development".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;

    #[test]
    fn defaults_match_the_field_setup() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.proxy.port, 6099);
        assert_eq!(settings.proxy.base_port, 6080);
        assert_eq!(settings.desktop.vnc_port, 5900);
        assert_eq!(settings.auth.username, "bakin");
        assert_eq!(settings.auth.password.expose_secret(), "ozhugu");
        assert_eq!(settings.batch.default_concurrent, 3);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn file_layers_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[server]\nport = 9000\n[batch]\ndefault_concurrent = 5\n",
        )
        .unwrap();
        fs::write(dir.path().join("testing.toml"), "[server]\nport = 9100\n").unwrap();

        let settings = ConfigManager::load_from_sources(dir.path(), "testing").unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.batch.default_concurrent, 5);
        assert_eq!(settings.containers.image, "aquatic-sim:latest");
    }

    #[test]
    fn validation_rejects_zero_concurrency() {
        let mut settings = Settings::default();
        settings.batch.default_concurrent = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn serialized_settings_omit_password() {
        let rendered = toml::to_string(&Settings::default()).unwrap();
        assert!(rendered.contains("username"));
        assert!(!rendered.contains("ozhugu"));
    }

    #[test]
    fn python_defaults_to_reconstruction_venv() {
        let mut settings = Settings::default();
        settings.workspace.root = PathBuf::from("/srv/aquatic");
        assert_eq!(
            settings.python_path(),
            PathBuf::from("/srv/aquatic/reconstruction/venv/bin/python")
        );
    }
}
