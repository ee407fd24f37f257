//! Provisioner configuration.
//!
//! Layered as defaults → optional TOML file → environment. The file format:
//!
//! ```toml
//! [docker]
//! socket = "/var/run/docker.sock"
//! inside = true
//! net_admin = false
//! network = "flowbox-network"
//! public_ip = "0.0.0.0"
//! work_dir = "/srv/flowbox/data"
//! default_image = "debian:latest"
//! self_container_id = "3f2a..."
//!
//! [storage]
//! data_dir = "/data"
//!
//! [cleanup]
//! max_in_flight = 16
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub const DEFAULT_IMAGE: &str = "debian:latest";
pub const DEFAULT_PUBLIC_IP: &str = "0.0.0.0";
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Validated inputs for building the orchestrator topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Explicit host-side daemon socket path.
    pub docker_socket: Option<String>,
    /// The orchestrator runs inside a container and spawned containers get
    /// the daemon socket mounted.
    pub inside: bool,
    /// Grant NET_RAW and NET_ADMIN to spawned containers.
    pub net_admin: bool,
    pub network: Option<String>,
    pub public_ip: String,
    /// Data directory as seen by this process.
    pub data_dir: PathBuf,
    /// Explicit host-side path backing `data_dir`.
    pub work_dir: Option<PathBuf>,
    /// Image substituted when pulling the requested one fails.
    pub default_image: String,
    /// Self-reported container id; skips hostname matching when set.
    pub self_container_id: Option<String>,
    /// Upper bound on concurrent deletions during cleanup.
    pub cleanup_max_in_flight: Option<usize>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            docker_socket: None,
            inside: false,
            net_admin: false,
            network: None,
            public_ip: DEFAULT_PUBLIC_IP.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            work_dir: None,
            default_image: DEFAULT_IMAGE.to_string(),
            self_container_id: None,
            cleanup_max_in_flight: None,
        }
    }
}

/// Raw TOML structure for the config file.
#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    #[serde(default)]
    docker: DockerSection,
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    cleanup: CleanupSection,
}

#[derive(Debug, Default, Deserialize)]
struct DockerSection {
    socket: Option<String>,
    inside: Option<bool>,
    net_admin: Option<bool>,
    network: Option<String>,
    public_ip: Option<String>,
    work_dir: Option<PathBuf>,
    default_image: Option<String>,
    self_container_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct CleanupSection {
    max_in_flight: Option<usize>,
}

impl ProvisionerConfig {
    /// Load from an optional TOML file, then the process environment (after
    /// reading `.env` if present), and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file over the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let toml: ConfigToml = toml::from_str(content)?;
        let mut config = Self::default();

        let docker = toml.docker;
        if docker.socket.is_some() {
            config.docker_socket = docker.socket;
        }
        if let Some(inside) = docker.inside {
            config.inside = inside;
        }
        if let Some(net_admin) = docker.net_admin {
            config.net_admin = net_admin;
        }
        if docker.network.is_some() {
            config.network = docker.network;
        }
        if let Some(ip) = docker.public_ip {
            config.public_ip = ip;
        }
        if docker.work_dir.is_some() {
            config.work_dir = docker.work_dir;
        }
        if let Some(image) = docker.default_image {
            config.default_image = image;
        }
        if docker.self_container_id.is_some() {
            config.self_container_id = docker.self_container_id;
        }
        if let Some(dir) = toml.storage.data_dir {
            config.data_dir = dir;
        }
        if toml.cleanup.max_in_flight.is_some() {
            config.cleanup_max_in_flight = toml.cleanup.max_in_flight;
        }

        Ok(config)
    }

    /// Overlay environment values. `lookup` returns the value of a variable;
    /// empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(socket) = get("DOCKER_SOCKET") {
            self.docker_socket = Some(socket);
        }
        if let Some(inside) = get("DOCKER_INSIDE") {
            self.inside = parse_bool("DOCKER_INSIDE", &inside)?;
        }
        if let Some(net_admin) = get("DOCKER_NET_ADMIN") {
            self.net_admin = parse_bool("DOCKER_NET_ADMIN", &net_admin)?;
        }
        if let Some(network) = get("DOCKER_NETWORK") {
            self.network = Some(network);
        }
        if let Some(ip) = get("DOCKER_PUBLIC_IP") {
            self.public_ip = ip;
        }
        if let Some(dir) = get("DOCKER_WORK_DIR") {
            self.work_dir = Some(PathBuf::from(dir));
        }
        if let Some(image) = get("DOCKER_DEFAULT_IMAGE") {
            self.default_image = image;
        }
        if let Some(dir) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(id) = get("FLOWBOX_SELF_CONTAINER_ID") {
            self.self_container_id = Some(id);
        }
        if let Some(limit) = get("FLOWBOX_CLEANUP_CONCURRENCY") {
            let limit = limit
                .trim()
                .parse::<usize>()
                .with_context(|| format!("FLOWBOX_CLEANUP_CONCURRENCY must be a number, got '{}'", limit))?;
            self.cleanup_max_in_flight = Some(limit);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.public_ip
            .parse::<IpAddr>()
            .with_context(|| format!("Invalid public IP '{}'", self.public_ip))?;
        if self.data_dir.as_os_str().is_empty() {
            bail!("Data directory must not be empty");
        }
        if let Some(dir) = &self.work_dir
            && !dir.is_absolute()
        {
            bail!("Host work directory must be absolute, got {}", dir.display());
        }
        if self.default_image.trim().is_empty() {
            bail!("Default image must not be empty");
        }
        if self.cleanup_max_in_flight == Some(0) {
            bail!("Cleanup concurrency must be at least 1");
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{} must be a boolean, got '{}'", key, other),
    }
}
