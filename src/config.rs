//! Controller configuration.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Config file (TOML), when one is given
//! 3. Environment variables (`TSCHCTL_*`)
//!
//! Each layer overrides the previous. The result is validated once, at
//! the end.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ControllerError, ControllerResult};
use crate::frame::{SlotFrame, MAX_CHANNELS};
use crate::mesh::Mesh;
use crate::node::{NodeId, DEFAULT_PORT};
use crate::reflector::ChurnSettings;

/// Overwrite `$field` with the parsed value of `$var`, if set.
macro_rules! parse_env {
    ($field:expr, $var:literal) => {
        if let Ok(val) = std::env::var($var) {
            $field = val.parse().map_err(|e| ControllerError::InvalidEnvVar {
                name: $var.to_string(),
                message: format!("{}", e),
            })?;
        }
    };
}

// ── Types ─────────────────────────────────────────────────────────────

/// Full controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub network: NetworkConfig,
    pub churn: ChurnConfig,
    pub allocator: AllocatorConfig,
    pub frames: Vec<FrameConfig>,
    pub policy: PolicyConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            network: NetworkConfig::default(),
            churn: ChurnConfig::default(),
            allocator: AllocatorConfig::default(),
            frames: vec![
                FrameConfig {
                    name: "Broadcast-Frame".into(),
                    size: 25,
                    role: FrameRole::Broadcast,
                },
                FrameConfig {
                    name: "Unicast-Frame".into(),
                    size: 21,
                    role: FrameRole::Unicast,
                },
            ],
            policy: PolicyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub name: String,
    /// Border router address: full IPv6 or bare interface id.
    pub border_router: String,
    pub port: u16,
    /// First 16 bits of the /64 prefix, in hex.
    pub prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            name: "tsch".into(),
            border_router: "1".into(),
            port: DEFAULT_PORT,
            prefix: "aaaa".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnConfig {
    pub lost_child_ticks: u32,
    pub probe_ratio: f64,
    /// Wall-clock length of a tick for the async driver.
    pub tick_millis: u64,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        ChurnConfig {
            lost_child_ticks: 30,
            probe_ratio: 0.9,
            tick_millis: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub channels: u8,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            channels: MAX_CHANNELS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameRole {
    Broadcast,
    Unicast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameConfig {
    pub name: String,
    pub size: u16,
    pub role: FrameRole,
}

/// Link-quality policy thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// ETX at or above which a link is blacklisted.
    pub etx_ceiling: f64,
    /// PRR at or below which a link is blacklisted.
    pub prr_floor: f64,
    /// Ticks between link-quality sweeps.
    pub statistics_period: u32,
    pub metrics: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            etx_ceiling: 800.0,
            prr_floor: 30.0,
            statistics_period: 60,
            metrics: vec!["PRR".into(), "RSSI".into(), "ETX".into()],
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────

impl ControllerConfig {
    pub fn from_toml(content: &str) -> ControllerResult<Self> {
        toml::from_str(content).map_err(|e| ControllerError::ConfigParse(e.to_string()))
    }

    pub fn to_toml(&self) -> ControllerResult<String> {
        toml::to_string_pretty(self).map_err(|e| ControllerError::ConfigParse(e.to_string()))
    }

    pub fn prefix(&self) -> ControllerResult<u16> {
        u16::from_str_radix(self.network.prefix.trim(), 16)
            .map_err(|_| ControllerError::InvalidConfig(format!("bad prefix '{}'", self.network.prefix)))
    }

    pub fn border_router(&self) -> ControllerResult<NodeId> {
        let parsed = NodeId::parse_with_prefix(&self.network.border_router, self.prefix()?)?;
        Ok(NodeId::new(parsed.address(), self.network.port))
    }

    /// The first frame with `role`.
    pub fn frame(&self, role: FrameRole) -> ControllerResult<&FrameConfig> {
        self.frames
            .iter()
            .find(|f| f.role == role)
            .ok_or_else(|| ControllerError::InvalidConfig(format!("no {:?} frame configured", role)))
    }

    pub fn slotframes(&self) -> Vec<SlotFrame> {
        self.frames.iter().map(|f| SlotFrame::new(f.name.clone(), f.size)).collect()
    }

    /// An empty mesh rooted at the border router.
    pub fn mesh(&self) -> ControllerResult<Mesh> {
        Mesh::new(self.border_router()?)
            .with_prefix(self.prefix()?)
            .with_channels(self.allocator.channels)
    }

    pub fn churn_settings(&self) -> ChurnSettings {
        ChurnSettings {
            lost_child_ticks: self.churn.lost_child_ticks,
            probe_ratio: self.churn.probe_ratio,
        }
    }

    /// Reject values the controller cannot run with.
    pub fn validate(&self) -> ControllerResult<()> {
        let invalid = |msg: String| Err(ControllerError::InvalidConfig(msg));
        self.border_router()?;
        if self.allocator.channels == 0 || self.allocator.channels > MAX_CHANNELS {
            return invalid(format!(
                "allocator.channels must be in 1..={}, got {}",
                MAX_CHANNELS, self.allocator.channels
            ));
        }
        if !(self.churn.probe_ratio > 0.0 && self.churn.probe_ratio < 1.0) {
            return invalid(format!("churn.probe_ratio must be in (0, 1), got {}", self.churn.probe_ratio));
        }
        if self.churn.lost_child_ticks == 0 || self.churn.tick_millis == 0 {
            return invalid("churn.lost_child_ticks and churn.tick_millis must be positive".into());
        }
        if self.policy.statistics_period == 0 {
            return invalid("policy.statistics_period must be positive".into());
        }
        let mut names = BTreeSet::new();
        for f in &self.frames {
            if f.size <= 1 {
                return invalid(format!("frame '{}' needs more than one slot", f.name));
            }
            if !names.insert(f.name.as_str()) {
                return invalid(format!("frame '{}' defined twice", f.name));
            }
        }
        self.frame(FrameRole::Broadcast)?;
        self.frame(FrameRole::Unicast)?;
        Ok(())
    }
}

// ── Loader ────────────────────────────────────────────────────────────

/// Layered configuration loader.
///
/// ```ignore
/// let config = ConfigLoader::new()
///     .with_file("tschctl.toml")
///     .skip_env_vars()
///     .load()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read this TOML file on top of the defaults. It must exist.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Ignore `TSCHCTL_*` variables.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn load(&self) -> ControllerResult<ControllerConfig> {
        let mut config = match &self.file {
            Some(path) => {
                let config = Self::load_file(path)?;
                debug!(path = %path.display(), "loaded config file");
                config
            }
            None => ControllerConfig::default(),
        };
        if !self.skip_env {
            Self::apply_env_vars(&mut config)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> ControllerResult<ControllerConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| ControllerError::ConfigRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        ControllerConfig::from_toml(&content)
    }

    fn apply_env_vars(config: &mut ControllerConfig) -> ControllerResult<()> {
        parse_env!(config.network.name, "TSCHCTL_NETWORK");
        parse_env!(config.network.border_router, "TSCHCTL_BORDER_ROUTER");
        parse_env!(config.network.port, "TSCHCTL_PORT");
        parse_env!(config.network.prefix, "TSCHCTL_PREFIX");
        parse_env!(config.churn.lost_child_ticks, "TSCHCTL_LOST_CHILD_TICKS");
        Ok(())
    }
}
