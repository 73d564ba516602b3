//! 引擎配置（TOML）。缺省字段取默认值，文件不存在时整体取默认值。

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::index::cost::COST_ROW_OFFSET;
use crate::index::IndexOptions;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// 每批从主索引读取的行数
    pub batch_size: usize,
    pub commit_every_batch: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            commit_every_batch: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cost_row_offset: u64,
    pub scan_batch_size: usize,
    pub build: BuildConfig,
    /// 快照目录；不设则索引纯内存
    pub data_dir: Option<PathBuf>,
    /// tracing EnvFilter 语法；RUST_LOG 优先
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cost_row_offset: COST_ROW_OFFSET,
            scan_batch_size: 256,
            build: BuildConfig::default(),
            data_dir: None,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// `<config_dir>/rowdex/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("rowdex").join("config.toml"))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml::from_str(text).context("invalid engine config")?;
        if cfg.scan_batch_size == 0 || cfg.build.batch_size == 0 {
            anyhow::bail!("batch sizes must be positive");
        }
        Ok(cfg)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("Config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg = Self::from_toml(&text).with_context(|| format!("in {}", path.display()))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    /// 显式路径优先，其次默认路径，都没有则默认值
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) => Self::load(&p),
            None => Ok(Self::default()),
        }
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            cost_row_offset: self.cost_row_offset,
            scan_batch_size: self.scan_batch_size,
        }
    }
}
