//! Tool configuration, read from JSON.
//!
//! Every section falls back to its defaults, so a config file only needs the
//! keys it changes.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::TextLimits;
use crate::lint::LintConfig;
use crate::optimizer::Optimizer;
use crate::output::write_atomic;
use crate::store::PointerTable;
use crate::table::TableOptions;
use crate::tm::TmBuilder;
use crate::validate::ValidatorConfig;
use crate::{QuestError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TmConfig {
    pub source_lang: String,
    pub target_lang: String,
    pub fuzzy_threshold: f64,
}

impl Default for TmConfig {
    fn default() -> Self {
        Self {
            source_lang: "en".to_string(),
            target_lang: "ja".to_string(),
            fuzzy_threshold: 0.8,
        }
    }
}

impl TmConfig {
    pub fn builder(&self) -> TmBuilder {
        TmBuilder {
            fuzzy_threshold: self.fuzzy_threshold,
            ..TmBuilder::new(&self.source_lang, &self.target_lang)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub table: TableOptions,
    pub pointers: PointerTable,
    pub limits: TextLimits,
    pub lint: LintConfig,
    pub validator: ValidatorConfig,
    pub optimizer: Optimizer,
    pub tm: TmConfig,
    /// Extensions (without the dot) picked up when a directory is given.
    pub script_extensions: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            table: TableOptions::default(),
            pointers: PointerTable::default(),
            limits: TextLimits::default(),
            lint: LintConfig::default(),
            validator: ValidatorConfig::default(),
            optimizer: Optimizer::default(),
            tm: TmConfig::default(),
            script_extensions: vec!["txt".to_string(), "evs".to_string(), "script".to_string()],
        }
    }
}

impl ToolConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| QuestError::Config(e.to_string()))
    }

    /// Load `path`. A missing file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load an explicit path, or `fallback` when there is one.
    /// A missing fallback file gives the built-in defaults.
    pub fn load_or_default(explicit: Option<&Path>, fallback: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match fallback {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("no config file; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(path, serde_json::to_string_pretty(self)?.as_bytes())
    }
}
