//! Project configuration, read from `.solcover.json` in the project root.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, SolcovError};

pub const CONFIG_FILE: &str = ".solcover.json";

/// Every field is optional in the file; missing ones take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory searched for `.sol` files.
    pub contracts_dir: PathBuf,
    /// File names (or paths relative to `contracts_dir`) left alone.
    pub skip_files: Vec<String>,
    pub silent: bool,
    /// Event log captured from the execution node.
    pub events_file: PathBuf,
    /// Where instrumented copies of the contracts are written.
    pub instrumented_dir: PathBuf,
    /// Zeroed coverage maps produced by `instrument`.
    pub map_file: PathBuf,
    /// Final aggregated report.
    pub output: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            contracts_dir: PathBuf::from("contracts"),
            skip_files: vec!["Migrations.sol".to_string()],
            silent: false,
            events_file: PathBuf::from("allFiredEvents"),
            instrumented_dir: PathBuf::from("coverageEnv/contracts"),
            map_file: PathBuf::from("coverageEnv/coverageMap.json"),
            output: PathBuf::from("coverage.json"),
        }
    }
}

impl Config {
    /// Load `<project>/.solcover.json`, or the defaults if there is none.
    pub fn load(project: &Path) -> Result<Self> {
        let path = project.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Self::parse(&text).map_err(|e| SolcovError::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Resolve a configured path against the project root.
    pub fn resolve(project: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project.join(path)
        }
    }
}
