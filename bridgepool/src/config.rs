#![allow(dead_code)]
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize, Clone)]
pub struct RunConfig {
    pub sources: Option<String>,
    pub scope: Option<String>,
    pub lab: Option<bool>,
    pub operation: Option<String>,
    pub timeout_ms: Option<u64>,
    pub actor: Option<String>,
    pub reference: Option<String>,
    pub format: Option<String>,
    pub catalog: Option<PathBuf>,
    pub directory_urls: Option<Vec<String>>,
    pub partner_urls: Option<Vec<String>>,
    pub partner_token: Option<String>,
    pub scan_target: Option<String>,
    pub scan_ports: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct AssessConfig {
    pub lab: Option<bool>,
    pub actor: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub run: Option<RunConfig>,
    pub assess: Option<AssessConfig>,
}

pub fn load_config(path: Option<&Path>) -> Option<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("bridgepool.yaml");
            if p.exists() { p.to_path_buf() } else { return None; }
        }
    };
    let s = fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&s).ok()
}
