//! Process-wide defaults: worker-pool/bucket sizing, the CityJSON LoD-mapping table,
//! and extra namespace declarations loaded from `--extensions`. A serde-facing file
//! struct with defaulted fields, converted once into an immutable runtime struct.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use color_eyre::eyre::{self, Context};
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::io::cityjson::{LodMappingPolicy, LodSelectionMode};

#[derive(Debug, Clone)]
pub struct Config {
    worker_pool_size: usize,
    queue_capacity: usize,
    texture_bucket_count: u32,
    lod_mapping: Arc<LodMappingPolicy>,
    extra_namespaces: Arc<[(String, String)]>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    worker_pool_size: Option<usize>,
    queue_capacity: Option<usize>,
    texture_bucket_count: Option<u32>,
    #[serde(default)]
    lod_mapping_mode: Option<String>,
    #[serde(default)]
    lod_mapping_overrides: FxHashMap<u8, String>,
    #[serde(default)]
    extra_namespaces: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            worker_pool_size: num_cpus::get().max(2),
            queue_capacity: 256,
            texture_bucket_count: 0,
            lod_mapping: Arc::new(LodMappingPolicy::default()),
            extra_namespaces: Arc::new([]),
        }
    }
}

impl Config {
    pub fn from_toml_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).wrap_err_with(|| format!("failed to read config: {path:?}"))?;
        Self::from_toml_str(&s).wrap_err_with(|| format!("failed to parse TOML config: {path:?}"))
    }

    pub fn from_toml_str(toml_str: &str) -> eyre::Result<Self> {
        let file_cfg: ConfigFile = toml::from_str(toml_str)?;
        Ok(Self::from_file_config(file_cfg))
    }

    fn from_file_config(file_cfg: ConfigFile) -> Self {
        let default = Config::default();
        let mode = match file_cfg.lod_mapping_mode.as_deref() {
            Some("minimum") => LodSelectionMode::Minimum,
            _ => LodSelectionMode::Maximum,
        };
        Config {
            worker_pool_size: file_cfg.worker_pool_size.unwrap_or(default.worker_pool_size),
            queue_capacity: file_cfg.queue_capacity.unwrap_or(default.queue_capacity),
            texture_bucket_count: file_cfg.texture_bucket_count.unwrap_or(default.texture_bucket_count),
            lod_mapping: Arc::new(LodMappingPolicy {
                mode,
                overrides: file_cfg.lod_mapping_overrides,
            }),
            extra_namespaces: file_cfg.extra_namespaces.into(),
        }
    }

    /// Loads additional namespace declarations from every `*.xml`/`*.txt` file under
    /// `dir`, one `prefix=uri` pair per non-empty, non-comment line — the same shape
    /// `--extensions` is documented to accept.
    pub fn load_extensions(&mut self, dir: impl AsRef<Path>) -> eyre::Result<()> {
        let dir = dir.as_ref();
        let mut extra: Vec<(String, String)> = self.extra_namespaces.to_vec();
        for entry in fs::read_dir(dir).wrap_err_with(|| format!("failed to read extensions dir: {dir:?}"))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let contents = fs::read_to_string(entry.path())?;
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((prefix, uri)) = line.split_once('=') {
                    extra.push((prefix.trim().to_string(), uri.trim().to_string()));
                }
            }
        }
        self.extra_namespaces = extra.into();
        Ok(())
    }

    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn texture_bucket_count(&self) -> u32 {
        self.texture_bucket_count
    }

    pub fn lod_mapping(&self) -> Arc<LodMappingPolicy> {
        Arc::clone(&self.lod_mapping)
    }

    pub fn extra_namespaces(&self) -> &[(String, String)] {
        &self.extra_namespaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pick_a_sane_worker_pool() {
        let cfg = Config::default();
        assert!(cfg.worker_pool_size() >= 2);
        assert_eq!(cfg.texture_bucket_count(), 0);
    }

    #[test]
    fn toml_overrides_merge_over_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            worker_pool_size = 4
            texture_bucket_count = 8
            lod_mapping_mode = "minimum"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.worker_pool_size(), 4);
        assert_eq!(cfg.texture_bucket_count(), 8);
        assert_eq!(cfg.lod_mapping().citygml_to_cityjson(2), "2.0");
    }
}
