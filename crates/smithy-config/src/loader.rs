// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Resolved config file locations for one project.
///
/// Two layers: the writable global file and the read-only per-project
/// overlay inside the state directory.  The overlay wins on conflicts.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub global: PathBuf,
    pub project: PathBuf,
}

impl ConfigPaths {
    pub fn for_workdir(workdir: &Path) -> Self {
        Self {
            global: global_config_path(),
            project: workdir.join(".agentsmithy").join("config.yaml"),
        }
    }
}

/// The global config file: `$AGENTSMITHY_CONFIG_DIR/config.yaml` when the
/// env var is set, otherwise `~/.config/agentsmithy/config.yaml`.
pub fn global_config_path() -> PathBuf {
    if let Ok(dir) = std::env::var("AGENTSMITHY_CONFIG_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("config.yaml");
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config/agentsmithy/config.yaml")
}

/// Load configuration for a workdir: global layer, then the per-project
/// overlay deep-merged on top, then environment overrides.
pub fn load(workdir: &Path) -> anyhow::Result<Config> {
    let paths = ConfigPaths::for_workdir(workdir);
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in [&paths.global, &paths.project] {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    config.apply_env();
    Ok(config)
}

/// Persist the global layer.  The per-project overlay is never written
/// through this path; it belongs to the project, not the tool.
pub fn save_global(config: &Config) -> anyhow::Result<()> {
    let path = global_config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = serde_yaml::to_string(config).context("serializing config")?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, &text).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, &path).with_context(|| format!("renaming to {}", path.display()))?;
    Ok(())
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
