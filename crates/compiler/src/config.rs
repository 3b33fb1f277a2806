//! Compiler configuration.
//!
//! Loaded from `fbc.toml` next to the source (or the working directory),
//! then overridden by environment variables. The NEON switches exist as
//! correctness crosschecks, not tuning knobs: with a switch off, the
//! scalar fallback is the oracle the vector path is compared against.
//!
//! ```toml
//! runtime-dir = "/opt/fasterbasic/lib"
//!
//! [neon]
//! copy = true
//! arithmetic = true
//! loops = true
//! ```
//!
//! Environment overrides: `FBC_NEON_COPY`, `FBC_NEON_ARITH`,
//! `FBC_NEON_LOOPS` (`0`/`1`).

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// NEON kill-switches. Each gate covers one class of emission:
/// whole-register copies, element-wise arithmetic, and the vector loop
/// forms over whole arrays (reductions included).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NeonConfig {
    pub copy: bool,
    pub arithmetic: bool,
    pub loops: bool,
}

impl Default for NeonConfig {
    fn default() -> Self {
        NeonConfig { copy: true, arithmetic: true, loops: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CompilerConfig {
    /// Where `libfb_runtime.a` lives for the AOT link step.
    pub runtime_dir: Option<PathBuf>,
    pub neon: NeonConfig,
}

impl CompilerConfig {
    /// Load `fbc.toml` from `dir` if present, else defaults; then apply
    /// environment overrides.
    pub fn load(dir: &Path) -> CompilerConfig {
        let path = dir.join("fbc.toml");
        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str::<CompilerConfig>(&text) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "ignoring bad fbc.toml");
                    CompilerConfig::default()
                }
            },
            Err(_) => CompilerConfig::default(),
        };
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        if let Some(v) = env_flag("FBC_NEON_COPY") {
            self.neon.copy = v;
        }
        if let Some(v) = env_flag("FBC_NEON_ARITH") {
            self.neon.arithmetic = v;
        }
        if let Some(v) = env_flag("FBC_NEON_LOOPS") {
            self.neon.loops = v;
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    match std::env::var(name) {
        Ok(v) => Some(v != "0" && !v.eq_ignore_ascii_case("false")),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_everything() {
        let config = CompilerConfig::default();
        assert!(config.neon.copy);
        assert!(config.neon.arithmetic);
        assert!(config.neon.loops);
        assert!(config.runtime_dir.is_none());
    }

    #[test]
    fn toml_round_trip() {
        let config: CompilerConfig = toml::from_str(
            "runtime-dir = \"/rt\"\n[neon]\ncopy = false\nloops = false\n",
        )
        .unwrap();
        assert_eq!(config.runtime_dir.as_deref(), Some(Path::new("/rt")));
        assert!(!config.neon.copy);
        assert!(config.neon.arithmetic);
        assert!(!config.neon.loops);
    }
}
