use crate::errors::ReplayError;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayConfig {
    pub replay: ReplaySettings,
    pub coordinator: CoordinatorSettings,
    pub dom: DomSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplaySettings {
    pub step_delay_ms: u64,
    pub degenerate_box_px: f64,
    pub fallback_offset_px: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomSettings {
    pub output_class: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSettings {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl ReplaySettings {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

impl CoordinatorSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            step_delay_ms: 25,
            degenerate_box_px: 1.0,
            fallback_offset_px: 1.0,
        }
    }
}

impl Default for DomSettings {
    fn default() -> Self {
        Self {
            output_class: "jp-OutputArea-output".to_string(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            replay: ReplaySettings::default(),
            coordinator: CoordinatorSettings {
                settle_delay_ms: 1000,
            },
            dom: DomSettings::default(),
            logging: LoggingSettings {
                path: Some(PathBuf::from(".toonreplay/activity.jsonl")),
                max_payload_bytes: crate::logging::DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: crate::logging::DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialReplayConfig {
    replay: Option<PartialReplaySettings>,
    coordinator: Option<PartialCoordinatorSettings>,
    dom: Option<PartialDomSettings>,
    logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialReplaySettings {
    step_delay_ms: Option<u64>,
    degenerate_box_px: Option<f64>,
    fallback_offset_px: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCoordinatorSettings {
    settle_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDomSettings {
    output_class: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingSettings {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Read when present in the working directory and no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "toonreplay.toml";

pub fn load_config(
    config_path: Option<&Path>,
    fs: &dyn FileSystem,
) -> Result<ReplayConfig, ReplayError> {
    let path = match config_path {
        Some(path) => path,
        None if fs.exists(Path::new(DEFAULT_CONFIG_FILE)) => Path::new(DEFAULT_CONFIG_FILE),
        None => return Ok(ReplayConfig::default()),
    };
    parse_config(&fs.read_to_string(path)?)
}

pub fn parse_config(contents: &str) -> Result<ReplayConfig, ReplayError> {
    let partial: PartialReplayConfig =
        toml::from_str(contents).map_err(|e| ReplayError::ConfigParse(e.to_string()))?;
    let mut cfg = ReplayConfig::default();
    merge_partial_config(&mut cfg, partial);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut ReplayConfig, partial: PartialReplayConfig) {
    if let Some(replay) = partial.replay {
        if let Some(value) = replay.step_delay_ms {
            cfg.replay.step_delay_ms = value;
        }
        if let Some(value) = replay.degenerate_box_px {
            cfg.replay.degenerate_box_px = value;
        }
        if let Some(value) = replay.fallback_offset_px {
            cfg.replay.fallback_offset_px = value;
        }
    }

    if let Some(coordinator) = partial.coordinator {
        if let Some(value) = coordinator.settle_delay_ms {
            cfg.coordinator.settle_delay_ms = value;
        }
    }

    if let Some(dom) = partial.dom {
        if let Some(value) = dom.output_class {
            cfg.dom.output_class = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            // An empty path keeps the activity log in memory.
            cfg.logging.path = (!value.as_os_str().is_empty()).then_some(value);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn validate_config(cfg: &ReplayConfig) -> Result<(), ReplayError> {
    let replay = &cfg.replay;
    if !replay.degenerate_box_px.is_finite() || replay.degenerate_box_px < 0.0 {
        return Err(ReplayError::InvalidConfig(
            "replay.degenerate_box_px must be a finite non-negative number".to_string(),
        ));
    }
    if !replay.fallback_offset_px.is_finite() || replay.fallback_offset_px < 0.0 {
        return Err(ReplayError::InvalidConfig(
            "replay.fallback_offset_px must be a finite non-negative number".to_string(),
        ));
    }
    if cfg.dom.output_class.trim().is_empty() {
        return Err(ReplayError::InvalidConfig(
            "dom.output_class must not be empty".to_string(),
        ));
    }
    if cfg.logging.max_payload_bytes == 0 {
        return Err(ReplayError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_config, parse_config, ReplayConfig};
    use crate::errors::ReplayError;
    use crate::runtime::FakeFileSystem;
    use std::path::Path;

    #[test]
    fn missing_path_yields_defaults() {
        let fs = FakeFileSystem::default();
        let cfg = load_config(None, &fs).expect("defaults");
        assert_eq!(cfg, ReplayConfig::default());
        assert_eq!(cfg.replay.step_delay_ms, 25);
        assert_eq!(cfg.coordinator.settle_delay_ms, 1000);
    }

    #[test]
    fn working_directory_config_is_picked_up_without_a_flag() {
        let fs = FakeFileSystem::with_file("toonreplay.toml", "[replay]\nstep_delay_ms = 5\n");
        let cfg = load_config(None, &fs).expect("discovered");
        assert_eq!(cfg.replay.step_delay_ms, 5);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let fs = FakeFileSystem::with_file(
            "/cfg.toml",
            "[replay]\nstep_delay_ms = 0\n\n[dom]\noutput_class = \"plot\"\n",
        );
        let cfg = load_config(Some(Path::new("/cfg.toml")), &fs).expect("config");
        assert_eq!(cfg.replay.step_delay_ms, 0);
        assert_eq!(cfg.replay.fallback_offset_px, 1.0);
        assert_eq!(cfg.dom.output_class, "plot");
        assert_eq!(cfg.coordinator.settle_delay_ms, 1000);
    }

    #[test]
    fn rejects_negative_offsets_and_empty_class() {
        let err = parse_config("[replay]\nfallback_offset_px = -2.0\n").expect_err("invalid");
        assert!(matches!(err, ReplayError::InvalidConfig(_)));
        let err = parse_config("[dom]\noutput_class = \" \"\n").expect_err("invalid");
        assert!(matches!(err, ReplayError::InvalidConfig(_)));
    }

    #[test]
    fn empty_log_path_disables_file_logging() {
        let cfg = parse_config("[logging]\npath = \"\"\n").expect("config");
        assert_eq!(cfg.logging.path, None);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = parse_config("[replay\nstep_delay_ms = 1").expect_err("parse");
        assert!(matches!(err, ReplayError::ConfigParse(_)));
    }
}
