//! Coordinator configuration.
//!
//! Everything the coordinator needs that is not learned at runtime: bind
//! address, grid size, the static address table, timings, ambient and joy
//! settings, and the ordered level list.
//!
//! # Sources
//!
//! Loaded in order (later wins):
//! 1. Compiled defaults
//! 2. `./camurai.toml`, or the path given with `--config`
//! 3. Environment variables (`CAMURAI_BIND`, `CAMURAI_MODE`)
//!
//! # Example Config
//!
//! ```toml
//! bind = "0.0.0.0:5005"
//! mode = "game"
//!
//! [grid]
//! width = 4
//! height = 4
//!
//! [addresses]
//! "192.168.0.200" = [0, 0]
//! "192.168.0.201" = [1, 0]
//!
//! [timing]
//! success_delay_ms = 1000
//!
//! [[levels]]
//! name = "diagonal"
//! locks_on_success = true
//! ordering = "fixed"
//! sequence = [[0, 0], [1, 1], [2, 2], [3, 3]]
//! ```

use crate::ambient::RippleMetric;
use crate::level::{LevelSpec, OrderingMode, MAX_SEQUENCE};
use crate::registry::AddressTable;
use camurai_env::Coord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Local override file picked up from the working directory.
pub const LOCAL_CONFIG_FILE: &str = "camurai.toml";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// What the grid is used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The sequencing game
    #[default]
    Game,

    /// Step sequencer: nodes toggle, columns sweep
    Sequencer,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "game" => Ok(Mode::Game),
            "sequencer" => Ok(Mode::Sequencer),
            _ => Err(format!("Unknown mode: {}", s)),
        }
    }
}

/// Grid dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "GridConfig::default_side")]
    pub width: u16,

    #[serde(default = "GridConfig::default_side")]
    pub height: u16,

    /// First address of the generated table, used when `[addresses]` is
    /// empty.
    #[serde(default = "GridConfig::default_address_base")]
    pub address_base: Ipv4Addr,
}

impl GridConfig {
    fn default_side() -> u16 {
        4
    }

    fn default_address_base() -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 0, 200)
    }

    /// Every cell in row-major order.
    pub fn coords(&self) -> impl Iterator<Item = Coord> {
        let (width, height) = (self.width, self.height);
        (0..height).flat_map(move |y| (0..width).map(move |x| Coord::new(x, y)))
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: Self::default_side(),
            height: Self::default_side(),
            address_base: Self::default_address_base(),
        }
    }
}

/// Fixed delays, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause after the last correct press, before the next level starts.
    #[serde(default = "TimingConfig::default_success_delay_ms")]
    pub success_delay_ms: u64,

    #[serde(default = "TimingConfig::default_sweep_step_ms")]
    pub sweep_step_ms: u64,

    #[serde(default = "TimingConfig::default_ripple_step_ms")]
    pub ripple_step_ms: u64,

    /// Pristine time before the idle sweep starts.
    #[serde(default = "TimingConfig::default_idle_delay_ms")]
    pub idle_delay_ms: u64,
}

impl TimingConfig {
    fn default_success_delay_ms() -> u64 {
        1000
    }

    fn default_sweep_step_ms() -> u64 {
        200
    }

    fn default_ripple_step_ms() -> u64 {
        150
    }

    fn default_idle_delay_ms() -> u64 {
        5000
    }

    pub fn success_delay(&self) -> Duration {
        Duration::from_millis(self.success_delay_ms)
    }

    pub fn sweep_step(&self) -> Duration {
        Duration::from_millis(self.sweep_step_ms)
    }

    pub fn ripple_step(&self) -> Duration {
        Duration::from_millis(self.ripple_step_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            success_delay_ms: Self::default_success_delay_ms(),
            sweep_step_ms: Self::default_sweep_step_ms(),
            ripple_step_ms: Self::default_ripple_step_ms(),
            idle_delay_ms: Self::default_idle_delay_ms(),
        }
    }
}

/// Idle-time animation switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbientConfig {
    /// Column sweep after `idle_delay_ms` of pristine time.
    #[serde(default = "AmbientConfig::enabled")]
    pub sweep: bool,

    /// Ripple from a node when its joy intensity peaks.
    #[serde(default = "AmbientConfig::enabled")]
    pub ripple_on_joy: bool,

    #[serde(default)]
    pub ripple_metric: RippleMetric,
}

impl AmbientConfig {
    fn enabled() -> bool {
        true
    }

    /// No ambient animation at all.
    pub fn off() -> Self {
        Self {
            sweep: false,
            ripple_on_joy: false,
            ripple_metric: RippleMetric::default(),
        }
    }
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            sweep: true,
            ripple_on_joy: true,
            ripple_metric: RippleMetric::default(),
        }
    }
}

/// Joy detection thresholds on the 0-255 intensity scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoyConfig {
    /// Rising above this counts as joy (0.50)
    #[serde(default = "JoyConfig::default_peak")]
    pub peak: u8,

    /// Falling below this ends it (0.10)
    #[serde(default = "JoyConfig::default_min")]
    pub min: u8,
}

impl JoyConfig {
    fn default_peak() -> u8 {
        128
    }

    fn default_min() -> u8 {
        26
    }
}

impl Default for JoyConfig {
    fn default() -> Self {
        Self {
            peak: Self::default_peak(),
            min: Self::default_min(),
        }
    }
}

/// Complete coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "CoordinatorConfig::default_bind")]
    pub bind: String,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub grid: GridConfig,

    /// IP → `[x, y]`. Empty means the generated row-major table.
    #[serde(default)]
    pub addresses: BTreeMap<IpAddr, Coord>,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub ambient: AmbientConfig,

    #[serde(default)]
    pub joy: JoyConfig,

    #[serde(default = "LevelSpec::canonical")]
    pub levels: Vec<LevelSpec>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            mode: Mode::default(),
            grid: GridConfig::default(),
            addresses: BTreeMap::new(),
            timing: TimingConfig::default(),
            ambient: AmbientConfig::default(),
            joy: JoyConfig::default(),
            levels: LevelSpec::canonical(),
        }
    }
}

impl CoordinatorConfig {
    fn default_bind() -> String {
        "0.0.0.0:5005".to_string()
    }

    /// Loads defaults, then `config_path` (or `./camurai.toml` if present),
    /// then environment overrides, and validates the result.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let local = Path::new(LOCAL_CONFIG_FILE);
                if local.exists() {
                    Self::from_file(local)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Applies `CAMURAI_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("CAMURAI_BIND") {
            self.bind = bind;
        }
        if let Some(mode) = lookup("CAMURAI_MODE") {
            self.mode = mode.parse().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    /// The address table to inject into the registry.
    pub fn address_table(&self) -> AddressTable {
        if self.addresses.is_empty() {
            AddressTable::generated(self.grid.address_base, self.grid.width, self.grid.height)
        } else {
            let entries: HashMap<IpAddr, Coord> =
                self.addresses.iter().map(|(ip, coord)| (*ip, *coord)).collect();
            AddressTable::new(entries)
        }
    }

    /// Rejects configurations the coordinator cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (width, height) = (self.grid.width, self.grid.height);
        if width == 0 || height == 0 {
            return Err(ConfigError::Invalid(format!("empty grid {}x{}", width, height)));
        }

        let mut seen = HashSet::new();
        for (ip, coord) in &self.addresses {
            if !coord.within(width, height) {
                return Err(ConfigError::Invalid(format!("{} maps to {} outside the grid", ip, coord)));
            }
            if !seen.insert(*coord) {
                return Err(ConfigError::Invalid(format!("{} is mapped twice", coord)));
            }
        }

        if self.levels.is_empty() {
            return Err(ConfigError::Invalid("no levels".to_string()));
        }
        for level in &self.levels {
            // Notes go out verbatim as BUZZER payloads
            if let Some(note) = level.notes.iter().find(|n| !n.is_ascii() || n.len() > u8::MAX as usize) {
                return Err(ConfigError::Invalid(format!(
                    "level {} has an unplayable note {:?}",
                    level.name, note
                )));
            }

            if let OrderingMode::Fixed { sequence } = &level.ordering {
                if sequence.is_empty() {
                    return Err(ConfigError::Invalid(format!("level {} has no steps", level.name)));
                }
                if sequence.len() > MAX_SEQUENCE {
                    return Err(ConfigError::Invalid(format!(
                        "level {} has {} steps (max {})",
                        level.name,
                        sequence.len(),
                        MAX_SEQUENCE
                    )));
                }
                let mut steps = HashSet::new();
                for coord in sequence {
                    if !coord.within(width, height) {
                        return Err(ConfigError::Invalid(format!(
                            "level {} uses {} outside the grid",
                            level.name, coord
                        )));
                    }
                    if !steps.insert(*coord) {
                        return Err(ConfigError::Invalid(format!(
                            "level {} repeats {}",
                            level.name, coord
                        )));
                    }
                }
            }
        }

        if self.mode == Mode::Sequencer && self.timing.sweep_step_ms == 0 {
            return Err(ConfigError::Invalid("sequencer needs a non-zero sweep step".to_string()));
        }

        if self.joy.min >= self.joy.peak {
            return Err(ConfigError::Invalid(format!(
                "joy min {} must be below peak {}",
                self.joy.min, self.joy.peak
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.bind, "0.0.0.0:5005");
        assert_eq!(config.mode, Mode::Game);
        assert_eq!(config.levels.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_address_table() {
        let config = CoordinatorConfig::default();
        let table = config.address_table();

        assert_eq!(table.len(), 16);
        assert_eq!(
            table.resolve("192.168.0.207".parse().unwrap()),
            Some(Coord::new(3, 1))
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            mode = "sequencer"

            [grid]
            width = 5

            [addresses]
            "10.0.0.1" = [4, 3]

            [timing]
            success_delay_ms = 250
            "#
        )
        .unwrap();

        let config = CoordinatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mode, Mode::Sequencer);
        assert_eq!(config.grid.width, 5);
        assert_eq!(config.grid.height, 4);
        assert_eq!(config.timing.success_delay(), Duration::from_millis(250));
        assert_eq!(config.timing.sweep_step_ms, 200);
        assert_eq!(config.levels.len(), 4);
        assert_eq!(
            config.address_table().resolve("10.0.0.1".parse().unwrap()),
            Some(Coord::new(4, 3))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "grid = 12").unwrap();

        let err = CoordinatorConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = CoordinatorConfig::load_from(Some(Path::new("/nonexistent/camurai.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CoordinatorConfig::default();
        config
            .apply_env_overrides(|key| match key {
                "CAMURAI_BIND" => Some("127.0.0.1:9000".to_string()),
                "CAMURAI_MODE" => Some("Sequencer".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.mode, Mode::Sequencer);

        let err = config
            .apply_env_overrides(|key| (key == "CAMURAI_MODE").then(|| "disco".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_rejects_bad_tables_and_levels() {
        let mut config = CoordinatorConfig::default();
        config.addresses.insert("10.0.0.1".parse().unwrap(), Coord::new(4, 0));
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.addresses.insert("10.0.0.1".parse().unwrap(), Coord::new(1, 1));
        config.addresses.insert("10.0.0.2".parse().unwrap(), Coord::new(1, 1));
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.grid.width = 3;
        assert!(config.validate().is_err(), "diagonal reaches (3,3)");

        let mut config = CoordinatorConfig::default();
        config.levels = vec![LevelSpec::fixed(
            "twice",
            vec![Coord::new(0, 0), Coord::new(0, 0)],
            true,
        )];
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.levels.clear();
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.joy.min = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_fixed_level() {
        let mut config = CoordinatorConfig::default();
        config.levels = vec![LevelSpec::fixed("nothing", Vec::new(), true)];

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no steps"), "{}", err);

        // Random levels start empty and fill as nodes join
        config.levels = vec![LevelSpec::random("random", true)];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unplayable_notes() {
        let mut config = CoordinatorConfig::default();
        config.levels[0].notes[2] = "C4é".to_string();
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.levels[1].notes[0] = "C4e".repeat(100);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_notes_are_checked() {
        let text = r#"
            [[levels]]
            name = "snowman"
            locks_on_success = true
            ordering = "fixed"
            sequence = [[0, 0]]
            notes = ["☃"]
        "#;
        let config: CoordinatorConfig = toml::from_str(text).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
