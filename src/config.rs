use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::VolumeKind;

/// Current on-disk configuration version
pub const CONFIG_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    pub install_id: String,
    pub log_level: Option<String>,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
    pub quarantine: QuarantineConfig,
    pub policy: PolicyConfig,
    pub retention: RetentionConfig,
    pub volumes: BTreeMap<String, VolumeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_ms: u64,
    pub grid_ms: u64,
    pub jitter_secs: f64,
    pub default_interval_secs: u64,
    pub interval_min_secs: u64,
    pub interval_max_secs: u64,
    pub hdd_max_gap_secs: f64,
    pub deadline_margin_secs: f64,
    pub treat_unknown_as_ssd: bool,
    pub status_emit_ms: u64,
    pub join_timeout_ms: u64,
    pub countdown_log_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 500,
            grid_ms: 250,
            jitter_secs: 2.0,
            default_interval_secs: 180,
            interval_min_secs: 5,
            interval_max_secs: 3600,
            hdd_max_gap_secs: 300.0,
            deadline_margin_secs: 0.3,
            treat_unknown_as_ssd: true,
            status_emit_ms: 1000,
            join_timeout_ms: 2000,
            countdown_log_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: vec![0, 50, 100],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    pub after_failures: u32,
    pub base_secs: f64,
    pub cap_exponent: u32,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            after_failures: 3,
            base_secs: 30.0,
            cap_exponent: 11,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub pause_on_battery: bool,
    pub idle_pause_min: u32,
    pub refresh_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            pause_on_battery: false,
            idle_pause_min: 0,
            refresh_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Remove volumes unseen for this many days (0 disables)
    pub stale_removal_days: u32,
    pub forced_volumes: Vec<String>,
    pub sweep_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            stale_removal_days: 15,
            forced_volumes: Vec::new(),
            sweep_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub kind: VolumeKind,
    pub sentinel_dir: Option<PathBuf>,
    pub volume_guid: Option<String>,
    pub last_seen_unix: Option<f64>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: SchedulerConfig::default().default_interval_secs,
            kind: VolumeKind::Unknown,
            sentinel_dir: None,
            volume_guid: None,
            last_seen_unix: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            install_id: String::new(),
            log_level: Some("info".to_string()),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            quarantine: QuarantineConfig::default(),
            policy: PolicyConfig::default(),
            retention: RetentionConfig::default(),
            volumes: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. ~/.config/revenant/revenant.yml
    /// 3. revenant.yml in current directory
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join("revenant").join("revenant.yml");
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        let fallback_config = PathBuf::from("revenant.yml");
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        let mut config = Self::default();
        config.sanitize();
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config = Self::from_yaml(&content)?;
        log::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parse, migrate and sanitize a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        Self::from_yaml_checked(content).map(|(config, _)| config)
    }

    /// Like `from_yaml`, also returning the corrections sanitize made
    pub fn from_yaml_checked(content: &str) -> Result<(Self, Vec<String>)> {
        let raw: Value = if content.trim().is_empty() {
            Value::Mapping(Mapping::new())
        } else {
            serde_yaml::from_str(content).context("Failed to parse config YAML")?
        };
        let migrated = migrate(raw)?;
        let mut config: Self = serde_yaml::from_value(migrated).context("Failed to decode config")?;
        let fixes = config.sanitize();
        Ok((config, fixes))
    }

    /// First existing file in the load chain
    pub fn resolve_path(config_path: Option<&PathBuf>) -> Option<PathBuf> {
        if let Some(path) = config_path {
            return Some(path.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join("revenant").join("revenant.yml"))
            .into_iter()
            .chain(std::iter::once(PathBuf::from("revenant.yml")))
            .find(|p| p.exists())
    }

    /// Write the configuration as YAML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Replace nonsensical values with safe defaults.
    ///
    /// Each correction is logged as a warning and returned so `config --check`
    /// can report it. Never fails.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut fixes = Vec::new();
        let defaults = Config::default();
        let mut fix = |msg: String| {
            log::warn!("{}", msg);
            fixes.push(msg);
        };

        if uuid::Uuid::parse_str(&self.install_id).is_err() {
            if !self.install_id.is_empty() {
                fix(format!("Invalid install_id {:?}, generating a new one", self.install_id));
            }
            self.install_id = uuid::Uuid::new_v4().to_string();
        }

        let s = &mut self.scheduler;
        let d = &defaults.scheduler;
        if s.tick_ms == 0 {
            fix(format!("Invalid scheduler.tick_ms 0, using {}ms", d.tick_ms));
            s.tick_ms = d.tick_ms;
        }
        if s.grid_ms == 0 {
            fix(format!("Invalid scheduler.grid_ms 0, using {}ms", d.grid_ms));
            s.grid_ms = d.grid_ms;
        }
        if !(s.jitter_secs.is_finite() && s.jitter_secs >= 0.0) {
            fix(format!("Invalid scheduler.jitter_secs {}, using {}s", s.jitter_secs, d.jitter_secs));
            s.jitter_secs = d.jitter_secs;
        }
        if s.interval_min_secs == 0 || s.interval_min_secs > s.interval_max_secs {
            fix(format!(
                "Invalid interval bounds [{}, {}], using [{}, {}]",
                s.interval_min_secs, s.interval_max_secs, d.interval_min_secs, d.interval_max_secs
            ));
            s.interval_min_secs = d.interval_min_secs;
            s.interval_max_secs = d.interval_max_secs;
        }
        if s.default_interval_secs == 0 {
            fix(format!("Invalid scheduler.default_interval_secs 0, using {}s", d.default_interval_secs));
            s.default_interval_secs = d.default_interval_secs;
        }
        if !(s.hdd_max_gap_secs.is_finite() && s.hdd_max_gap_secs > 0.0) {
            fix(format!("Invalid scheduler.hdd_max_gap_secs {}, using {}s", s.hdd_max_gap_secs, d.hdd_max_gap_secs));
            s.hdd_max_gap_secs = d.hdd_max_gap_secs;
        }
        if !(s.deadline_margin_secs.is_finite() && s.deadline_margin_secs >= 0.0)
            || s.deadline_margin_secs >= s.hdd_max_gap_secs
        {
            fix(format!(
                "Invalid scheduler.deadline_margin_secs {} for gap {}s, using {}s",
                s.deadline_margin_secs, s.hdd_max_gap_secs, d.deadline_margin_secs
            ));
            s.deadline_margin_secs = d.deadline_margin_secs.min(s.hdd_max_gap_secs / 2.0);
        }
        let hdd_cap = s.hdd_max_gap_secs - s.deadline_margin_secs;
        if s.interval_min_secs as f64 >= hdd_cap {
            let min = (hdd_cap.floor() as u64).max(1);
            fix(format!(
                "scheduler.interval_min_secs {} reaches the HDD cap {:.1}s, using {}s",
                s.interval_min_secs, hdd_cap, min
            ));
            s.interval_min_secs = min;
            s.interval_max_secs = s.interval_max_secs.max(min);
        }
        if s.status_emit_ms == 0 {
            fix(format!("Invalid scheduler.status_emit_ms 0, using {}ms", d.status_emit_ms));
            s.status_emit_ms = d.status_emit_ms;
        }
        if s.join_timeout_ms == 0 {
            fix(format!("Invalid scheduler.join_timeout_ms 0, using {}ms", d.join_timeout_ms));
            s.join_timeout_ms = d.join_timeout_ms;
        }

        let r = &mut self.retry;
        if r.attempts == 0 {
            fix(format!("Invalid retry.attempts 0, using {}", defaults.retry.attempts));
            r.attempts = defaults.retry.attempts;
        }
        if r.backoff_ms.is_empty() {
            fix("Empty retry.backoff_ms, using [0, 50, 100]".to_string());
            r.backoff_ms = defaults.retry.backoff_ms.clone();
        }

        let q = &mut self.quarantine;
        if q.after_failures == 0 {
            fix(format!("Invalid quarantine.after_failures 0, using {}", defaults.quarantine.after_failures));
            q.after_failures = defaults.quarantine.after_failures;
        }
        if !(q.base_secs.is_finite() && q.base_secs > 0.0) {
            fix(format!("Invalid quarantine.base_secs {}, using {}s", q.base_secs, defaults.quarantine.base_secs));
            q.base_secs = defaults.quarantine.base_secs;
        }
        if q.cap_exponent > 30 {
            fix(format!(
                "quarantine.cap_exponent {} too large, using {}",
                q.cap_exponent, defaults.quarantine.cap_exponent
            ));
            q.cap_exponent = defaults.quarantine.cap_exponent;
        }

        if self.policy.refresh_ms == 0 {
            fix(format!("Invalid policy.refresh_ms 0, using {}ms", defaults.policy.refresh_ms));
            self.policy.refresh_ms = defaults.policy.refresh_ms;
        }
        if self.retention.sweep_secs == 0 {
            fix(format!("Invalid retention.sweep_secs 0, using {}s", defaults.retention.sweep_secs));
            self.retention.sweep_secs = defaults.retention.sweep_secs;
        }

        for (id, volume) in self.volumes.iter_mut() {
            if volume.interval_secs == 0 {
                fix(format!("Volume {} has interval 0, using {}s", id, self.scheduler.default_interval_secs));
                volume.interval_secs = self.scheduler.default_interval_secs;
            }
        }

        self.version = CONFIG_VERSION;
        fixes
    }

    /// Parsed forced volume ids ("F", "j:" -> "F:", "J:")
    pub fn forced_volume_ids(&self) -> Vec<String> {
        self.retention
            .forced_volumes
            .iter()
            .map(|v| normalize_volume_id(v))
            .filter(|v| !v.is_empty())
            .collect()
    }
}

/// Upper-case a drive letter and make sure it carries the trailing colon
pub fn normalize_volume_id(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches(['\\', '/']).to_uppercase();
    if trimmed.len() == 1 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        format!("{}:", trimmed)
    } else {
        trimmed
    }
}

/// Bring an older document up to `CONFIG_VERSION`.
///
/// Version 1 documents are flat: every scheduler setting lives at the top
/// level and volumes sit under `per_drive`. They are folded into sections here.
pub fn migrate(raw: Value) -> Result<Value> {
    let mut map = match raw {
        Value::Mapping(map) => map,
        Value::Null => Mapping::new(),
        _ => eyre::bail!("Config root must be a mapping"),
    };

    let version = map
        .get("version")
        .and_then(Value::as_u64)
        .unwrap_or(if map.contains_key("scheduler") { CONFIG_VERSION as u64 } else { 1 });

    if version > CONFIG_VERSION as u64 {
        eyre::bail!("Unsupported config version {}", version);
    }
    if version == CONFIG_VERSION as u64 {
        return Ok(Value::Mapping(map));
    }

    log::info!("Migrating config from v{} to v{}", version, CONFIG_VERSION);

    let mut scheduler = Mapping::new();
    let mut retry = Mapping::new();
    let mut quarantine = Mapping::new();
    let mut policy = Mapping::new();
    let mut retention = Mapping::new();

    const MOVES: [(&str, &str, &str); 14] = [
        ("jitter_sec", "scheduler", "jitter_secs"),
        ("default_interval_sec", "scheduler", "default_interval_secs"),
        ("interval_min_sec", "scheduler", "interval_min_secs"),
        ("hdd_max_gap_sec", "scheduler", "hdd_max_gap_secs"),
        ("deadline_margin_sec", "scheduler", "deadline_margin_secs"),
        ("treat_unknown_as_ssd", "scheduler", "treat_unknown_as_ssd"),
        ("scheduler_grid_ms", "scheduler", "grid_ms"),
        ("cli_countdown_interval_sec", "scheduler", "countdown_log_secs"),
        ("error_quarantine_after", "quarantine", "after_failures"),
        ("error_quarantine_sec", "quarantine", "base_secs"),
        ("pause_on_battery", "policy", "pause_on_battery"),
        ("idle_pause_min", "policy", "idle_pause_min"),
        ("drive_stale_removal_days", "retention", "stale_removal_days"),
        ("retry_attempts", "retry", "attempts"),
    ];
    for (old, section, new) in MOVES {
        if let Some(value) = map.remove(old) {
            let target = match section {
                "scheduler" => &mut scheduler,
                "quarantine" => &mut quarantine,
                "policy" => &mut policy,
                "retention" => &mut retention,
                _ => &mut retry,
            };
            target.insert(Value::from(new), value);
        }
    }

    if let Some(letters) = map.remove("forced_drive_letters").as_ref().and_then(Value::as_str) {
        let forced: Vec<Value> = letters
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::from(normalize_volume_id(s)))
            .collect();
        retention.insert(Value::from("forced_volumes"), Value::Sequence(forced));
    }

    let mut volumes = Mapping::new();
    if let Some(Value::Mapping(per_drive)) = map.remove("per_drive") {
        for (letter, drive) in per_drive {
            let Some(letter) = letter.as_str() else { continue };
            let Value::Mapping(mut drive) = drive else { continue };
            let mut volume = Mapping::new();
            for (old, new) in [
                ("enabled", "enabled"),
                ("interval_sec", "interval_secs"),
                ("ping_dir", "sentinel_dir"),
                ("volume_guid", "volume_guid"),
                ("last_seen_timestamp", "last_seen_unix"),
            ] {
                match drive.remove(old) {
                    Some(Value::Null) | None => {}
                    Some(value) => {
                        volume.insert(Value::from(new), value);
                    }
                }
            }
            if let Some(kind) = drive.remove("type").and_then(|k| k.as_str().map(str::to_string)) {
                let kind = kind.parse::<VolumeKind>().unwrap_or_default();
                volume.insert(Value::from("kind"), serde_yaml::to_value(kind)?);
            }
            volumes.insert(Value::from(normalize_volume_id(letter)), Value::Mapping(volume));
        }
    }

    let mut out = Mapping::new();
    out.insert(Value::from("version"), Value::from(CONFIG_VERSION));
    if let Some(id) = map.remove("install_id") {
        out.insert(Value::from("install_id"), id);
    }
    if let Some(level) = map.remove("log_level") {
        out.insert(Value::from("log_level"), level);
    }
    for (name, section) in [
        ("scheduler", scheduler),
        ("retry", retry),
        ("quarantine", quarantine),
        ("policy", policy),
        ("retention", retention),
    ] {
        if !section.is_empty() {
            out.insert(Value::from(name), Value::Mapping(section));
        }
    }
    out.insert(Value::from("volumes"), Value::Mapping(volumes));

    for key in map.keys().filter_map(Value::as_str).filter(|k| *k != "version") {
        log::debug!("Dropping unused v1 config key: {}", key);
    }

    Ok(Value::Mapping(out))
}
