/// Service configuration loader - parses pegel.toml
///
/// The TOML file is deserialized into raw section structs first, then
/// validated and resolved into [`Settings`]: durations become typed values,
/// per-station thresholds fall back to the global `[thresholds]` section, and
/// every station is built through `Station::new` so its invariants hold for
/// the rest of the service.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::alert::PolicyKind;
use crate::ingest::hlnug::{DEFAULT_INDEX_URL, DEFAULT_SOURCE_TAG, DEFAULT_USER_AGENT};
use crate::model::{PARAM_WATER_LEVEL, Station};

pub const DEFAULT_CONFIG_PATH: &str = "pegel.toml";

/// Public hydrograph page; placeholders are filled per station.
pub const DEFAULT_OVERVIEW_URL: &str = "https://www.hlnug.de/static/pegel/wiskiweb3/webpublic/#/overview/Wasserstand/station/{station_id}/{station_name}/Wasserstand?period=P7D";

const MIN_POLL_INTERVAL_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Once,
    Daemon,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub runtime: RuntimeSettings,
    pub alerting: AlertSettings,
    pub feed: FeedSettings,
    pub storage: StorageSettings,
    pub email: EmailSettings,
    pub stations: Vec<Station>,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub mode: RunMode,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub policy: PolicyKind,
    /// Continuous time below a threshold before it can fire again.
    pub rearm_below: chrono::Duration,
    /// Minimum spacing between alerts for the rate-limited policies.
    pub min_alert_interval: chrono::Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            rearm_below: chrono::Duration::hours(6),
            min_alert_interval: chrono::Duration::minutes(180),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub index_url: String,
    pub user_agent: String,
    pub source_tag: String,
}

#[derive(Debug, Clone, Default)]
pub struct StorageSettings {
    /// Falls back to DATABASE_URL when unset.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// TLS from the first byte (SMTPS, usually port 465).
    ImplicitTls,
    StartTls,
    /// Unencrypted; only sensible for a local relay.
    Plain,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
    pub security: SmtpSecurity,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub enabled: bool,
    pub to: Vec<String>,
    pub from: String,
    pub smtp: SmtpSettings,
}

// ---------------------------------------------------------------------------
// Raw TOML sections
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    runtime: RawRuntime,
    #[serde(default)]
    feed: RawFeed,
    #[serde(default)]
    storage: RawStorage,
    email: Option<RawEmail>,
    #[serde(default)]
    smtp: RawSmtp,
    #[serde(default)]
    thresholds: RawThresholds,
    #[serde(default)]
    station: Vec<RawStation>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawRuntime {
    mode: RunMode,
    poll_interval_minutes: u64,
    poll_interval_seconds: u64,
    request_timeout_seconds: u64,
    alert_policy: PolicyKind,
    rearm_below_hours: f64,
    alert_on_start: bool,
    min_alert_interval_minutes: u32,
    debug: bool,
}

impl Default for RawRuntime {
    fn default() -> Self {
        Self {
            mode: RunMode::Once,
            poll_interval_minutes: 15,
            poll_interval_seconds: 0,
            request_timeout_seconds: 20,
            alert_policy: PolicyKind::default(),
            rearm_below_hours: 6.0,
            alert_on_start: true,
            min_alert_interval_minutes: 180,
            debug: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawFeed {
    index_url: String,
    user_agent: String,
    source_tag: String,
    /// Empty string disables the link in alert mails.
    overview_url: String,
}

impl Default for RawFeed {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_INDEX_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
            overview_url: DEFAULT_OVERVIEW_URL.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStorage {
    database_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEmail {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    from: String,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSmtp {
    host: String,
    port: u16,
    user: String,
    password: String,
    use_ssl: bool,
    use_starttls: bool,
    timeout_seconds: u64,
}

impl Default for RawSmtp {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 465,
            user: String::new(),
            password: String::new(),
            use_ssl: true,
            use_starttls: false,
            timeout_seconds: 20,
        }
    }
}

/// Threshold keys accepted globally and per station.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawThresholds {
    thresholds_cm: Option<Vec<f64>>,
    threshold1_cm: Option<f64>,
    threshold2_cm: Option<f64>,
    threshold3_cm: Option<f64>,
    threshold4_cm: Option<f64>,
    /// Legacy single-threshold form.
    threshold_cm: Option<f64>,
    level_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStation {
    name: Option<String>,
    #[serde(default, alias = "station_id")]
    station_id_public: String,
    station_no: String,
    #[serde(default = "default_parameter")]
    parameter: String,
    alert_on_start: Option<bool>,
    thresholds_cm: Option<Vec<f64>>,
    threshold1_cm: Option<f64>,
    threshold2_cm: Option<f64>,
    threshold3_cm: Option<f64>,
    threshold4_cm: Option<f64>,
    threshold_cm: Option<f64>,
    level_names: Option<Vec<String>>,
}

impl RawStation {
    fn threshold_fields(&self) -> RawThresholds {
        RawThresholds {
            thresholds_cm: self.thresholds_cm.clone(),
            threshold1_cm: self.threshold1_cm,
            threshold2_cm: self.threshold2_cm,
            threshold3_cm: self.threshold3_cm,
            threshold4_cm: self.threshold4_cm,
            threshold_cm: self.threshold_cm,
            level_names: self.level_names.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_parameter() -> String {
    PARAM_WATER_LEVEL.to_string()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Reads and validates a configuration file.
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Settings::from_toml_str(&contents)
}

impl Settings {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents)?;
        resolve(raw)
    }
}

fn resolve(raw: RawConfig) -> Result<Settings, ConfigError> {
    let runtime = resolve_runtime(&raw.runtime)?;
    let alerting = resolve_alerting(&raw.runtime)?;
    let email = resolve_email(raw.email.as_ref(), &raw.smtp)?;

    let global_thresholds = resolve_thresholds("thresholds", &raw.thresholds)?;
    let global_names = match (&global_thresholds, &raw.thresholds.level_names) {
        (Some(t), Some(names)) if names.len() != t.len() => {
            return Err(invalid(format!(
                "[thresholds] level_names must have exactly {} entries (one per threshold)",
                t.len()
            )));
        }
        (Some(_), Some(names)) => Some(names.clone()),
        _ => None,
    };

    if raw.station.is_empty() {
        return Err(invalid("no stations configured; add at least one [[station]]"));
    }

    let mut seen = HashSet::new();
    let mut stations = Vec::with_capacity(raw.station.len());

    for raw_station in &raw.station {
        let station_no = raw_station.station_no.trim().to_string();
        if station_no.is_empty() {
            return Err(invalid("[[station]] station_no must not be empty"));
        }
        let parameter = raw_station.parameter.trim().to_string();
        let name = raw_station
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(station_no.as_str())
            .to_string();
        let section = format!("station '{}'", name);

        if !seen.insert((station_no.clone(), parameter.clone())) {
            return Err(invalid(format!(
                "{}: duplicate station_no {} for parameter {}",
                section, station_no, parameter
            )));
        }

        let fields = raw_station.threshold_fields();
        let thresholds = match resolve_thresholds(&section, &fields)? {
            Some(t) => t,
            None => global_thresholds.clone().ok_or_else(|| {
                invalid(format!(
                    "{}: no thresholds; set thresholds_cm here or in [thresholds]",
                    section
                ))
            })?,
        };

        let level_names = match &fields.level_names {
            Some(names) => names.iter().map(|n| n.trim().to_string()).collect(),
            None => match &global_names {
                Some(names) if names.len() == thresholds.len() => names.clone(),
                _ => default_level_names(thresholds.len()),
            },
        };

        let station_id_public = raw_station.station_id_public.trim().to_string();
        let overview_url = render_overview_url(&raw.feed.overview_url, &station_id_public, &name);

        let station = Station::new(
            name,
            station_id_public,
            station_no,
            parameter,
            thresholds,
            level_names,
        )
        .map_err(|e| invalid(format!("{}: {}", section, e)))?
        .with_alert_on_start(raw_station.alert_on_start.unwrap_or(raw.runtime.alert_on_start))
        .with_overview_url(overview_url);

        stations.push(station);
    }

    Ok(Settings {
        runtime,
        alerting,
        feed: FeedSettings {
            index_url: raw.feed.index_url.trim().to_string(),
            user_agent: raw.feed.user_agent.trim().to_string(),
            source_tag: raw.feed.source_tag.trim().to_string(),
        },
        storage: StorageSettings {
            database_url: raw.storage.database_url.filter(|u| !u.trim().is_empty()),
        },
        email,
        stations,
    })
}

fn resolve_runtime(raw: &RawRuntime) -> Result<RuntimeSettings, ConfigError> {
    let poll_secs = if raw.poll_interval_seconds > 0 {
        raw.poll_interval_seconds
    } else {
        raw.poll_interval_minutes.saturating_mul(60)
    };
    if poll_secs < MIN_POLL_INTERVAL_SECS {
        return Err(invalid(format!(
            "[runtime] poll interval too small ({}s, minimum {}s)",
            poll_secs, MIN_POLL_INTERVAL_SECS
        )));
    }
    if raw.request_timeout_seconds == 0 {
        return Err(invalid("[runtime] request_timeout_seconds must be > 0"));
    }

    Ok(RuntimeSettings {
        mode: raw.mode,
        poll_interval: Duration::from_secs(poll_secs),
        request_timeout: Duration::from_secs(raw.request_timeout_seconds),
        debug: raw.debug,
    })
}

fn resolve_alerting(raw: &RawRuntime) -> Result<AlertSettings, ConfigError> {
    if !raw.rearm_below_hours.is_finite() || raw.rearm_below_hours <= 0.0 {
        return Err(invalid("[runtime] rearm_below_hours must be > 0"));
    }
    let rearm_ms = (raw.rearm_below_hours * 3_600_000.0).round() as i64;

    Ok(AlertSettings {
        policy: raw.alert_policy,
        rearm_below: chrono::Duration::milliseconds(rearm_ms),
        min_alert_interval: chrono::Duration::minutes(i64::from(raw.min_alert_interval_minutes)),
    })
}

fn resolve_email(email: Option<&RawEmail>, smtp: &RawSmtp) -> Result<EmailSettings, ConfigError> {
    let security = if smtp.use_ssl {
        SmtpSecurity::ImplicitTls
    } else if smtp.use_starttls {
        SmtpSecurity::StartTls
    } else {
        SmtpSecurity::Plain
    };

    let user = smtp.user.trim();
    let password = smtp.password.trim();
    let credentials = match (user.is_empty(), password.is_empty()) {
        (true, true) => None,
        (false, false) => Some((user.to_string(), password.to_string())),
        _ => return Err(invalid("[smtp] user and password must be set together")),
    };

    if smtp.timeout_seconds == 0 {
        return Err(invalid("[smtp] timeout_seconds must be > 0"));
    }

    let (enabled, to, from) = match email {
        Some(e) => (
            e.enabled,
            e.to
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect::<Vec<_>>(),
            e.from.trim().to_string(),
        ),
        None => (false, Vec::new(), String::new()),
    };

    if enabled {
        let mut missing = Vec::new();
        if to.is_empty() {
            missing.push("email.to");
        }
        if from.is_empty() {
            missing.push("email.from");
        }
        if smtp.host.trim().is_empty() {
            missing.push("smtp.host");
        }
        if !missing.is_empty() {
            return Err(invalid(format!(
                "email is enabled but incomplete; missing {}",
                missing.join(", ")
            )));
        }
    }

    Ok(EmailSettings {
        enabled,
        to,
        from,
        smtp: SmtpSettings {
            host: smtp.host.trim().to_string(),
            port: smtp.port,
            credentials,
            security,
            timeout: Duration::from_secs(smtp.timeout_seconds),
        },
    })
}

/// Picks the threshold list for a section. `thresholds_cm` wins over
/// `threshold1_cm..threshold4_cm`, which win over the legacy `threshold_cm`.
/// `None` means the section sets no thresholds at all.
fn resolve_thresholds(section: &str, raw: &RawThresholds) -> Result<Option<Vec<f64>>, ConfigError> {
    if let Some(values) = &raw.thresholds_cm {
        if !(3..=4).contains(&values.len()) {
            return Err(invalid(format!(
                "[{}] thresholds_cm must have 3 or 4 values, got {}",
                section,
                values.len()
            )));
        }
        return Ok(Some(values.clone()));
    }

    let numbered: Vec<f64> = [raw.threshold1_cm, raw.threshold2_cm, raw.threshold3_cm, raw.threshold4_cm]
        .into_iter()
        .flatten()
        .collect();
    if !numbered.is_empty() {
        if !(3..=4).contains(&numbered.len()) {
            return Err(invalid(format!(
                "[{}] threshold1_cm..threshold4_cm: 3 or 4 values must be set, got {}",
                section,
                numbered.len()
            )));
        }
        return Ok(Some(numbered));
    }

    Ok(raw.threshold_cm.map(|t| vec![t]))
}

fn default_level_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("Warnstufe {}", i)).collect()
}

fn render_overview_url(template: &str, station_id: &str, station_name: &str) -> Option<String> {
    let template = template.trim();
    if template.is_empty() || (template.contains("{station_id}") && station_id.is_empty()) {
        return None;
    }
    Some(
        template
            .replace("{station_id}", &urlencoding::encode(station_id))
            .replace("{station_name}", &urlencoding::encode(station_name)),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
