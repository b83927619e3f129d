use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::models::Error;
use crate::verify::patterns::{COMMON_PATTERNS, MAX_CUSTOM_PATTERNS, is_valid_custom_pattern};
use crate::verify::{DEFAULT_MAIL_FROM, VerifyOptions};

const MIN_TIMEOUT_SECONDS: i64 = 1;
const MAX_TIMEOUT_SECONDS: i64 = 30;
const MIN_PATTERNS_ENABLED: usize = 5;
const PATTERN_COUNT: usize = COMMON_PATTERNS.len();

pub const KEY_SMTP_TIMEOUT: &str = "smtp_timeout_seconds";
pub const KEY_DNS_TIMEOUT: &str = "dns_timeout_seconds";
pub const KEY_PATTERN_INDICES: &str = "enabled_pattern_indices";
pub const KEY_MAIL_FROM: &str = "smtp_mail_from";
pub const KEY_WEB_PROVIDER: &str = "web_search_provider";
pub const KEY_WEB_API_KEY: &str = "web_search_api_key";
pub const KEY_ALLOW_NO_LASTNAME: &str = "allow_no_lastname";
pub const KEY_CUSTOM_PATTERNS: &str = "custom_patterns";

/// One override: key -> value per workspace, value always a string. New
/// settings need a new parse branch here, never a migration.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkspaceConfigEntry {
    pub id: i64,
    pub workspace_id: i64,
    pub key: String,
    pub value: String,
}

/// Effective verification settings: workspace overrides merged with system
/// defaults, parsed and clamped. Unknown keys are ignored; malformed stored
/// values fall back to the default.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationSettings {
    pub smtp_timeout_seconds: u64,
    pub dns_timeout_seconds: f64,
    pub enabled_pattern_indices: Vec<usize>,
    pub smtp_mail_from: String,
    pub web_search_provider: String,
    pub web_search_api_key: String,
    pub allow_no_lastname: bool,
    pub custom_patterns: Vec<String>,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            smtp_timeout_seconds: 5,
            dns_timeout_seconds: 5.0,
            enabled_pattern_indices: (0..PATTERN_COUNT).collect(),
            smtp_mail_from: DEFAULT_MAIL_FROM.to_string(),
            web_search_provider: String::new(),
            web_search_api_key: String::new(),
            allow_no_lastname: false,
            custom_patterns: Vec::new(),
        }
    }
}

fn clamp_timeout_i64(value: i64) -> i64 {
    value.clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS)
}

fn clamp_timeout_f64(value: f64) -> f64 {
    value.clamp(MIN_TIMEOUT_SECONDS as f64, MAX_TIMEOUT_SECONDS as f64)
}

/// Parse a stored JSON index list. Anything malformed, out of range, or with
/// fewer than five distinct valid indices falls back to the full bank.
fn parse_pattern_indices(raw: &str) -> Vec<usize> {
    let all: Vec<usize> = (0..PATTERN_COUNT).collect();
    let Ok(serde_json::Value::Array(values)) = serde_json::from_str(raw) else {
        return all;
    };
    let mut indices = Vec::new();
    for value in values {
        if let Some(i) = value.as_u64().map(|i| i as usize)
            && i < PATTERN_COUNT
            && !indices.contains(&i)
        {
            indices.push(i);
        }
    }
    if indices.len() < MIN_PATTERNS_ENABLED {
        return all;
    }
    indices.truncate(PATTERN_COUNT);
    indices
}

fn parse_custom_patterns(raw: &str) -> Vec<String> {
    let Ok(serde_json::Value::Array(values)) = serde_json::from_str(raw) else {
        return Vec::new();
    };
    values
        .into_iter()
        .filter_map(|value| value.as_str().map(|s| s.trim().to_string()))
        .filter(|pattern| is_valid_custom_pattern(pattern))
        .take(MAX_CUSTOM_PATTERNS)
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

impl VerificationSettings {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut settings = Self::default();
        for (key, value) in entries {
            match key {
                KEY_SMTP_TIMEOUT => {
                    if let Ok(parsed) = value.trim().parse::<i64>() {
                        settings.smtp_timeout_seconds = clamp_timeout_i64(parsed) as u64;
                    }
                }
                KEY_DNS_TIMEOUT => {
                    if let Ok(parsed) = value.trim().parse::<f64>() {
                        settings.dns_timeout_seconds = clamp_timeout_f64(parsed);
                    }
                }
                KEY_PATTERN_INDICES => {
                    settings.enabled_pattern_indices = parse_pattern_indices(value);
                }
                KEY_MAIL_FROM => {
                    let trimmed = value.trim();
                    if !trimmed.is_empty() {
                        settings.smtp_mail_from = trimmed.to_string();
                    }
                }
                KEY_WEB_PROVIDER => settings.web_search_provider = value.trim().to_string(),
                KEY_WEB_API_KEY => settings.web_search_api_key = value.trim().to_string(),
                KEY_ALLOW_NO_LASTNAME => settings.allow_no_lastname = parse_bool(value),
                KEY_CUSTOM_PATTERNS => settings.custom_patterns = parse_custom_patterns(value),
                // Unrecognized keys are storage-level noise, not errors.
                _ => {}
            }
        }
        settings
    }

    pub fn to_verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            mail_from: self.smtp_mail_from.clone(),
            smtp_deadline: Duration::from_secs(self.smtp_timeout_seconds),
            dns_deadline: Duration::from_secs_f64(self.dns_timeout_seconds),
            enabled_pattern_indices: Some(self.enabled_pattern_indices.clone()),
            web_search_provider: self.web_search_provider.clone(),
            web_search_api_key: self.web_search_api_key.clone(),
            allow_no_lastname: self.allow_no_lastname,
            custom_patterns: self.custom_patterns.clone(),
        }
    }
}

fn mask_api_key(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else if key.len() > 4 {
        format!("{}{}", "*".repeat(8), &key[key.len() - 4..])
    } else {
        "*".repeat(key.len())
    }
}

/// The merged configuration as returned to clients: secrets masked, pattern
/// bank labels included.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct ConfigView {
    pub smtp_timeout_seconds: u64,
    pub dns_timeout_seconds: f64,
    pub enabled_pattern_indices: Vec<usize>,
    pub smtp_mail_from: String,
    pub web_search_provider: String,
    pub web_search_api_key: String,
    pub allow_no_lastname: bool,
    pub custom_patterns: Vec<String>,
    pub pattern_labels: Vec<String>,
}

impl ConfigView {
    pub fn from_settings(settings: &VerificationSettings) -> Self {
        Self {
            smtp_timeout_seconds: settings.smtp_timeout_seconds,
            dns_timeout_seconds: settings.dns_timeout_seconds,
            enabled_pattern_indices: settings.enabled_pattern_indices.clone(),
            smtp_mail_from: settings.smtp_mail_from.clone(),
            web_search_provider: settings.web_search_provider.clone(),
            web_search_api_key: mask_api_key(&settings.web_search_api_key),
            allow_no_lastname: settings.allow_no_lastname,
            custom_patterns: settings.custom_patterns.clone(),
            pattern_labels: COMMON_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Requested configuration change. A `None` field deletes the override so
/// the workspace inherits the system default again.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
    pub smtp_timeout_seconds: Option<i64>,
    pub dns_timeout_seconds: Option<f64>,
    pub enabled_pattern_indices: Option<Vec<i64>>,
    pub smtp_mail_from: Option<String>,
    pub web_search_provider: Option<String>,
    pub web_search_api_key: Option<String>,
    pub allow_no_lastname: Option<bool>,
    pub custom_patterns: Option<Vec<String>>,
}

/// (key, Some(value)) upserts the override; (key, None) deletes it.
type UpdatePlan = Vec<(&'static str, Option<String>)>;

impl ConfigUpdate {
    /// Validate the request and turn it into a storage plan.
    pub fn into_plan(self) -> Result<UpdatePlan, Error> {
        let mut plan: UpdatePlan = Vec::new();

        if let Some(v) = self.smtp_timeout_seconds
            && !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&v)
        {
            return Err(Error::Validation(format!(
                "{KEY_SMTP_TIMEOUT} must be between {MIN_TIMEOUT_SECONDS} and {MAX_TIMEOUT_SECONDS}"
            )));
        }
        if let Some(v) = self.dns_timeout_seconds
            && !((MIN_TIMEOUT_SECONDS as f64)..=(MAX_TIMEOUT_SECONDS as f64)).contains(&v)
        {
            return Err(Error::Validation(format!(
                "{KEY_DNS_TIMEOUT} must be between {MIN_TIMEOUT_SECONDS} and {MAX_TIMEOUT_SECONDS}"
            )));
        }
        plan.push((
            KEY_SMTP_TIMEOUT,
            self.smtp_timeout_seconds.map(|v| v.to_string()),
        ));
        plan.push((
            KEY_DNS_TIMEOUT,
            self.dns_timeout_seconds.map(|v| v.to_string()),
        ));

        let indices = match self.enabled_pattern_indices {
            Some(indices) => {
                let mut distinct: Vec<usize> = Vec::new();
                for i in indices {
                    if !(0..PATTERN_COUNT as i64).contains(&i) {
                        return Err(Error::Validation(format!(
                            "pattern index {i} is out of range"
                        )));
                    }
                    if !distinct.contains(&(i as usize)) {
                        distinct.push(i as usize);
                    }
                }
                if distinct.len() < MIN_PATTERNS_ENABLED {
                    return Err(Error::Validation(format!(
                        "at least {MIN_PATTERNS_ENABLED} distinct pattern indices are required"
                    )));
                }
                Some(serde_json::json!(distinct).to_string())
            }
            None => None,
        };
        plan.push((KEY_PATTERN_INDICES, indices));

        let mail_from = self
            .smtp_mail_from
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        plan.push((KEY_MAIL_FROM, mail_from));

        let provider = match self.web_search_provider {
            Some(provider) => {
                let provider = provider.trim().to_lowercase();
                match provider.as_str() {
                    "" => None,
                    "bing" | "serper" => Some(provider),
                    other => {
                        return Err(Error::Validation(format!(
                            "unsupported web search provider '{other}'"
                        )));
                    }
                }
            }
            None => None,
        };
        plan.push((KEY_WEB_PROVIDER, provider));

        let api_key = self
            .web_search_api_key
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        plan.push((KEY_WEB_API_KEY, api_key));

        plan.push((
            KEY_ALLOW_NO_LASTNAME,
            self.allow_no_lastname.map(|v| v.to_string()),
        ));

        // A list with zero valid entries deletes the override.
        let custom = match self.custom_patterns {
            Some(patterns) => {
                let valid: Vec<String> = patterns
                    .into_iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| is_valid_custom_pattern(p))
                    .take(MAX_CUSTOM_PATTERNS)
                    .collect();
                if valid.is_empty() {
                    None
                } else {
                    Some(serde_json::json!(valid).to_string())
                }
            }
            None => None,
        };
        plan.push((KEY_CUSTOM_PATTERNS, custom));

        Ok(plan)
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceConfigRepository {
    pool: PgPool,
}

impl WorkspaceConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, workspace_id: i64) -> Result<Vec<WorkspaceConfigEntry>, Error> {
        Ok(sqlx::query_as::<_, WorkspaceConfigEntry>(
            r#"
            SELECT id, workspace_id, key, value
            FROM workspace_config_entries
            WHERE workspace_id = $1
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn resolve(&self, workspace_id: i64) -> Result<VerificationSettings, Error> {
        let entries = self.list(workspace_id).await?;
        Ok(VerificationSettings::from_entries(
            entries.iter().map(|e| (e.key.as_str(), e.value.as_str())),
        ))
    }

    pub async fn view(&self, workspace_id: i64) -> Result<ConfigView, Error> {
        Ok(ConfigView::from_settings(&self.resolve(workspace_id).await?))
    }

    pub async fn apply_update(
        &self,
        workspace_id: i64,
        update: ConfigUpdate,
    ) -> Result<ConfigView, Error> {
        let plan = update.into_plan()?;
        let mut tx = self.pool.begin().await?;
        for (key, value) in plan {
            match value {
                Some(value) => {
                    sqlx::query(
                        r#"
                        INSERT INTO workspace_config_entries (workspace_id, key, value)
                        VALUES ($1, $2, $3)
                        ON CONFLICT (workspace_id, key) DO UPDATE SET value = EXCLUDED.value
                        "#,
                    )
                    .bind(workspace_id)
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query(
                        "DELETE FROM workspace_config_entries WHERE workspace_id = $1 AND key = $2",
                    )
                    .bind(workspace_id)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
        self.view(workspace_id).await
    }
}
