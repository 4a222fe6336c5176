use std::{collections::HashMap, path::Path, time::Duration};

use anyhow::Result;

use crate::{
    assistant::AssistantSettings,
    citation::{DEFAULT_BATCH_SIZE, DEFAULT_CACHE_CAPACITY},
    db::Db,
    history::RetryPolicy,
};

/// Full application configuration.
/// Non-sensitive fields are seeded to and loaded from the DB `config` table.
/// Sensitive fields (API keys, tokens) come from env/.env only.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,

    // Web
    pub web_bind: String,
    pub web_port: u16,

    // Flow backend
    /// "ollama" (default) or "anthropic".
    pub backend: String,
    pub model: String,
    pub ollama_base_url: String,
    pub anthropic_api_key: String,
    pub flow_timeout_s: u64,

    // Knowledge source
    pub cloudflare_account_id: String,
    pub cloudflare_autorag_name: String,
    pub cloudflare_api_token: String,

    // Citations
    pub citation_batch_size: usize,
    pub citation_cache_capacity: usize,
    /// 0 disables expiry.
    pub citation_cache_ttl_s: u64,

    // History writer
    pub history_max_attempts: u32,
    pub history_retry_base_ms: u64,

    // Flows
    pub checklist_jurisdiction: String,
    pub library_context_chars: usize,
}

pub fn parse_dotenv_file(path: impl AsRef<Path>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(path) else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim().trim_matches('"');
            map.insert(k.trim().to_string(), v.to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_u32(key: &str, dotenv: &HashMap<String, String>, default: u32) -> u32 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_u16(key: &str, dotenv: &HashMap<String, String>, default: u16) -> u16 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_usize(key: &str, dotenv: &HashMap<String, String>, default: usize) -> usize {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_dotenv(&parse_dotenv_file(".env"))
    }

    /// Build from process env, falling back to `dotenv` then defaults.
    pub fn from_dotenv(dotenv: &HashMap<String, String>) -> Result<Self> {
        let backend = get_str("BACKEND", dotenv, "ollama").to_lowercase();
        let default_model = match backend.as_str() {
            "anthropic" => "claude-sonnet-4-5",
            _ => "llama3.1",
        };

        let c = Self {
            data_dir: get_str("DATA_DIR", dotenv, "store"),
            web_bind: get_str("WEB_BIND", dotenv, "127.0.0.1"),
            web_port: get_u16("WEB_PORT", dotenv, 3131),
            model: get_str("MODEL", dotenv, default_model),
            backend,
            ollama_base_url: get_str("OLLAMA_BASE_URL", dotenv, "http://127.0.0.1:11434"),
            anthropic_api_key: get_str("ANTHROPIC_API_KEY", dotenv, ""),
            flow_timeout_s: get_u64("FLOW_TIMEOUT_S", dotenv, 120),
            cloudflare_account_id: get_str("CLOUDFLARE_ACCOUNT_ID", dotenv, ""),
            cloudflare_autorag_name: get_str("CLOUDFLARE_AUTORAG_NAME", dotenv, ""),
            cloudflare_api_token: get_str("CLOUDFLARE_API_TOKEN", dotenv, ""),
            citation_batch_size: get_usize("CITATION_BATCH_SIZE", dotenv, DEFAULT_BATCH_SIZE),
            citation_cache_capacity: get_usize(
                "CITATION_CACHE_CAPACITY",
                dotenv,
                DEFAULT_CACHE_CAPACITY,
            ),
            citation_cache_ttl_s: get_u64("CITATION_CACHE_TTL_S", dotenv, 0),
            history_max_attempts: get_u32("HISTORY_MAX_ATTEMPTS", dotenv, 3),
            history_retry_base_ms: get_u64("HISTORY_RETRY_BASE_MS", dotenv, 500),
            checklist_jurisdiction: get_str("CHECKLIST_JURISDICTION", dotenv, "India"),
            library_context_chars: get_usize("LIBRARY_CONTEXT_CHARS", dotenv, 12_000),
        };

        if c.backend == "anthropic" && c.anthropic_api_key.is_empty() {
            anyhow::bail!("BACKEND=anthropic requires ANTHROPIC_API_KEY");
        }
        Ok(c)
    }

    /// DB key for the model, scoped to the backend so switching backends
    /// never picks up the other provider's model name.
    fn model_key(&self) -> String {
        format!("model.{}", self.backend)
    }

    /// Write tunable fields to DB if not already present (first-run seeding).
    /// `data_dir` and `backend` stay env-only: the DB lives under one and the
    /// API key check depends on the other.
    pub fn seed_db(&self, db: &Db) -> Result<()> {
        let model_key = self.model_key();
        let entries: &[(&str, String)] = &[
            ("web_bind", self.web_bind.clone()),
            ("web_port", self.web_port.to_string()),
            (model_key.as_str(), self.model.clone()),
            ("ollama_base_url", self.ollama_base_url.clone()),
            ("flow_timeout_s", self.flow_timeout_s.to_string()),
            ("citation_batch_size", self.citation_batch_size.to_string()),
            (
                "citation_cache_capacity",
                self.citation_cache_capacity.to_string(),
            ),
            ("citation_cache_ttl_s", self.citation_cache_ttl_s.to_string()),
            ("history_max_attempts", self.history_max_attempts.to_string()),
            (
                "history_retry_base_ms",
                self.history_retry_base_ms.to_string(),
            ),
            ("checklist_jurisdiction", self.checklist_jurisdiction.clone()),
            (
                "library_context_chars",
                self.library_context_chars.to_string(),
            ),
        ];
        let conn_guard = db.raw_conn();
        let conn = conn_guard.lock().unwrap_or_else(|e| e.into_inner());
        for (key, value) in entries {
            conn.execute(
                "INSERT OR IGNORE INTO config (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
                rusqlite::params![key, value],
            )?;
        }
        Ok(())
    }

    /// Return a new Config with tunable fields overridden from DB values.
    pub fn load_from_db(&self, db: &Db) -> Self {
        let mut c = self.clone();
        let get = |key: &str| db.get_config(key).ok().flatten();
        let get_str = |key: &str, cur: &str| get(key).unwrap_or_else(|| cur.to_string());
        macro_rules! load_parsed {
            ($key:expr, $field:expr) => {
                if let Some(v) = get($key).and_then(|s| s.parse().ok()) {
                    $field = v;
                }
            };
        }
        c.web_bind = get_str("web_bind", &c.web_bind);
        c.model = get_str(&self.model_key(), &c.model);
        c.ollama_base_url = get_str("ollama_base_url", &c.ollama_base_url);
        c.checklist_jurisdiction = get_str("checklist_jurisdiction", &c.checklist_jurisdiction);
        load_parsed!("web_port", c.web_port);
        load_parsed!("flow_timeout_s", c.flow_timeout_s);
        load_parsed!("citation_batch_size", c.citation_batch_size);
        load_parsed!("citation_cache_capacity", c.citation_cache_capacity);
        load_parsed!("citation_cache_ttl_s", c.citation_cache_ttl_s);
        load_parsed!("history_max_attempts", c.history_max_attempts);
        load_parsed!("history_retry_base_ms", c.history_retry_base_ms);
        load_parsed!("library_context_chars", c.library_context_chars);
        c
    }

    pub fn db_path(&self) -> String {
        format!("{}/nyai.db", self.data_dir)
    }

    pub fn citation_cache_ttl(&self) -> Option<Duration> {
        (self.citation_cache_ttl_s > 0).then(|| Duration::from_secs(self.citation_cache_ttl_s))
    }

    pub fn history_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.history_max_attempts.max(1),
            base_delay: Duration::from_millis(self.history_retry_base_ms),
        }
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_s.max(1))
    }

    pub fn assistant_settings(&self) -> AssistantSettings {
        AssistantSettings {
            jurisdiction: self.checklist_jurisdiction.clone(),
            library_context_chars: self.library_context_chars,
        }
    }
}
