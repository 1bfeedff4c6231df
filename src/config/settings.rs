//! Process settings read from the environment (a `.env` file is honoured).

const DEFAULT_PAGE_SIZE: u64 = 100;
const MAX_PAGE_SIZE: u64 = 1000;
const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    /// Environment tag reported in `x-environment`.
    pub environment: String,
    /// Expose underlying error text instead of the generic mapped message.
    pub verbose_errors: bool,
    pub api_version: String,
    /// When set, response bodies are base64-obfuscated. Not encryption.
    pub encoding_key: Option<String>,
    pub default_page_size: u64,
    pub max_page_size: u64,
    /// Fields stripped from every response, on top of per-route exclusions.
    pub excluded_fields: Vec<String>,
    pub body_limit_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            environment: "development".into(),
            verbose_errors: true,
            api_version: env!("CARGO_PKG_VERSION").into(),
            encoding_key: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            excluded_fields: vec!["password".into()],
            body_limit_bytes: DEFAULT_BODY_LIMIT,
        }
    }
}

impl Settings {
    /// APP_ENV, VERBOSE_ERRORS, API_VERSION, RESPONSE_ENCODING_KEY, DEFAULT_PAGE_SIZE,
    /// MAX_PAGE_SIZE, EXCLUDED_FIELDS, BODY_LIMIT_BYTES.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Settings::default();
        let environment = get("APP_ENV").unwrap_or(defaults.environment);
        let verbose_errors = get("VERBOSE_ERRORS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(environment == "development");
        let excluded_fields = get("EXCLUDED_FIELDS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.excluded_fields);
        let max_page_size = get("MAX_PAGE_SIZE").and_then(|v| v.parse().ok()).unwrap_or(defaults.max_page_size);
        Settings {
            environment,
            verbose_errors,
            api_version: get("API_VERSION").unwrap_or(defaults.api_version),
            encoding_key: get("RESPONSE_ENCODING_KEY").filter(|k| !k.is_empty()),
            default_page_size: get("DEFAULT_PAGE_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_page_size)
                .min(max_page_size),
            max_page_size,
            excluded_fields,
            body_limit_bytes: get("BODY_LIMIT_BYTES").and_then(|v| v.parse().ok()).unwrap_or(defaults.body_limit_bytes),
        }
    }

    pub fn production() -> Self {
        Settings {
            environment: "production".into(),
            verbose_errors: false,
            ..Default::default()
        }
    }
}
