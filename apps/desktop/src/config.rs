use std::{collections::HashMap, fs, path::Path};

use client_core::{DEFAULT_CDN_BASE_URL, DEFAULT_GATEWAY_URL, DEFAULT_REST_BASE_URL};

#[derive(Debug, Clone)]
pub struct Settings {
    pub token: String,
    pub rest_base_url: String,
    pub gateway_url: String,
    pub cdn_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            token: String::new(),
            rest_base_url: DEFAULT_REST_BASE_URL.into(),
            gateway_url: DEFAULT_GATEWAY_URL.into(),
            cdn_base_url: DEFAULT_CDN_BASE_URL.into(),
        }
    }
}

/// Loads settings from the TOML file (missing file is fine), then lets
/// environment variables override individual fields.
pub fn load_settings(config_path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(config_path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("token") {
                settings.token = v.clone();
            }
            if let Some(v) = file_cfg.get("rest_base_url") {
                settings.rest_base_url = v.clone();
            }
            if let Some(v) = file_cfg.get("gateway_url") {
                settings.gateway_url = v.clone();
            }
            if let Some(v) = file_cfg.get("cdn_base_url") {
                settings.cdn_base_url = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("FERROCORD_TOKEN") {
        settings.token = v;
    }
    if let Ok(v) = std::env::var("DISCORD_TOKEN") {
        settings.token = v;
    }
    if let Ok(v) = std::env::var("FERROCORD_REST_BASE_URL") {
        settings.rest_base_url = v;
    }
    if let Ok(v) = std::env::var("FERROCORD_GATEWAY_URL") {
        settings.gateway_url = v;
    }
    if let Ok(v) = std::env::var("FERROCORD_CDN_BASE_URL") {
        settings.cdn_base_url = v;
    }

    settings
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(Path::new("/nonexistent/ferrocord.toml"));
        assert!(settings.token.is_empty());
        assert_eq!(settings.rest_base_url, DEFAULT_REST_BASE_URL);
        assert_eq!(settings.gateway_url, DEFAULT_GATEWAY_URL);
    }

    #[test]
    fn file_values_override_defaults() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("ferrocord_test_{suffix}.toml"));
        fs::write(
            &path,
            "token = \"file-token\"\nrest_base_url = \"http://localhost:9/api\"\n",
        )
        .expect("write config");

        let settings = load_settings(&path);
        assert_eq!(settings.token, "file-token");
        assert_eq!(settings.rest_base_url, "http://localhost:9/api");
        assert_eq!(settings.gateway_url, DEFAULT_GATEWAY_URL);

        fs::remove_file(path).expect("cleanup");
    }
}
