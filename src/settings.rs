//! Run settings: built-in defaults, an optional settings file, `RESTTEST_*`
//! environment overrides and command-line flags, merged in that order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compiler::TestSetCompiler;
use crate::error::SettingsError;
use crate::extensions::ExtensionLoader;
use crate::loader::parse_yaml_str;
use crate::registry::Registry;
use crate::test_set::{deep_merge, TestConfig, TestSet};

/// Prefix of environment variables read by [`RunSettings::from_env`]
pub const ENV_PREFIX: &str = "RESTTEST_";

/// Settings file looked up in the working directory when none is given
pub const DEFAULT_SETTINGS_FILES: &[&str] = &["resttest.yaml", "resttest.yml", "resttest.json"];

/// One layer of run settings; `None` leaves the lower layer untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSettings {
    pub print_bodies: Option<bool>,
    pub print_headers: Option<bool>,
    pub ssl_insecure: Option<bool>,
    pub verbose: Option<bool>,
    pub skip_term_colors: Option<bool>,
    pub interactive: Option<bool>,
    pub timeout_secs: Option<f64>,
    pub retries: Option<u32>,
    pub default_base_url: Option<String>,
    pub ext_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub concurrent_testsets: Option<bool>,
    pub vars: Option<Map<String, Value>>,
}

impl RunSettings {
    /// Load a settings file; the format follows the extension
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Err(SettingsError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;

        let settings = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => {
                let value = parse_yaml_str(&content).map_err(|message| SettingsError::InvalidFormat { message })?;
                // An empty YAML document parses as an empty list
                match value {
                    Value::Array(items) if items.is_empty() => Ok(Self::default()),
                    value => serde_json::from_value(value),
                }
            }
            Some("json") => serde_json::from_str(&content),
            _ => {
                return Err(SettingsError::InvalidFormat {
                    message: format!("Unsupported settings file format: {}", path.display()),
                })
            }
        };

        let settings: Self = settings.map_err(|e| SettingsError::InvalidFormat {
            message: format!("{}: {}", path.display(), e),
        })?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// First default settings file present in `dir`, if any
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        DEFAULT_SETTINGS_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// Overrides from the process environment
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_vars(std::env::vars())
    }

    /// Overrides from `RESTTEST_*` pairs; other names are ignored
    pub fn from_vars<I>(vars: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Self::default();
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "PRINT_BODIES" => settings.print_bodies = Some(env_bool(&key, &value)?),
                "PRINT_HEADERS" => settings.print_headers = Some(env_bool(&key, &value)?),
                "SSL_INSECURE" => settings.ssl_insecure = Some(env_bool(&key, &value)?),
                "VERBOSE" => settings.verbose = Some(env_bool(&key, &value)?),
                "SKIP_TERM_COLORS" => settings.skip_term_colors = Some(env_bool(&key, &value)?),
                "INTERACTIVE" => settings.interactive = Some(env_bool(&key, &value)?),
                "CONCURRENT_TESTSETS" => settings.concurrent_testsets = Some(env_bool(&key, &value)?),
                "TIMEOUT" => {
                    settings.timeout_secs = Some(value.parse().map_err(|_| invalid_env(&key, &value))?);
                }
                "RETRIES" => settings.retries = Some(value.parse().map_err(|_| invalid_env(&key, &value))?),
                "DEFAULT_BASE_URL" => settings.default_base_url = Some(value),
                "EXT_DIR" => settings.ext_dir = Some(PathBuf::from(value)),
                "LOG" => settings.log_level = Some(value),
                "VARS" => settings.vars = Some(parse_vars(&value)?),
                other => log::debug!("Ignoring unknown environment setting {}{}", ENV_PREFIX, other),
            }
        }
        Ok(settings)
    }

    /// Layer `other` on top of `self`: every value `other` sets wins; `vars` merge
    pub fn merge(mut self, other: RunSettings) -> Self {
        fn pick<T>(base: &mut Option<T>, over: Option<T>) {
            if over.is_some() {
                *base = over;
            }
        }

        pick(&mut self.print_bodies, other.print_bodies);
        pick(&mut self.print_headers, other.print_headers);
        pick(&mut self.ssl_insecure, other.ssl_insecure);
        pick(&mut self.verbose, other.verbose);
        pick(&mut self.skip_term_colors, other.skip_term_colors);
        pick(&mut self.interactive, other.interactive);
        pick(&mut self.timeout_secs, other.timeout_secs);
        pick(&mut self.retries, other.retries);
        pick(&mut self.default_base_url, other.default_base_url);
        pick(&mut self.ext_dir, other.ext_dir);
        pick(&mut self.log_level, other.log_level);
        pick(&mut self.concurrent_testsets, other.concurrent_testsets);

        match (&mut self.vars, other.vars) {
            (Some(base), Some(over)) => deep_merge(base, &over),
            (base, over @ Some(_)) => *base = over,
            (_, None) => {}
        }
        self
    }

    /// Variables handed to the compiler before any document configuration
    pub fn initial_variables(&self) -> Map<String, Value> {
        let mut variables = self.vars.clone().unwrap_or_default();
        if let Some(base_url) = &self.default_base_url {
            variables.insert("default_base_url".to_string(), Value::String(base_url.clone()));
        }
        variables
    }

    /// Force run-wide flags onto a compiled test set's configuration.
    /// Flags only switch output on; the document can still enable them itself.
    pub fn apply_to(&self, config: &mut TestConfig) {
        if self.print_bodies == Some(true) {
            config.print_bodies = true;
        }
        if self.print_headers == Some(true) {
            config.print_headers = true;
        }
        if self.ssl_insecure == Some(true) {
            config.ssl_insecure = true;
        }
        if self.verbose == Some(true) {
            config.verbose = true;
        }
        if self.interactive == Some(true) {
            config.interactive = true;
        }
        if let Some(skip) = self.skip_term_colors {
            config.skip_term_colors = skip;
        }
        if let Some(seconds) = self.timeout_secs.filter(|s| s.is_finite() && *s > 0.0) {
            config.timeout = Duration::from_secs_f64(seconds);
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
    }

    /// Built-in registry plus the aliases under `ext_dir`, when set
    pub fn registry(&self) -> crate::Result<Registry> {
        let registry = Registry::with_builtins();
        match &self.ext_dir {
            Some(ext_dir) => Ok(ExtensionLoader::load(ext_dir, registry)?),
            None => Ok(registry),
        }
    }

    /// Compile a test file with these settings' variables and force their
    /// flags onto every test set and test
    pub fn compile_suite(&self, registry: &Registry, path: &Path) -> crate::Result<Vec<TestSet>> {
        let mut test_sets = TestSetCompiler::new(registry)
            .with_variables(self.initial_variables())
            .compile_file(path)?;
        for test_set in &mut test_sets {
            test_set.update_configs(|config| self.apply_to(config));
        }
        Ok(test_sets)
    }
}

/// Parse a `--vars` style YAML/JSON mapping
pub fn parse_vars(text: &str) -> Result<Map<String, Value>, SettingsError> {
    match parse_yaml_str(text).map_err(|message| SettingsError::InvalidFormat { message })? {
        Value::Object(map) => Ok(map),
        Value::Array(items) if items.is_empty() => Ok(Map::new()),
        other => Err(SettingsError::InvalidFormat {
            message: format!("variables must be a mapping, got {}", other),
        }),
    }
}

fn env_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid_env(key, value)),
    }
}

fn invalid_env(key: &str, value: &str) -> SettingsError {
    SettingsError::InvalidFormat {
        message: format!("invalid value '{}' for {}", value, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResttestError;
    use serde_json::json;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_load_yaml_and_json() {
        let dir = TempDir::new().unwrap();
        let yaml = dir.path().join("resttest.yaml");
        std::fs::write(&yaml, "print_bodies: true\ntimeout_secs: 2.5\nvars:\n  env: staging\n").unwrap();
        let settings = RunSettings::load(&yaml).unwrap();
        assert_eq!(settings.print_bodies, Some(true));
        assert_eq!(settings.timeout_secs, Some(2.5));
        assert_eq!(settings.vars.unwrap().get("env"), Some(&json!("staging")));

        let json_path = dir.path().join("settings.json");
        std::fs::write(&json_path, r#"{"retries": 2, "ext_dir": "ext"}"#).unwrap();
        let settings = RunSettings::load(&json_path).unwrap();
        assert_eq!(settings.retries, Some(2));
        assert_eq!(settings.ext_dir, Some(PathBuf::from("ext")));

        assert_eq!(RunSettings::discover(dir.path()), Some(yaml));
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RunSettings::load(&dir.path().join("missing.yaml")),
            Err(SettingsError::FileNotFound { .. })
        ));

        let unknown = dir.path().join("bad.yaml");
        std::fs::write(&unknown, "colour: always\n").unwrap();
        assert!(matches!(RunSettings::load(&unknown), Err(SettingsError::InvalidFormat { .. })));

        let toml = dir.path().join("settings.toml");
        std::fs::write(&toml, "retries = 1\n").unwrap();
        assert!(matches!(RunSettings::load(&toml), Err(SettingsError::InvalidFormat { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let settings = RunSettings::from_vars(vars(&[
            ("RESTTEST_PRINT_HEADERS", "yes"),
            ("RESTTEST_TIMEOUT", "4"),
            ("RESTTEST_VARS", "{token: abc}"),
            ("RESTTEST_INTERACTIVE", "on"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();
        assert_eq!(settings.print_headers, Some(true));
        assert_eq!(settings.interactive, Some(true));
        assert_eq!(settings.timeout_secs, Some(4.0));
        assert_eq!(settings.vars.unwrap().get("token"), Some(&json!("abc")));

        assert!(RunSettings::from_vars(vars(&[("RESTTEST_RETRIES", "many")])).is_err());
        assert!(RunSettings::from_vars(vars(&[("RESTTEST_VERBOSE", "maybe")])).is_err());
    }

    #[test]
    fn test_layering_later_wins() {
        let file = RunSettings {
            print_bodies: Some(true),
            retries: Some(1),
            vars: Some(json!({"env": "file", "keep": 1}).as_object().unwrap().clone()),
            ..RunSettings::default()
        };
        let env = RunSettings {
            retries: Some(3),
            ..RunSettings::default()
        };
        let cli = RunSettings {
            vars: Some(json!({"env": "cli"}).as_object().unwrap().clone()),
            default_base_url: Some("http://localhost:8080".to_string()),
            ..RunSettings::default()
        };

        let merged = RunSettings::default().merge(file).merge(env).merge(cli);
        assert_eq!(merged.print_bodies, Some(true));
        assert_eq!(merged.retries, Some(3));
        assert_eq!(
            Value::Object(merged.initial_variables()),
            json!({"env": "cli", "keep": 1, "default_base_url": "http://localhost:8080"})
        );
    }

    #[test]
    fn test_apply_to_config() {
        let mut config = TestConfig::default();
        config.print_headers = true;
        let settings = RunSettings {
            print_bodies: Some(true),
            print_headers: Some(false),
            timeout_secs: Some(1.5),
            skip_term_colors: Some(true),
            interactive: Some(true),
            ..RunSettings::default()
        };
        settings.apply_to(&mut config);
        assert!(config.interactive);
        assert!(config.print_bodies);
        assert!(config.print_headers);
        assert!(config.skip_term_colors);
        assert_eq!(config.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_parse_vars() {
        assert_eq!(parse_vars("a: 1\nb: two\n").unwrap().len(), 2);
        assert!(parse_vars("").unwrap().is_empty());
        assert!(parse_vars("- 1\n- 2\n").is_err());
    }

    #[test]
    fn test_entry_points_report_typed_errors() {
        let dir = TempDir::new().unwrap();
        let missing_ext = RunSettings {
            ext_dir: Some(dir.path().join("no-such-ext")),
            ..RunSettings::default()
        };
        assert!(matches!(missing_ext.registry(), Err(ResttestError::Settings(_))));

        let settings = RunSettings::default();
        let registry = settings.registry().unwrap();
        assert!(matches!(
            settings.compile_suite(&registry, &dir.path().join("missing.yaml")),
            Err(ResttestError::Compile(_))
        ));

        std::fs::write(dir.path().join("suite.yaml"), "- url: /a\n- config: {retries: 1}\n- url: /b\n").unwrap();
        let forced = RunSettings {
            retries: Some(5),
            print_bodies: Some(true),
            ..RunSettings::default()
        };
        let test_sets = forced.compile_suite(&registry, &dir.path().join("suite.yaml")).unwrap();
        assert_eq!(test_sets.len(), 1);
        assert!(test_sets[0]
            .test_steps()
            .all(|(_, config)| config.retries == 5 && config.print_bodies));
    }
}
