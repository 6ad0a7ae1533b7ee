use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::InterpreterError;
use crate::interop::Interpreter;
use crate::logging::{parse_level, LogConfig, LogFormat, LogOutput};

/// File name searched for by [`Config::discover`].
pub const CONFIG_FILE: &str = "luacall.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How each interpreter is prepared before it serves calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_true")]
    pub stdlib: bool,

    /// Glob patterns, loaded in order; matches of one pattern load sorted.
    #[serde(default)]
    pub scripts: Vec<String>,

    /// Globals set before any script runs.
    #[serde(default)]
    pub globals: Map<String, Value>,

    /// Directory relative script patterns are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_count")]
    pub count: usize,

    #[serde(default = "default_mailbox")]
    pub mailbox: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_format")]
    pub format: String,

    /// Log into daily-rolling files here instead of stderr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stdlib: true,
            scripts: Vec::new(),
            globals: Map::new(),
            base_dir: None,
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            mailbox: default_mailbox(),
            timeout_ms: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            directory: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_count() -> usize { 1 }
fn default_mailbox() -> usize { 64 }
fn default_level() -> String { "info".to_string() }
fn default_format() -> String { "compact".to_string() }

impl RuntimeConfig {
    /// Expand the script patterns into concrete paths.
    pub fn script_paths(&self) -> Result<Vec<PathBuf>, InterpreterError> {
        let mut paths = Vec::new();

        for pattern in &self.scripts {
            let resolved = match &self.base_dir {
                Some(base) if Path::new(pattern).is_relative() => {
                    base.join(pattern).to_string_lossy().into_owned()
                }
                _ => pattern.clone(),
            };

            let entries = glob::glob(&resolved).map_err(|e| InterpreterError::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;

            let mut matched = Vec::new();
            for entry in entries {
                let path = entry.map_err(|e| {
                    let path = e.path().to_path_buf();
                    InterpreterError::io(path, e.into_error())
                })?;
                matched.push(path);
            }

            // A literal path that matches nothing is a missing file, not an empty glob.
            if matched.is_empty() && !has_glob_meta(pattern) {
                return Err(InterpreterError::io(
                    resolved,
                    io::Error::from(io::ErrorKind::NotFound),
                ));
            }

            matched.sort();
            for path in matched {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }

    /// Create an interpreter, set globals and load every script.
    pub fn build(&self) -> Result<Interpreter, InterpreterError> {
        let mut interp = if self.stdlib {
            Interpreter::new()?
        } else {
            Interpreter::bare()?
        };

        interp.set_globals(&self.globals);
        for path in self.script_paths()? {
            interp.load_file(&path)?;
        }
        Ok(interp)
    }
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

impl WorkersConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> LogConfig {
        let mut config = LogConfig::new();
        if let Some(level) = parse_level(&self.level) {
            config = config.with_level(level);
        }
        if let Some(format) = LogFormat::parse(&self.format) {
            config = config.with_format(format);
        }
        if let Some(directory) = &self.directory {
            config = config.with_output(LogOutput::File {
                directory: directory.clone(),
                prefix: "luacall".to_string(),
            });
        }
        config
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Relative script patterns resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config = Self::parse(&content)?;
        config.runtime.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Look for `luacall.toml` in the current directory and its parents.
    pub fn discover() -> Option<Self> {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return Some(config);
                }
            }
            current = dir.parent().map(Path::to_path_buf);
        }

        None
    }

    /// Default configuration rendered as TOML.
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: io::Error },
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Failed to read config {}: {}", path.display(), source)
            }
            Self::Parse(e) => write!(f, "Failed to parse config: {}", e),
            Self::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            Self::Serialize(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.runtime.stdlib);
        assert_eq!(config.workers.count, 1);
        assert_eq!(config.workers.mailbox, 64);
        assert!(config.workers.timeout().is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[runtime]
stdlib = false
scripts = ["a.lua", "lib/*.lua"]

[runtime.globals]
env = "prod"
limits = [1, 2]

[workers]
count = 4
timeout_ms = 250

[logging]
level = "debug"
format = "json"
"#;

        let config = Config::parse(toml).unwrap();
        assert!(!config.runtime.stdlib);
        assert_eq!(config.runtime.scripts, vec!["a.lua", "lib/*.lua"]);
        assert_eq!(config.runtime.globals["env"], json!("prod"));
        assert_eq!(config.runtime.globals["limits"], json!([1, 2]));
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.workers.timeout(), Some(Duration::from_millis(250)));

        let log = config.logging.to_log_config();
        assert_eq!(log.level, tracing::Level::DEBUG);
        assert_eq!(log.format, LogFormat::Json);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(Config::parse("[workers]\ncount = \"many\""), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_generate_default_roundtrips() {
        let text = Config::generate_default();
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.workers.mailbox, 64);
    }

    #[test]
    fn test_build_from_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/b.lua"), "function b(s) return prefix .. 'b' end").unwrap();
        fs::write(dir.path().join("lib/a.lua"), "function a(s) return prefix .. 'a' end").unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[runtime]\nscripts = [\"lib/*.lua\"]\n[runtime.globals]\nprefix = \">\"\n",
        )
        .unwrap();

        let config = Config::load(&dir.path().join(CONFIG_FILE)).unwrap();
        let paths = config.runtime.script_paths().unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("lib/a.lua"));

        let mut interp = config.runtime.build().unwrap();
        assert_eq!(interp.invoke("a", "").as_str(), Some(">a"));
        assert_eq!(interp.invoke("b", "").as_str(), Some(">b"));
    }

    #[test]
    fn test_missing_literal_script() {
        let runtime = RuntimeConfig {
            scripts: vec!["/definitely/not/here.lua".to_string()],
            ..RuntimeConfig::default()
        };
        assert!(matches!(runtime.script_paths(), Err(InterpreterError::Io { .. })));

        let runtime = RuntimeConfig {
            scripts: vec!["/definitely/not/here/*.lua".to_string()],
            ..RuntimeConfig::default()
        };
        assert!(runtime.script_paths().unwrap().is_empty());
    }
}
