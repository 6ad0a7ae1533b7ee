use crate::core::CallResult;
use crate::frontend::config::Config;
use crate::logging::{init_logging, parse_level};
use crate::metrics::CallMetrics;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, Level};

const USAGE: &str = "\
Usage: luacall [OPTIONS] <function> [payload]

Calls a global Lua function with one string argument and prints its result.
The payload is read from stdin when omitted or '-'. Arguments after '--'
are never treated as options, so a payload such as '-5' can be passed.

Options:
  -s, --script <file>    Load a Lua script (repeatable)
  -c, --config <file>    Load a TOML configuration (default: discover luacall.toml)
  -r, --repeat <n>       Invoke n times and print timing statistics
      --json             Pretty-print the result as JSON
      --log-level <lvl>  trace, debug, info, warn or error
  -h, --help             Print this help";

#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub scripts: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub function: String,
    pub payload: Option<String>,
    pub repeat: usize,
    pub json: bool,
    pub log_level: Option<Level>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            scripts: Vec::new(),
            config: None,
            function: String::new(),
            payload: None,
            repeat: 1,
            json: false,
            log_level: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliError {
    /// `--help` was requested.
    Help,
    Usage(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Help => f.write_str(USAGE),
            Self::Usage(msg) => write!(f, "{}\n\n{}", msg, USAGE),
        }
    }
}

impl std::error::Error for CliError {}

pub struct Cli {
    config: CliConfig,
}

impl Cli {
    pub fn new(config: CliConfig) -> Self {
        Self { config }
    }

    /// Run the invocation; returns the process exit code.
    pub fn run(&self) -> Result<i32, Box<dyn std::error::Error>> {
        let settings = self.load_settings()?;

        let mut log_config = settings.logging.to_log_config();
        if let Some(level) = self.config.log_level {
            log_config = log_config.with_level(level);
        }
        let _guard = init_logging(log_config);

        let mut interp = settings.runtime.build()?;
        for script in &self.config.scripts {
            interp.load_file(script)?;
        }

        let payload = self.payload()?;
        debug!(function = %self.config.function, payload_len = payload.len(), "payload ready");

        let metrics = CallMetrics::new();
        let mut last = None;
        for _ in 0..self.config.repeat.max(1) {
            let start = Instant::now();
            let result = interp.invoke(&self.config.function, &payload);
            metrics.record(&self.config.function, start.elapsed(), &result);
            last = Some(result);
        }

        if self.config.repeat > 1 {
            if let Some(stats) = metrics.get_timing_stats(&self.config.function) {
                eprintln!("{}", stats);
            }
            info!(stack_depth = interp.stack_depth(), memory_bytes = interp.memory_bytes(), "repeat finished");
        }

        match last {
            Some(result) => self.emit(result),
            None => Ok(1),
        }
    }

    fn load_settings(&self) -> Result<Config, Box<dyn std::error::Error>> {
        Ok(match &self.config.config {
            Some(path) => Config::load(path)?,
            None => Config::discover().unwrap_or_default(),
        })
    }

    fn payload(&self) -> io::Result<Vec<u8>> {
        match self.config.payload.as_deref() {
            Some("-") | None => {
                let mut buf = Vec::new();
                io::stdin().read_to_end(&mut buf)?;
                Ok(buf)
            }
            Some(payload) => Ok(payload.as_bytes().to_vec()),
        }
    }

    fn emit(&self, result: CallResult) -> Result<i32, Box<dyn std::error::Error>> {
        match result {
            CallResult::Success(bytes) => {
                let mut stdout = io::stdout().lock();
                if self.config.json {
                    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
                    writeln!(stdout, "{}", serde_json::to_string_pretty(&value)?)?;
                } else {
                    stdout.write_all(&bytes)?;
                }
                stdout.flush()?;
                Ok(0)
            }
            CallResult::Failure(err) => {
                eprintln!("error: {}", err);
                Ok(1)
            }
        }
    }
}

pub fn parse_args() -> Result<CliConfig, CliError> {
    parse_args_from(std::env::args().skip(1))
}

/// Parse arguments (without the program name).
pub fn parse_args_from<I>(args: I) -> Result<CliConfig, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut config = CliConfig::default();
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(CliError::Help),
            "-s" | "--script" => config.scripts.push(PathBuf::from(value(&mut args, &arg)?)),
            "-c" | "--config" => config.config = Some(PathBuf::from(value(&mut args, &arg)?)),
            "-r" | "--repeat" => {
                config.repeat = value(&mut args, &arg)?
                    .parse()
                    .map_err(|_| CliError::Usage(format!("Invalid value for {}", arg)))?;
            }
            "--json" => config.json = true,
            "--log-level" => {
                let level = value(&mut args, &arg)?;
                config.log_level = Some(
                    parse_level(&level)
                        .ok_or_else(|| CliError::Usage(format!("Unknown log level: {}", level)))?,
                );
            }
            "-" => positional.push(arg),
            "--" => positional.extend(args.by_ref()),
            opt if opt.starts_with('-') => {
                return Err(CliError::Usage(format!("Unknown option: {}", opt)));
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    config.function = positional
        .next()
        .ok_or_else(|| CliError::Usage("No function specified".to_string()))?;
    config.payload = positional.next();
    if let Some(extra) = positional.next() {
        return Err(CliError::Usage(format!("Unexpected argument: {}", extra)));
    }

    Ok(config)
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, CliError> {
    args.next()
        .ok_or_else(|| CliError::Usage(format!("{} requires an argument", flag)))
}

/// Entry point for CLI binary; returns the exit code.
pub fn main() -> i32 {
    let config = match parse_args() {
        Ok(config) => config,
        Err(CliError::Help) => {
            println!("{}", USAGE);
            return 0;
        }
        Err(e) => {
            eprintln!("{}", e);
            return 2;
        }
    };

    match Cli::new(config).run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            1
        }
    }
}
