use std::io::{self, BufRead, Write};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use playcore::logging::{apply_msg_level, init_logging, LoggingMode};
use playcore::{Core, CoreConfig, MediaInfo, Node};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Playcore shell
///
/// Reads one command per line from standard input and prints one JSON
/// reply per command. Lines starting with `{` or `[` are parsed as JSON
/// commands (array = positional arguments, object = `name` plus named
/// arguments); everything else uses the text command syntax.
#[derive(Parser, Debug)]
#[command(name = "playcore")]
#[command(about = "Run player commands read from standard input")]
#[command(version)]
pub struct Args {
    /// Print change notifications for a property (repeatable)
    #[arg(short, long = "observe", value_name = "NAME")]
    pub observe: Vec<String>,

    /// Make a media file known to the player (repeatable)
    #[arg(short, long = "media", value_name = "PATH[=SECONDS]")]
    pub media: Vec<String>,

    /// Threads running long-lived commands such as `subprocess`
    #[arg(long, default_value = "4")]
    pub worker_threads: usize,

    /// Default OSD message duration in milliseconds
    #[arg(long, default_value = "1000")]
    pub osd_duration: i64,

    /// Log level or filter directives (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "off")]
    pub log_level: String,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    pub log_json: bool,

    /// Stop at the first failing command with exit code 1
    #[arg(long)]
    pub exit_on_error: bool,
}

impl Args {
    /// Parse arguments, then apply environment overrides
    fn from_env() -> Result<Self> {
        let mut args = Args::parse();

        if let Ok(threads) = std::env::var("PLAYCORE_WORKER_THREADS") {
            args.worker_threads = threads
                .parse()
                .context("Invalid PLAYCORE_WORKER_THREADS environment variable")?;
        }

        if let Ok(level) = std::env::var("PLAYCORE_CLI_LOG_LEVEL") {
            args.log_level = level;
        }

        Ok(args)
    }

    fn core_config(&self) -> CoreConfig {
        CoreConfig::new()
            .with_worker_threads(self.worker_threads)
            .with_osd_duration(self.osd_duration)
    }
}

fn init_tracing(args: &Args) -> Result<()> {
    let level = args.log_level.to_lowercase();
    if level == "off" {
        return Ok(());
    }

    if args.log_json {
        let filter = tracing_subscriber::EnvFilter::try_new(&level)
            .map_err(|e| anyhow!("Invalid log level '{}': {}", level, e))?;
        return tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize logging: {}", e));
    }

    let mode = match level.as_str() {
        "debug" | "trace" => LoggingMode::Debug,
        _ => LoggingMode::Development,
    };
    init_logging(mode)?;
    // Exact filter on top of the mode default; msg-level may change it later
    apply_msg_level(&level)?;
    Ok(())
}

/// Parse `PATH` or `PATH=SECONDS`
fn parse_media(spec: &str) -> Result<(String, MediaInfo)> {
    match spec.rsplit_once('=') {
        Some((path, seconds)) if !path.is_empty() => {
            let duration: f64 = seconds
                .parse()
                .with_context(|| format!("Invalid duration in media '{}'", spec))?;
            if !duration.is_finite() || duration < 0.0 {
                return Err(anyhow!("Duration must be a non-negative number: '{}'", spec));
            }
            Ok((path.to_string(), MediaInfo::new().with_duration(duration)))
        }
        _ if spec.is_empty() => Err(anyhow!("Media path must not be empty")),
        _ => Ok((spec.to_string(), MediaInfo::new())),
    }
}

/// Run one input line and build its JSON reply
fn run_line(core: &Core, line: &str) -> Value {
    let result = if line.starts_with('{') || line.starts_with('[') {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => core.command_node(&Node::from(value)),
            Err(e) => return json!({ "error": format!("invalid JSON command: {}", e) }),
        }
    } else {
        core.command_blocking(line)
    };

    match result {
        Ok(data) => json!({ "error": "success", "data": data }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

fn change_event(core: &Core, name: &str) -> Value {
    json!({
        "event": "property-change",
        "name": name,
        "data": core.get_property(name).ok(),
    })
}

fn main() -> Result<()> {
    let args = Args::from_env()?;
    init_tracing(&args)?;

    let core = Core::new(args.core_config()).context("Failed to start player core")?;
    for spec in &args.media {
        let (path, media) = parse_media(spec)?;
        debug!("Registered media '{}'", path);
        core.register_media(&path, media);
    }
    for name in &args.observe {
        core.observe(name);
    }
    let changes = core.changes();
    info!("Reading commands from standard input");

    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read standard input")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let reply = run_line(&core, line);
        let failed = reply["error"] != "success";
        writeln!(out, "{}", reply)?;
        for change in changes.try_iter() {
            writeln!(out, "{}", change_event(&core, &change.name))?;
        }
        out.flush()?;

        if let Some(code) = core.quit_requested() {
            info!("Exiting with code {}", code);
            core.shutdown();
            std::process::exit(code);
        }
        if failed && args.exit_on_error {
            core.shutdown();
            std::process::exit(1);
        }
    }

    core.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("song.flac", "song.flac", None)]
    #[case("song.flac=240", "song.flac", Some(240.0))]
    #[case("a=b.mkv=1.5", "a=b.mkv", Some(1.5))]
    fn test_parse_media(#[case] spec: &str, #[case] path: &str, #[case] duration: Option<f64>) {
        let (parsed, media) = parse_media(spec).unwrap();
        assert_eq!(parsed, path);
        assert_eq!(media.duration, duration);
    }

    #[rstest]
    #[case("")]
    #[case("song.flac=long")]
    #[case("song.flac=-3")]
    fn test_parse_media_rejects(#[case] spec: &str) {
        assert!(parse_media(spec).is_err());
    }

    #[test]
    fn test_replies() {
        let core = Core::new(CoreConfig::default()).unwrap();

        let reply = run_line(&core, "expand-text ${mute}");
        assert_eq!(reply, json!({ "error": "success", "data": "no" }));

        let reply = run_line(&core, r#"["set", "mute", "yes"]"#);
        assert_eq!(reply["error"], "success");
        assert_eq!(core.get_property("mute").unwrap(), Node::Flag(true));

        let reply = run_line(&core, "frobnicate");
        assert_eq!(reply["error"], "command 'frobnicate' not found");

        let reply = run_line(&core, "{not json");
        assert!(reply["error"].as_str().unwrap().starts_with("invalid JSON command"));
    }

    #[test]
    fn test_change_event_carries_value() {
        let core = Core::new(CoreConfig::default()).unwrap();
        assert_eq!(
            change_event(&core, "pause"),
            json!({ "event": "property-change", "name": "pause", "data": false })
        );
        assert_eq!(change_event(&core, "path")["data"], Value::Null);
    }
}
