//! keystroke-lab CLI
//!
//! Records keystroke timing while a participant fills in a form, and analyses
//! the resulting exports.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use keystroke_lab::core::{
    analyze, challenge_activity, field_metrics, from_csv, pearson, summarize, typing_metrics,
    MetricRow,
};
use keystroke_lab::persistence::{save_records, JsonlSink, RecordSink};
use keystroke_lab::scheduler::SchedulerEvent;
use keystroke_lab::transparency::{SharedTransparencyLog, TransparencyLog, STATS_FILE};
use keystroke_lab::{
    AnswerOutcome, Config, KeyEventType, ManualClock, RawKeyEvent, SessionEvent, SharedClock,
    SystemClock, TestMode, TestSession, DATA_COLLECTION_NOTICE, VERSION,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keystroke-lab")]
#[command(version = VERSION)]
#[command(about = "Keystroke timing capture for typing-under-stress studies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a session from lines typed on stdin
    Record {
        /// Test mode to run
        #[arg(long, value_enum, default_value = "free")]
        mode: TestMode,

        /// Directory for the JSON and CSV exports
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Also save records to the configured record store
        #[arg(long)]
        save: bool,
    },

    /// Drive a session from a JSON Lines file of timed actions
    Replay {
        file: PathBuf,

        #[arg(long, value_enum, default_value = "free")]
        mode: TestMode,

        /// Seed for challenge timing and selection
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Analyse a tabular (CSV) export
    Analyze { file: PathBuf },

    /// Cohort summary over many tabular exports
    Summary {
        /// Exports named `<mode>_...csv`, as written by `record`
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show cumulative collection statistics
    Status,

    /// Show configuration
    Config,

    /// Display the data collection notice
    Notice,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record { mode, output, save } => cmd_record(mode, output, save),
        Commands::Replay { file, mode, seed } => cmd_replay(&file, mode, seed),
        Commands::Analyze { file } => cmd_analyze(&file),
        Commands::Summary { files } => cmd_summary(&files),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        Commands::Notice => {
            println!("{DATA_COLLECTION_NOTICE}");
            Ok(())
        }
    }
}

/// One line of `record` input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LineCommand {
    Focus(String),
    Blur,
    Answer(String),
    Reset,
    Quit,
    Type(String),
}

fn parse_line(line: &str) -> LineCommand {
    let trimmed = line.trim();
    let (head, rest) = trimmed
        .split_once(char::is_whitespace)
        .map(|(h, r)| (h, r.trim()))
        .unwrap_or((trimmed, ""));
    match head {
        ":focus" if !rest.is_empty() => LineCommand::Focus(rest.to_string()),
        ":blur" => LineCommand::Blur,
        ":answer" => LineCommand::Answer(rest.to_string()),
        ":reset" => LineCommand::Reset,
        ":quit" => LineCommand::Quit,
        _ => LineCommand::Type(line.to_string()),
    }
}

fn cmd_record(mode: TestMode, output: Option<PathBuf>, save: bool) -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        warn!("could not load config, using defaults: {e}");
        Config::default()
    });
    if let Err(e) = config.ensure_directories() {
        warn!("could not create directories: {e}");
    }
    let output = output.unwrap_or_else(|| config.export_path.clone());

    println!("keystroke-lab v{VERSION}");
    println!("{DATA_COLLECTION_NOTICE}");
    println!("Mode: {mode}");
    println!("Commands: :focus NAME, :blur, :answer TEXT, :reset, :quit");
    println!("Any other line is typed into the focused field. Ctrl+C to stop.");
    println!();

    let transparency: SharedTransparencyLog =
        Arc::new(TransparencyLog::with_persistence(config.data_path.join(STATS_FILE)));

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")?;

    let (tx, rx) = crossbeam_channel::unbounded::<String>();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let clock: SharedClock = Arc::new(SystemClock);
    let mut session = TestSession::new(mode, &config, clock);
    transparency.record_session_started();

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => match parse_line(&line) {
                LineCommand::Quit => break,
                command => apply_command(&mut session, command, &transparency),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        for event in session.tick() {
            transparency.observe(&event);
            report(&event);
        }
    }

    println!();
    println!("Stopping session...");
    finish_session(session, &config, &output, save, &transparency)?;

    if let Err(e) = transparency.save() {
        warn!("could not save transparency log: {e}");
    }
    println!();
    println!("{}", transparency.summary());
    Ok(())
}

fn apply_command<R: Rng>(
    session: &mut TestSession<R>,
    command: LineCommand,
    transparency: &TransparencyLog,
) {
    match command {
        LineCommand::Focus(field) => session.focus(&field),
        LineCommand::Blur => session.blur(),
        LineCommand::Answer(text) => {
            let outcome = session.type_answer(&text);
            for _ in text.chars() {
                transparency.record_key_event();
                transparency.record_key_event();
            }
            match outcome {
                AnswerOutcome::Correct { completed } => {
                    transparency.record_challenge_completed();
                    println!("[challenge] correct ({completed} completed)");
                }
                AnswerOutcome::Incorrect => println!("[challenge] incorrect, try again"),
                AnswerOutcome::NoActiveChallenge => println!("[challenge] nothing to answer"),
            }
        }
        LineCommand::Reset => {
            session.reset();
            transparency.record_session_started();
            println!("[session] log cleared, new session {}", session.session_id());
        }
        LineCommand::Type(text) => {
            if !session.input_enabled() {
                println!("[form] input is disabled, keys are still recorded");
            }
            for c in text.chars() {
                session.form_input();
                session.key_event(RawKeyEvent::for_char(c, KeyEventType::KeyDown));
                session.key_event(RawKeyEvent::for_char(c, KeyEventType::KeyUp));
                transparency.record_key_event();
                transparency.record_key_event();
            }
        }
        LineCommand::Quit => {}
    }
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::TimeUp => println!("[timed] time is up"),
        SessionEvent::Scheduler(SchedulerEvent::ChallengeIssued(challenge)) => {
            println!("[challenge] {}", challenge.prompt);
            if let Some(options) = &challenge.options {
                println!("[challenge] options: {}", options.join(", "));
            }
        }
        SessionEvent::Scheduler(SchedulerEvent::ChallengeTimedOut { .. }) => {
            println!("[challenge] time ran out")
        }
        SessionEvent::Scheduler(SchedulerEvent::InputEnabled) => println!("[form] input enabled"),
        SessionEvent::Scheduler(SchedulerEvent::Exhausted) => {
            println!("[challenge] all challenges done")
        }
    }
}

/// Write exports, optionally save records, and end the session.
fn finish_session<R: Rng>(
    session: TestSession<R>,
    config: &Config,
    output: &Path,
    save: bool,
    transparency: &TransparencyLog,
) -> Result<()> {
    std::fs::create_dir_all(output)
        .with_context(|| format!("Could not create export directory {output:?}"))?;

    let stem = format!(
        "{}_{}_{}",
        session.mode(),
        Utc::now().format("%Y%m%d_%H%M%S"),
        session.session_id()
    );
    let json_path = output.join(format!("{stem}.json"));
    std::fs::write(&json_path, session.export_json()?)
        .with_context(|| format!("Error writing {json_path:?}"))?;
    transparency.record_export_written();
    let csv_path = output.join(format!("{stem}.csv"));
    std::fs::write(&csv_path, session.export_csv())
        .with_context(|| format!("Error writing {csv_path:?}"))?;
    transparency.record_export_written();
    println!("Exported {} events to {json_path:?} and {csv_path:?}", session.recorder().count());

    if save {
        let records = session.persistence_records();
        let mut sink = open_sink(config)?;
        match save_records(sink.as_mut(), &records, config.effective_batch_size()) {
            Ok(saved) => {
                transparency.record_records_saved(saved as u64);
                println!("Saved {saved} records");
            }
            // the log is untouched, the exports above still hold everything
            Err(e) => eprintln!("Error saving records: {e}"),
        }
    }

    session.teardown();
    Ok(())
}

fn open_sink(config: &Config) -> Result<Box<dyn RecordSink>> {
    #[cfg(feature = "remote")]
    if let Some(remote) = config.remote.clone() {
        info!(base_url = %remote.base_url, table = %remote.table, "saving to remote store");
        return Ok(Box::new(keystroke_lab::persistence::RestSink::new(remote)?));
    }
    #[cfg(not(feature = "remote"))]
    if config.remote.is_some() {
        warn!("remote store configured but the remote feature is not enabled, saving locally");
    }

    let path = config.data_path.join("records.jsonl");
    info!(path = ?path, "saving to local record file");
    Ok(Box::new(JsonlSink::new(path)))
}

/// One line of a replay file.
#[derive(Debug, Deserialize)]
struct ReplayStep {
    /// Milliseconds since the start of the replay
    at_ms: i64,
    #[serde(flatten)]
    action: ReplayAction,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ReplayAction {
    Focus { field: String },
    Blur,
    Keydown { key: String, code: Option<String> },
    Keyup { key: String, code: Option<String> },
    Answer { text: String },
    Reset,
}

fn raw_event(key: String, code: Option<String>, event_type: KeyEventType) -> RawKeyEvent {
    match code {
        Some(code) => RawKeyEvent::new(key, code, event_type),
        None => match key.chars().next() {
            Some(c) if key.chars().count() == 1 => RawKeyEvent::for_char(c, event_type),
            _ => RawKeyEvent::new(key.clone(), key, event_type),
        },
    }
}

fn cmd_replay(file: &Path, mode: TestMode, seed: Option<u64>) -> Result<()> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("Could not read {file:?}"))?;

    let mut steps = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let step: ReplayStep = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid replay step", file.display(), i + 1))?;
        steps.push(step);
    }
    steps.sort_by_key(|s| s.at_ms);

    let start: DateTime<Utc> = Utc::now();
    let clock = ManualClock::new(start);
    let config = Config::load().unwrap_or_default();
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut session = TestSession::with_parts(
        mode,
        &config,
        keystroke_lab::capture::DeviceInfo::detect(),
        clock.shared(),
        rng,
    );

    for step in steps {
        clock.set(start + ChronoDuration::milliseconds(step.at_ms));
        for event in session.tick() {
            report(&event);
        }
        match step.action {
            ReplayAction::Focus { field } => session.focus(&field),
            ReplayAction::Blur => session.blur(),
            ReplayAction::Keydown { key, code } => {
                session.form_input();
                session.key_event(raw_event(key, code, KeyEventType::KeyDown));
            }
            ReplayAction::Keyup { key, code } => {
                session.key_event(raw_event(key, code, KeyEventType::KeyUp));
            }
            ReplayAction::Answer { text } => {
                let outcome = session.submit_answer(&text);
                println!("[challenge] answer {text:?}: {outcome:?}");
            }
            ReplayAction::Reset => session.reset(),
        }
    }
    for event in session.tick() {
        report(&event);
    }

    let events = session.teardown();
    println!("{}", serde_json::to_string_pretty(&analyze(&events))?);
    println!("{}", serde_json::to_string_pretty(&typing_metrics(&events))?);
    Ok(())
}

fn cmd_analyze(file: &Path) -> Result<()> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("Could not read {file:?}"))?;
    let events = from_csv(&content)?;
    if events.is_empty() {
        bail!("{file:?} has no events");
    }

    println!("Analytics");
    println!("{}", serde_json::to_string_pretty(&analyze(&events))?);
    println!();
    println!("Typing metrics");
    println!("{}", serde_json::to_string_pretty(&typing_metrics(&events))?);
    println!();
    println!("Per field");
    println!("{}", serde_json::to_string_pretty(&field_metrics(&events))?);

    let challenges = challenge_activity(&events);
    if !challenges.is_empty() {
        println!();
        println!("During challenges");
        println!("{}", serde_json::to_string_pretty(&challenges)?);
    }
    Ok(())
}

/// Test type from an export file name such as `timed_20240101_120000_<id>.csv`.
fn test_type_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.split('_').next())
        .and_then(|prefix| prefix.parse::<TestMode>().ok())
        .map(|mode| mode.test_type().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn cmd_summary(files: &[PathBuf]) -> Result<()> {
    let mut rows = Vec::new();
    for file in files {
        let content =
            std::fs::read_to_string(file).with_context(|| format!("Could not read {file:?}"))?;
        let events = from_csv(&content).with_context(|| format!("Could not parse {file:?}"))?;
        rows.push(MetricRow {
            test_type: test_type_of(file),
            metrics: typing_metrics(&events),
        });
    }

    println!("{:<14} {:<18} {:>10} {:>10} {:>10} {:>4}", "test_type", "metric", "p10", "mean", "p90", "n");
    for s in summarize(&rows) {
        println!(
            "{:<14} {:<18} {:>10.2} {:>10.2} {:>10.2} {:>4}",
            s.test_type, s.metric, s.p10, s.mean, s.p90, s.n
        );
    }

    let cpm: Vec<Option<f64>> = rows.iter().map(|r| r.metrics.cpm).collect();
    let corrections: Vec<Option<f64>> = rows.iter().map(|r| Some(r.metrics.backspace_rate)).collect();
    match pearson(&cpm, &corrections) {
        Some(r) => println!("\nr(cpm, backspace_rate) = {r:.3}"),
        None => println!("\nr(cpm, backspace_rate): not enough data"),
    }
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("keystroke-lab Status");
    println!("====================");
    println!();
    println!("Configuration:");
    println!("  Challenge delay: {}-{} ms", config.scheduler.min_delay.as_millis(), config.scheduler.max_delay.as_millis());
    println!("  Challenge time limit: {} ms", config.scheduler.time_limit.as_millis());
    println!("  Max challenges: {}", config.scheduler.max_challenges);
    println!("  Timed mode duration: {} ms", config.timed_duration.as_millis());
    println!("  Remote store: {}", if config.remote.is_some() { "configured" } else { "none" });
    println!();

    let stats_path = config.data_path.join(STATS_FILE);
    if stats_path.exists() {
        println!("{}", TransparencyLog::with_persistence(stats_path).summary());
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
