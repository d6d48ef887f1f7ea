//! CLI binary for score2musicxml.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ClientConfig`, drives one session and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use score2musicxml::{
    ClientConfig, FailureKind, JobProgressCallback, Phase, SelectedFile, SessionController,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while uploading, then a percentage
/// bar fed by the service's status messages.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading file…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    /// Switch to the percentage bar once the job is accepted.
    fn activate_bar(&self) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}%  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.set_position(0);
        self.bar.set_message("waiting for the first status…");
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_phase_change(&self, _from: Phase, to: Phase) {
        match to {
            Phase::Submitting => {
                self.bar.set_prefix("Uploading");
                self.bar.set_message("sending file…");
            }
            Phase::Ready => self.bar.finish_and_clear(),
            // `on_failed` prints the reason and then abandons the bar.
            _ => {}
        }
    }

    fn on_submitted(&self, job_id: &str) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Job {job_id} accepted"))
        ));
        self.activate_bar();
    }

    fn on_status(&self, _job_id: &str, message: &str, percent: u8) {
        self.bar.set_position(percent as u64);
        self.bar.set_message(message.to_string());
    }

    fn on_failed(&self, kind: FailureKind, detail: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg = if detail.chars().count() > 80 {
            format!("{}\u{2026}", detail.chars().take(79).collect::<String>())
        } else {
            detail.to_string()
        };
        self.bar.println(format!("  {} {}: {}", red("✗"), kind, red(&msg)));
        self.bar.abandon();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a scanned score; writes ./song.musicxml
  score2xml song.png

  # Write into a directory
  score2xml song.png -o scores/

  # Point at a backend (or set SCORE2XML_API_URL)
  score2xml --api-url https://1234.ngrok-free.app song.png

  # Give up after 10 minutes of polling at the default 5 s interval
  score2xml --max-polls 120 song.png

  # Final session record as JSON
  score2xml --json song.png

SUPPORTED INPUT:
  PNG, JPG, JFIF (JPEG), GIF, PDF. Other files are uploaded as-is unless
  --strict-formats is given.

ENVIRONMENT VARIABLES:
  SCORE2XML_API_URL   Recognition service base URL
  RUST_LOG            Override log filter (e.g. score2musicxml=debug)
"#;

/// Convert sheet-music images to MusicXML with a remote recognition service.
#[derive(Parser, Debug)]
#[command(
    name = "score2xml",
    version,
    about = "Convert sheet-music images to MusicXML with a remote recognition service",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image (or PDF) of the score to convert.
    input: PathBuf,

    /// Directory to save the MusicXML file in.
    #[arg(short, long, env = "SCORE2XML_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// Base URL of the recognition service.
    #[arg(long, env = "SCORE2XML_API_URL")]
    api_url: Option<String>,

    /// Seconds between status checks.
    #[arg(long, env = "SCORE2XML_POLL_INTERVAL", default_value_t = 5.0)]
    poll_interval: f64,

    /// Fail after this many status checks (default: poll until done).
    #[arg(long, env = "SCORE2XML_MAX_POLLS")]
    max_polls: Option<u32>,

    /// Per-request timeout in seconds (default: none).
    #[arg(long, env = "SCORE2XML_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Extension of the saved file.
    #[arg(long, env = "SCORE2XML_EXTENSION", default_value = "musicxml")]
    extension: String,

    /// Refuse files that are not PNG, JPEG, GIF or PDF.
    #[arg(long, env = "SCORE2XML_STRICT_FORMATS")]
    strict_formats: bool,

    /// Do not send the ngrok-skip-browser-warning header.
    #[arg(long)]
    no_tunnel_header: bool,

    /// Print the final session record as JSON on stdout.
    #[arg(long, env = "SCORE2XML_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SCORE2XML_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCORE2XML_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCORE2XML_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    let start = Instant::now();

    // ── Run the session ──────────────────────────────────────────────────
    let mut controller = SessionController::connect(config).context("Invalid configuration")?;
    if show_progress {
        controller = controller.with_progress(CliProgressCallback::new());
    }

    let file = SelectedFile::from_path(&cli.input)
        .await
        .context("Failed to read input")?;
    controller
        .select_file(file)
        .context("Input rejected")?;

    // A failed upload is already recorded in the session; report it below.
    let _ = controller.submit().await;
    let session = controller
        .wait_until_settled()
        .await
        .context("Session ended unexpectedly")?;

    let saved = if session.phase == Phase::Ready {
        Some(
            controller
                .download(&cli.output)
                .await
                .context("Download failed")?,
        )
    } else {
        None
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&controller.snapshot())
            .context("Failed to serialise session")?;
        println!("{json}");
    }

    match saved {
        Some(path) => {
            if !cli.json {
                println!("{}", path.display());
            }
            if !cli.quiet {
                eprintln!(
                    "{}  {}  {}",
                    green("✔"),
                    bold(&path.display().to_string()),
                    dim(&format!("{:.1}s", start.elapsed().as_secs_f64())),
                );
            }
            Ok(())
        }
        None => {
            let detail = session
                .failure
                .as_ref()
                .map(|f| format!("{}: {}", f.kind, f.detail))
                .unwrap_or_else(|| format!("session ended {}", session.phase));
            if !session.status_message.is_empty() && !cli.quiet {
                eprintln!("   last status: {}", dim(&session.status_message));
            }
            anyhow::bail!("Conversion failed ({detail})")
        }
    }
}

/// Map CLI args to `ClientConfig`.
fn build_config(cli: &Cli) -> Result<ClientConfig> {
    let poll_interval = match Duration::try_from_secs_f64(cli.poll_interval) {
        Ok(d) if !d.is_zero() => d,
        _ => anyhow::bail!(
            "--poll-interval must be a positive number of seconds (got {})",
            cli.poll_interval
        ),
    };

    let mut builder = ClientConfig::builder()
        .poll_interval(poll_interval)
        .target_extension(&cli.extension)
        .validate_format(cli.strict_formats)
        .tunnel_bypass_header(!cli.no_tunnel_header);

    if let Some(ref url) = cli.api_url {
        builder = builder.base_url(url);
    }
    if let Some(n) = cli.max_polls {
        builder = builder.max_poll_attempts(n);
    }
    if let Some(secs) = cli.request_timeout {
        builder = builder.request_timeout(Duration::from_secs(secs));
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["score2xml", "--api-url", "http://localhost:8000"];
        argv.extend_from_slice(args);
        argv.push("song.png");
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn poll_interval_maps_to_duration() {
        let config = build_config(&parse(&["--poll-interval", "2.5"])).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(2500));
    }

    #[test]
    fn out_of_range_poll_interval_is_an_error() {
        for value in ["1e30", "0", "NaN", "inf"] {
            let cli = parse(&["--poll-interval", value]);
            let err = build_config(&cli).unwrap_err();
            assert!(
                err.to_string().contains("--poll-interval"),
                "{value}: {err}"
            );
        }
    }
}
