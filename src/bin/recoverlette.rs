//! CLI binary for recoverlette.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AppSettings` + `RenderConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use recoverlette::{
    connect, render_remote, scan_template, AppSettings, Bindings, CleanupOutcome,
    FormattingPolicy, OutputFormat, RecoverletteError, RemoteDrive, RenderConfig,
    RenderProgressCallback, Resolution, Stage, UndefinedGate, Warning,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

/// Terminal progress callback: a spinner naming the current orchestrator
/// stage, plus one log line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
    stage_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new(bar: ProgressBar) -> Arc<Self> {
        Arc::new(Self {
            bar,
            stage_started: Mutex::new(None),
        })
    }

    fn stage_elapsed(&self) -> String {
        let elapsed = self
            .stage_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        dim(&format!("{:.1}s", elapsed.as_secs_f64()))
    }
}

impl RenderProgressCallback for CliProgressCallback {
    fn on_template_filled(&self, replaced: usize, unresolved: usize) {
        let detail = if unresolved == 0 {
            format!("{replaced} placeholder(s) filled")
        } else {
            format!("{replaced} placeholder(s) filled, {unresolved} left unchanged")
        };
        self.bar
            .println(format!("  {} {:<12} {}", green("✓"), "template", dim(&detail)));
    }

    fn on_stage_start(&self, stage: Stage) {
        *self
            .stage_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.bar.set_prefix(capitalise(&stage.to_string()));
        self.bar.set_message("…");
    }

    fn on_stage_complete(&self, stage: Stage) {
        self.bar.println(format!(
            "  {} {:<12} {}",
            green("✓"),
            stage.to_string(),
            self.stage_elapsed()
        ));
    }

    fn on_stage_failed(&self, stage: Stage, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg = match error.char_indices().nth(80) {
            Some((i, _)) => format!("{}\u{2026}", &error[..i]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} {:<12} {}  {}",
            red("✗"),
            stage.to_string(),
            red(&msg),
            self.stage_elapsed()
        ));
        self.bar.finish_and_clear();
    }

    fn on_warning(&self, warning: &Warning) {
        self.bar.println(format!("  {} {}", yellow("⚠"), warning));
    }

    fn on_render_complete(&self, _output_bytes: usize) {
        self.bar.finish_and_clear();
    }
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS);
    bar.set_style(style);
    bar.set_prefix("Signing in");
    bar.set_message("…");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Fill a template and save the PDF
  recoverlette -i Documents/CoverLetterTemplate.docx -o Acme.pdf \
      -D COMPANY=Acme -D "TITLE=Senior Engineer"

  # See which placeholders a template has, and which are still unbound
  recoverlette -i Documents/CoverLetterTemplate.docx --scan-only -D COMPANY=Acme

  # Refuse to render while a required placeholder has no value
  recoverlette -i Documents/Letter.docx -o out.pdf --strict

  # Force replaced text to plain black, and keep the filled .docx
  recoverlette -i Documents/Letter.docx -o out.pdf --normalize-style --save-docx filled.docx

PLACEHOLDERS:
  {{KEY}}         replaced by the value of -D KEY=VALUE; left as-is (with a
                  warning) when KEY has no value
  {{ADDL_KEY}}    optional: removed entirely when KEY has no value
                  (prefix configurable with --prefix)

ENVIRONMENT VARIABLES:
  RECOVERLETTE_CLIENT_ID      Application (client) id registered with Microsoft identity
  RECOVERLETTE_TENANT_ID      Tenant (default: consumers)
  RECOVERLETTE_AUTH_FLOW      browser (default), device-code, or token
  RECOVERLETTE_ACCESS_TOKEN   Pre-issued bearer token (skips sign-in)
  RECOVERLETTE_GRAPH_URL      Graph base URL (default: https://graph.microsoft.com/v1.0)
  RECOVERLETTE_NO_CACHE       Do not persist tokens between runs
  RUST_LOG                    Override log filter (e.g. recoverlette=debug)

FAILURES:
  When a step fails after the temporary copy was uploaded, the copy is left
  next to the template on OneDrive and its name is printed, so the failed
  conversion can be inspected. Ctrl-C follows the same rule.
"#;

/// Fill a OneDrive Word template and render it locally as PDF.
#[derive(Parser, Debug)]
#[command(
    name = "recoverlette",
    version,
    about = "Fill {{PLACEHOLDER}} tokens in a OneDrive Word template and save it as PDF",
    long_about = "Download a Word template from OneDrive, replace {{KEY}} placeholders with the \
values given on the command line while keeping their formatting, and let OneDrive render the \
result to PDF (or HTML, JPG, GLB). The template itself is never modified.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Template path on OneDrive, relative to the drive root.
    #[arg(short, long, env = "RECOVERLETTE_INPUT")]
    input: String,

    /// Local path for the rendered output.
    #[arg(short, long, env = "RECOVERLETTE_OUTPUT", required_unless_present = "scan_only")]
    output: Option<PathBuf>,

    /// Placeholder value; repeatable.
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    defines: Vec<String>,

    /// Output format: pdf, html, jpg, glb.
    #[arg(long, env = "RECOVERLETTE_FORMAT", default_value = "pdf")]
    format: OutputFormat,

    /// Reset replaced text to the paragraph style in black instead of
    /// inheriting the placeholder's formatting.
    #[arg(long, env = "RECOVERLETTE_NORMALIZE_STYLE")]
    normalize_style: bool,

    /// Prefix of optional placeholders (removed when unbound). Empty disables.
    #[arg(long, env = "RECOVERLETTE_PREFIX", default_value = "ADDL_")]
    prefix: String,

    /// Fail before uploading if a required placeholder has no value.
    #[arg(long, conflicts_with = "confirm")]
    strict: bool,

    /// Ask before uploading if a required placeholder has no value.
    #[arg(long)]
    confirm: bool,

    /// Also save the filled .docx locally.
    #[arg(long, value_name = "PATH")]
    save_docx: Option<PathBuf>,

    /// List placeholders and their status; no upload, no conversion.
    #[arg(long)]
    scan_only: bool,

    /// Seconds to wait between upload and conversion.
    #[arg(long, env = "RECOVERLETTE_SETTLE_DELAY", default_value_t = 5)]
    settle_delay: u64,

    /// Smallest output accepted as a real document, in bytes.
    #[arg(long, env = "RECOVERLETTE_MIN_BYTES", default_value_t = 1000)]
    min_bytes: usize,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "RECOVERLETTE_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Settings file (TOML). Default: ./recoverlette.toml, then the user
    /// config directory.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Disable the progress spinner.
    #[arg(long, env = "RECOVERLETTE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RECOVERLETTE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "RECOVERLETTE_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback that matters; INFO logs would
    // interleave with it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.scan_only;
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

    // ── Cancellation ─────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} Interrupted, stopping…", yellow("⚠"));
                cancel.cancel();
            }
        });
    }

    // ── Settings and config ──────────────────────────────────────────────
    let settings = AppSettings::load(cli.config.as_deref()).context("Failed to load settings")?;
    let bindings = Bindings::from_defines(&cli.defines).context("Invalid -D value")?;
    let bar = show_progress.then(spinner);
    let config = build_config(&cli, bar.clone())?;

    // ── Sign in ──────────────────────────────────────────────────────────
    let signed_in = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RecoverletteError::Cancelled {
            stage: Stage::Idle,
            leftover: None,
        }),
        result = connect(&settings, &config) => result,
    };
    let (drive, account) = match signed_in {
        Ok(connected) => connected,
        Err(e) => {
            if let Some(bar) = &bar {
                bar.finish_and_clear();
            }
            return Err(e).context("Sign-in failed");
        }
    };
    if !cli.quiet {
        let who = account.as_deref().unwrap_or("OneDrive");
        let line = format!("{} Signed in as {}", cyan("◆"), bold(who));
        match &bar {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }

    if let Some(bar) = &bar {
        bar.set_prefix("Filling");
    }

    // ── Scan-only mode ───────────────────────────────────────────────────
    if cli.scan_only {
        return tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(anyhow::anyhow!("Cancelled")),
            result = scan_only(&drive, &cli, &bindings, &config) => result,
        };
    }

    // ── Render ───────────────────────────────────────────────────────────
    let Some(output_path) = cli.output.clone() else {
        anyhow::bail!("--output is required");
    };
    if !cli.quiet && !extension_matches(&output_path, cli.format) {
        let line = format!(
            "{} Output '{}' does not end in .{}; it will still contain {}",
            yellow("⚠"),
            output_path.display(),
            cli.format.token(),
            cli.format.token().to_uppercase()
        );
        match &bar {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }
    let result = render_remote(&drive, &cli.input, &bindings, &output_path, &config, cancel).await;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }
    let report = match result {
        Ok(report) => report,
        Err(e) => return Err(describe_failure(e)),
    };

    if !show_progress {
        for w in &report.warnings {
            eprintln!("{} {}", yellow("⚠"), w);
        }
    }
    if !cli.quiet {
        eprintln!(
            "{}  {} bytes  {}ms  →  {}",
            if report.warnings.is_empty() {
                green("✔")
            } else {
                yellow("⚠")
            },
            report.stats.output_bytes,
            report.stats.total_duration_ms,
            bold(&report.output_path.display().to_string()),
        );
        eprintln!(
            "   {} replaced  /  {} removed  /  {} unresolved",
            dim(&report.stats.tokens_replaced.to_string()),
            dim(&report.stats.tokens_deleted.to_string()),
            dim(&report.stats.tokens_unresolved.to_string()),
        );
        if let CleanupOutcome::Failed { .. } = report.cleanup {
            eprintln!(
                "   temporary copy {} is still on OneDrive",
                bold(&report.artifact.to_string())
            );
        }
    }

    Ok(())
}

/// Map CLI args to `RenderConfig`.
fn build_config(cli: &Cli, bar: Option<ProgressBar>) -> Result<RenderConfig> {
    let mut builder = RenderConfig::builder()
        .output_format(cli.format)
        .min_output_bytes(cli.min_bytes)
        .settle_delay_ms(cli.settle_delay.saturating_mul(1000))
        .request_timeout_secs(cli.timeout);

    builder = if cli.prefix.is_empty() {
        builder.no_ignorable_prefix()
    } else {
        builder.ignorable_prefix(cli.prefix.clone())
    };
    if cli.normalize_style {
        builder = builder.formatting(FormattingPolicy::normalized());
    }
    if let Some(path) = &cli.save_docx {
        builder = builder.save_filled_docx(path.clone());
    }

    if cli.strict {
        builder = builder.undefined_gate(UndefinedGate::Deny);
    } else if cli.confirm {
        let prompt_bar = bar.clone();
        builder = builder.undefined_gate(UndefinedGate::Confirm(Arc::new(move |keys: &[String]| {
            let ask = || tokio::task::block_in_place(|| confirm_prompt(keys));
            match &prompt_bar {
                Some(bar) => bar.suspend(ask),
                None => ask(),
            }
        })));
    }

    if let Some(bar) = bar {
        builder = builder.progress_callback(CliProgressCallback::new(bar));
    }

    builder.build().context("Invalid configuration")
}

/// Ask on stderr/stdin whether to continue with unbound placeholders.
fn confirm_prompt(keys: &[String]) -> bool {
    eprintln!(
        "{} {} required placeholder(s) have no value: {}",
        yellow("⚠"),
        keys.len(),
        bold(&keys.join(", "))
    );
    eprint!("Continue and leave them unchanged? [y/N] ");
    let _ = io::stderr().flush();

    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Download the template and print every placeholder with its status.
async fn scan_only(
    drive: &dyn RemoteDrive,
    cli: &Cli,
    bindings: &Bindings,
    config: &RenderConfig,
) -> Result<()> {
    let item = drive
        .locate(&cli.input)
        .await
        .with_context(|| format!("Template not found: '{}'", cli.input))?;
    let bytes = drive
        .download(&item)
        .await
        .with_context(|| format!("Failed to download '{}'", cli.input))?;
    let (tokens, diagnostics) = scan_template(&bytes, bindings, config)?;

    println!("Template:     {}", cli.input);
    println!("Placeholders: {}", tokens.len());
    for (key, count) in &diagnostics.occurrences {
        let Some(resolved) = tokens.iter().find(|t| &t.token.key == key) else {
            continue;
        };
        let status = match &resolved.resolution {
            Resolution::Defined(value) => green(&format!("= {value}")),
            Resolution::OptionalUndefined => dim("optional, will be removed"),
            Resolution::RequiredUndefined => yellow("no value, will stay as-is"),
        };
        println!(
            "  {:<24} {:>3}×  {}",
            config.delimiters.wrap(key),
            count,
            status
        );
    }
    if diagnostics.has_required_undefined() && !cli.quiet {
        eprintln!(
            "{} {} required placeholder(s) unbound",
            yellow("⚠"),
            diagnostics.required_undefined.len()
        );
    }
    Ok(())
}

/// Name the failing stage; the error message already names any leftover.
fn describe_failure(e: RecoverletteError) -> anyhow::Error {
    let context = match e.stage() {
        Some(stage) => format!("Render failed during {stage}"),
        None => "Render failed before upload".to_string(),
    };
    anyhow::Error::new(e).context(context)
}

/// Whether `path` carries the extension `format` produces; `.jpeg` is
/// accepted for JPG.
fn extension_matches(path: &Path, format: OutputFormat) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    ext == format.token() || (format == OutputFormat::Jpg && ext == "jpeg")
}
