//! Tracing subscriber setup: console formatter, run log file layer, and
//! initialisation.
use std::fs;
use std::io::Write as _;
use std::sync::Mutex;

use tracing::field::{Field, Visit};

use super::utils::{log_file_path, strip_ansi, utc_now};

/// Tracing target for stage headers.
pub(super) const STAGE_TARGET: &str = "converge::stage";
/// Tracing target for dry-run notices.
pub(super) const DRY_RUN_TARGET: &str = "converge::dry_run";
/// Tracing target for per-resource outcome records.
pub(super) const RESOURCE_TARGET: &str = "converge::resource";

/// Fields of interest on one event.
///
/// Resource records carry `resource`, `outcome` and optionally `detail`
/// alongside the message.
#[derive(Default)]
struct EventFields {
    message: String,
    resource: Option<String>,
    outcome: Option<String>,
    detail: Option<String>,
}

impl EventFields {
    fn of(event: &tracing::Event<'_>) -> Self {
        let mut fields = Self::default();
        event.record(&mut fields);
        fields
    }

    fn set(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "resource" => self.resource = Some(value),
            "outcome" => self.outcome = Some(value),
            "detail" => self.detail = Some(value),
            _ => {}
        }
    }

    /// `outcome Kind[name] (detail)` for resource records, else the message.
    fn resource_line(&self) -> Option<String> {
        let resource = self.resource.as_deref()?;
        let outcome = self.outcome.as_deref().unwrap_or("?");
        Some(self.detail.as_deref().map_or_else(
            || format!("{outcome:<12} {resource}"),
            |d| format!("{outcome:<12} {resource} ({d})"),
        ))
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.set(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, value.to_string());
    }
}

/// A [`tracing_subscriber::Layer`] appending every event to the run log.
///
/// Lines are timestamped and stripped of ANSI codes; resource outcome
/// records become one aligned line each so the log doubles as an audit
/// trail of what a run changed.
#[derive(Debug)]
pub(super) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Truncate the run log for `command`, write a header, and keep the file
    /// open for appending.
    ///
    /// Returns `None` if the log directory or file is unavailable.
    pub(super) fn new(command: &str) -> Option<Self> {
        let path = log_file_path(command)?;
        let version =
            option_env!("CONVERGE_VERSION").unwrap_or(concat!("dev-", env!("CARGO_PKG_VERSION")));
        let host = crate::platform::local_hostname();
        let header = format!(
            "# converge {version} {command} on {host} at {}\n",
            utc_now("%Y-%m-%dT%H:%M:%SZ"),
        );
        fs::write(&path, header).ok()?;
        let file = fs::OpenOptions::new().append(true).open(&path).ok()?;
        Some(Self {
            file: Mutex::new(file),
        })
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FileLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let fields = EventFields::of(event);
        let ts = utc_now("%H:%M:%S");

        let line = if metadata.target() == RESOURCE_TARGET {
            fields
                .resource_line()
                .map_or_else(|| format!("[{ts}] {}", fields.message), |r| format!("[{ts}] {r}"))
        } else {
            let msg = strip_ansi(&fields.message);
            match (*metadata.level(), metadata.target()) {
                (tracing::Level::INFO, STAGE_TARGET) => format!("[{ts}] ==> {msg}"),
                (tracing::Level::INFO, DRY_RUN_TARGET) => format!("[{ts}]     [dry run] {msg}"),
                (tracing::Level::ERROR, _) => format!("[{ts}]     [error] {msg}"),
                (tracing::Level::WARN, _) => format!("[{ts}]     [warn] {msg}"),
                (tracing::Level::DEBUG | tracing::Level::TRACE, _) => {
                    format!("[{ts}]     [debug] {msg}")
                }
                _ => format!("[{ts}]     {msg}"),
            }
        };

        if let Ok(mut f) = self.file.lock() {
            writeln!(f, "{line}").ok();
        }
    }
}

/// Console style: bold stage arrows, indented info lines, coloured warnings
/// and errors.  Resource records are already reported by the engine, so
/// they only reach the run log.
struct ConsoleFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let msg = EventFields::of(event).message;

        match (*metadata.level(), metadata.target()) {
            (tracing::Level::ERROR, _) => writeln!(writer, "\x1b[31mERROR\x1b[0m {msg}"),
            (tracing::Level::WARN, _) => writeln!(writer, "\x1b[33mWARN\x1b[0m  {msg}"),
            (tracing::Level::INFO, STAGE_TARGET) => {
                writeln!(writer, "\x1b[1;34m==>\x1b[0m \x1b[1m{msg}\x1b[0m")
            }
            (tracing::Level::INFO, DRY_RUN_TARGET) => {
                writeln!(writer, "  \x1b[33m[DRY RUN]\x1b[0m {msg}")
            }
            (tracing::Level::INFO, _) => writeln!(writer, "  {msg}"),
            _ => writeln!(writer, "  \x1b[2m{msg}\x1b[0m"),
        }
    }
}

/// Initialise the global [`tracing`] subscriber.
///
/// Console output goes to stderr so that `--format json` keeps stdout clean
/// for the machine-readable report; `CONVERGE_LOG` overrides the console
/// filter.  The run log receives every event at `debug` and above.
/// Call once at startup, before any logging.
pub fn init_subscriber(verbose: bool, command: &str) {
    use tracing_subscriber::{
        EnvFilter, Layer as _, filter::LevelFilter, filter::filter_fn, fmt,
        layer::SubscriberExt as _, util::SubscriberInitExt as _,
    };

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let console_filter = EnvFilter::builder()
        .with_default_directive(console_level.into())
        .with_env_var("CONVERGE_LOG")
        .from_env_lossy();

    let console_layer = fmt::layer()
        .event_format(ConsoleFormatter)
        .with_writer(std::io::stderr)
        .with_filter(filter_fn(|m| m.target() != RESOURCE_TARGET))
        .with_filter(console_filter);

    let file_layer = FileLayer::new(command).map(|l| l.with_filter(LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();
}
