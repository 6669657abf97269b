use chrono::Local;
use nu_ansi_term::{Color, Style};
use std::fmt;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
    EnvFilter, Layer,
};

/// Target for per-account progress lines shown on the console.
pub const ACCOUNT_TARGET: &str = "account_status";

pub fn setup_logger() -> Option<WorkerGuard> {
    // Create logs directory
    std::fs::create_dir_all("logs").ok();

    let file_appender = tracing_appender::rolling::hourly("logs", "klok");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer: INFO for account progress, WARN for others
    let file_filter = EnvFilter::new(format!("{}=info,warn", ACCOUNT_TARGET));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    // Console layer: INFO for account progress, ERROR for others, RUST_LOG wins
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info,error", ACCOUNT_TARGET)));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .event_format(TerminalFormatter)
        .with_filter(console_filter);

    // try_init: a second call (tests, embedded use) keeps the first subscriber
    if tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .is_err()
    {
        return None;
    }

    // Return guard - MUST be kept alive by caller
    Some(guard)
}

// --- Formatters ---

struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

fn event_message(event: &Event<'_>) -> String {
    let mut msg_visitor = MessageVisitor {
        message: String::new(),
    };
    event.record(&mut msg_visitor);
    msg_visitor.message
}

/// Paints the account state words so terminal outcomes stand out.
pub fn colorize_states(msg: &str) -> String {
    let green = Style::new().fg(Color::LightGreen).bold();
    let red = Style::new().fg(Color::LightRed).bold();
    let yellow = Style::new().fg(Color::LightYellow).bold();

    if msg.contains("Completed") || msg.contains("SUCCESS") {
        msg.replace("Completed", &green.paint("Completed").to_string())
            .replace("SUCCESS", &green.paint("SUCCESS").to_string())
    } else if msg.contains("Failed") || msg.contains("FAILED") {
        msg.replace("Failed", &red.paint("Failed").to_string())
            .replace("FAILED", &red.paint("FAILED").to_string())
    } else if msg.contains("Daily Limit Reached") {
        msg.replace(
            "Daily Limit Reached",
            &yellow.paint("Daily Limit Reached").to_string(),
        )
    } else {
        msg.to_string()
    }
}

pub struct TerminalFormatter;

impl<S, N> FormatEvent<S, N> for TerminalFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        if let Some(account) = account_prefix(ctx) {
            write!(writer, "[WK:{}] ", account)?;
        }
        write!(writer, "{}", colorize_states(&event_message(event)))?;
        writeln!(writer)
    }
}

pub struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let level = event.metadata().level();

        write!(writer, "{} [{}] ", timestamp, level)?;
        if let Some(account) = account_prefix(ctx) {
            write!(writer, "[WK:{}] ", account)?;
        }
        writeln!(writer, "{}", event_message(event))
    }
}

/// Zero-padded index of the enclosing `account` span, if any.
fn account_prefix<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<String>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let scope = ctx.event_scope()?;
    for span in scope.from_root() {
        if span.name() == "account" {
            let extensions = span.extensions();
            let fields = extensions.get::<tracing_subscriber::fmt::FormattedFields<N>>()?;
            // rendered as `account="001"` by the default field formatter
            let rendered = fields.fields.as_str();
            let value = rendered
                .split_once('=')
                .map(|(_, v)| v.trim_matches('"').to_string())?;
            return Some(value);
        }
    }
    None
}
