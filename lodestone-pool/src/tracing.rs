//! Logging setup for the pool services and tools.
//!
//! Binaries call [`init_journald_or_stdout`] once at startup. Library code
//! pulls the event macros in with `use crate::tracing::prelude::*`.

use std::env;

use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Crate prefixes dropped from event targets on stdout.
const LOCAL_PREFIXES: &[&str] = &["lodestone_pool::", "lodestone_keygen::"];

/// Install journald when started by systemd, stdout otherwise.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_err() {
        use_stdout();
        return;
    }

    match tracing_journald::layer() {
        Ok(layer) => tracing_subscriber::registry().with(layer).init(),
        Err(e) => {
            use_stdout();
            warn!(error = %e, "journald unavailable, logging to stdout");
        }
    }
}

// RUST_LOG filters; INFO when unset.
fn use_stdout() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().event_format(PoolFormatter))
        .init();
}

/// One line per event, structured fields indented on the next line.
struct PoolFormatter;

#[derive(Default)]
struct Fields {
    message: Option<String>,
    pairs: Vec<(&'static str, String)>,
}

impl tracing::field::Visit for Fields {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.pairs.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let text = unwrap_some(&format!("{:?}", value));
        if field.name() == "message" {
            self.message = Some(text);
        } else {
            self.pairs.push((field.name(), text));
        }
    }
}

/// `Some(x)` prints as `x`; everything else is left alone.
fn unwrap_some(text: &str) -> String {
    text.strip_prefix("Some(")
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(text)
        .trim_matches('"')
        .to_string()
}

/// Event target with our own crate prefix removed. Events bridged from the
/// `log` crate carry their real target in a `log.target` field.
fn display_target(target: &str, pairs: &[(&'static str, String)]) -> String {
    if let Some(rest) = LOCAL_PREFIXES.iter().find_map(|p| target.strip_prefix(p)) {
        return rest.to_string();
    }
    if target == "log" {
        if let Some((_, real)) = pairs.iter().find(|(k, _)| *k == "log.target") {
            return real.clone();
        }
    }
    target.to_string()
}

fn level_style(level: tracing::Level) -> (&'static str, &'static str) {
    match level {
        tracing::Level::ERROR => ("\x1b[31m", "ERROR"),
        tracing::Level::WARN => ("\x1b[33m", "WARN "),
        tracing::Level::INFO => ("\x1b[32m", "INFO "),
        tracing::Level::DEBUG => ("\x1b[34m", "DEBUG"),
        tracing::Level::TRACE => ("\x1b[35m", "TRACE"),
    }
}

impl<S, N> FormatEvent<S, N> for PoolFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let mut fields = Fields::default();
        event.record(&mut fields);

        LocalTimer.format_time(&mut writer)?;
        let (color, label) = level_style(*event.metadata().level());
        write!(writer, " {}{}\x1b[0m ", color, label)?;
        write!(writer, "{}: ", display_target(event.metadata().target(), &fields.pairs))?;
        if let Some(message) = &fields.message {
            write!(writer, "{}", message)?;
        }

        let extra: Vec<_> = fields
            .pairs
            .iter()
            .filter(|(k, _)| !k.starts_with("log."))
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        if !extra.is_empty() {
            // Aligned under the target column (time + level).
            write!(writer, "\n\x1b[90m               {}\x1b[0m", extra.join(", "))?;
        }
        writeln!(writer)
    }
}

/// Local wall-clock time to the second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let text = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", text)
    }
}
