//! provides logging helpers

use std::collections::BTreeMap;
use std::fmt::{self};
use std::path::Path;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// initiate the global tracing subscriber
pub fn init() {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter);

    registry().with(fmt_layer).init();
}

struct InfluxDBFormatter;

/// Splits an event into line-protocol tags (`tag_`-prefixed field names)
/// and values. Ordered maps, so one measurement serializes its keys in the
/// same order on every sample.
struct FieldVisitor<'a> {
    tags: BTreeMap<&'a str, String>,
    fields: BTreeMap<&'a str, String>,
}

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name().strip_prefix("tag_") {
            Some(tag) => self.tags.insert(tag, value.to_string()),
            None => self.fields.insert(field.name(), value.to_string()),
        };
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name().strip_prefix("tag_") {
            Some(tag) => self.tags.insert(tag, format!("{value:?}")),
            None => self.fields.insert(field.name(), format!("{value:?}")),
        };
    }
}

impl<S, N> FormatEvent<S, N> for InfluxDBFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldVisitor {
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        };
        event.record(&mut visitor);

        // Measurement name is the event target, minus the routing prefix.
        let measurement = event.metadata().target();
        write!(
            writer,
            "{}",
            measurement.strip_prefix("metrics.").unwrap_or(measurement)
        )?;
        for (key, value) in &visitor.tags {
            write!(writer, ",{key}={value}")?;
        }

        write!(writer, " ")?;
        for (i, (key, value)) in visitor.fields.iter().enumerate() {
            let sep = if i == 0 { "" } else { "," };
            write!(writer, "{sep}{key}={value}")?;
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        writeln!(writer, " {timestamp}")?;

        Ok(())
    }
}

/// initiate the global tracing subscriber with a rolling metrics file;
/// `metrics.*` events go to the file in InfluxDB line format and are kept
/// out of stderr
pub fn init_with_metrics_file<P: AsRef<Path>>(
    metrics_file: P,
) -> tracing_appender::non_blocking::WorkerGuard {
    let metrics_file = metrics_file.as_ref();
    let path = metrics_file.parent().expect("path");
    let file = metrics_file.file_name().expect("log file");
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter.and(filter::filter_fn(|metadata| {
            !metadata.target().contains("metrics")
        })));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file.to_str().expect("metrics file name"))
        .max_log_files(3)
        .build(path)
        .expect("failed to create rolling file appender");

    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let metrics_layer = layer()
        .event_format(InfluxDBFormatter {})
        .fmt_fields(tracing_subscriber::fmt::format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| {
            metadata.target().contains("metrics")
        }));

    registry().with(fmt_layer).with(metrics_layer).init();
    file_guard
}
