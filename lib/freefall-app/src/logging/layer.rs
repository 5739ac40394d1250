use std::fmt;

use chrono::Utc;
use tracing::{field, Event, Subscriber};
use tracing_subscriber::{
    field::VisitOutput,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, Layer, MakeWriter},
    layer,
    registry::LookupSpan,
    Layer as _,
};

use super::LoggingConfiguration;

const APP_NAME: &str = "FREEFALL";

pub(super) fn build_formatting_layer<S, W>(
    config: &LoggingConfiguration, writer: W, with_ansi: bool,
) -> Box<dyn layer::Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    if config.log_format_json {
        Layer::new()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true)
            .with_writer(writer)
            .boxed()
    } else {
        Layer::new()
            .event_format(PipeDelimitedFormatter)
            .with_ansi(with_ansi)
            .with_writer(writer)
            .boxed()
    }
}

/// Formats events as `<time> | FREEFALL | <LEVEL> | (file:line) | k:v,... | message`.
struct PipeDelimitedFormatter;

impl<S, N> FormatEvent<S, N> for PipeDelimitedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();

        write!(
            writer,
            "{} | {} | {} | ",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            APP_NAME,
            metadata.level()
        )?;

        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            write!(writer, "({}:{})", file, line)?;
        } else {
            write!(writer, "(unknown:0)")?;
        }

        // The innermost process span tells us which process logged the event.
        let process_name = ctx.event_scope().and_then(|mut scope| {
            let span = scope.find(|span| span.name() == "process")?;
            let extensions = span.extensions();
            extensions.get::<ProcessName>().map(|name| name.0.clone())
        });

        let mut v = FieldVisitor::new(writer.by_ref(), process_name);
        event.record(&mut v);
        v.finish()?;

        writeln!(writer)
    }
}

/// Name of the process a span belongs to, stashed in the span's extensions by [`ProcessNameLayer`].
struct ProcessName(String);

/// Records the `process_name` field of process spans so the text formatter can prefix events with it.
pub(super) struct ProcessNameLayer;

impl<S> layer::Layer<S> for ProcessNameLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &tracing::span::Id, ctx: layer::Context<'_, S>) {
        if attrs.metadata().name() != "process" {
            return;
        }

        let mut visitor = ProcessNameVisitor(None);
        attrs.record(&mut visitor);

        if let (Some(name), Some(span)) = (visitor.0, ctx.span(id)) {
            span.extensions_mut().insert(ProcessName(name));
        }
    }
}

struct ProcessNameVisitor(Option<String>);

impl field::Visit for ProcessNameVisitor {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if field.name() == "process_name" {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if field.name() == "process_name" {
            self.0 = Some(format!("{:?}", value));
        }
    }
}

/// Field visitor that writes event fields as colon-separated key/value pairs.
///
/// Pairs are separated by commas, like so: `key:value,key2:value2,...`. Structured fields are written before the
/// message, and both are introduced by a pipe character, like other sections of the overall log format:
///
/// ```text
/// | process:coordinator.worker,key:value,key2:value2 | message
/// ```
///
/// Errors with writing fields to the given writer are tracked internally. If any operation hits an error during
/// writing, the error is captured and returned when the visitor is finished. All subsequent operations after an error
/// are no-ops.
struct FieldVisitor<'writer> {
    writer: Writer<'writer>,
    fields_written: usize,
    message: String,
    last_result: fmt::Result,
}

impl<'writer> FieldVisitor<'writer> {
    fn new(writer: Writer<'writer>, process_name: Option<String>) -> Self {
        let mut visitor = Self {
            writer,
            fields_written: 0,
            message: String::new(),
            last_result: Ok(()),
        };

        if let Some(process_name) = process_name {
            visitor.write_field("process", |w| w.write_str(&process_name));
        }

        visitor
    }

    fn write_field(&mut self, name: &str, f: impl FnOnce(&mut dyn fmt::Write) -> fmt::Result) {
        let prefix = if self.fields_written == 0 { " | " } else { "," };

        self.last_result = write!(self.writer, "{}{}:", prefix, name);
        if self.last_result.is_err() {
            return;
        }

        self.last_result = f(&mut self.writer);
        if self.last_result.is_ok() {
            self.fields_written += 1;
        }
    }

    /// Writes the given field to the writer.
    ///
    /// `f` is expected to write the field value only: the field name and separators are handled here.
    fn try_write(&mut self, field: &field::Field, f: impl FnOnce(&mut dyn fmt::Write) -> fmt::Result) {
        if self.last_result.is_err() {
            return;
        }

        if field.name() == "message" {
            // The message always comes last, so hold on to it until the visitor is finished.
            self.last_result = f(&mut self.message);
        } else {
            self.write_field(field.name(), f);
        }
    }
}

impl field::Visit for FieldVisitor<'_> {
    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        self.try_write(field, |w| {
            if field.name() == "message" {
                write!(w, "{:?}", value)
            } else {
                write!(w, "\"{:?}\"", value)
            }
        });
    }

    fn record_str(&mut self, field: &field::Field, value: &str) {
        self.try_write(field, |w| {
            if field.name() == "message" {
                w.write_str(value)
            } else {
                write!(w, "\"{}\"", value)
            }
        });
    }

    fn record_f64(&mut self, field: &field::Field, value: f64) {
        self.try_write(field, |w| write!(w, "{}", value));
    }

    fn record_i64(&mut self, field: &field::Field, value: i64) {
        self.try_write(field, |w| write!(w, "{}", value));
    }

    fn record_u64(&mut self, field: &field::Field, value: u64) {
        self.try_write(field, |w| write!(w, "{}", value));
    }

    fn record_bool(&mut self, field: &field::Field, value: bool) {
        self.try_write(field, |w| write!(w, "{}", value));
    }
}

impl VisitOutput<fmt::Result> for FieldVisitor<'_> {
    fn finish(mut self) -> fmt::Result {
        self.last_result?;

        if !self.message.is_empty() {
            write!(self.writer, " | {}", self.message)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use tracing::{debug_span, info};
    use tracing_subscriber::layer::SubscriberExt as _;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture<F: FnOnce()>(config: &LoggingConfiguration, f: F) -> String {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::registry()
            .with(ProcessNameLayer)
            .with(build_formatting_layer(config, move || writer.clone(), false));

        tracing::subscriber::with_default(subscriber, f);
        buffer.contents()
    }

    #[test]
    fn text_format_has_pipe_delimited_sections() {
        let output = capture(&LoggingConfiguration::default(), || {
            info!(restarts = 3u64, worker = "coordinator.worker", "Worker restarted.");
        });

        let sections = output.trim_end().split(" | ").collect::<Vec<_>>();
        assert_eq!(sections.len(), 6, "unexpected line: {}", output);
        assert!(sections[0].ends_with("UTC"));
        assert_eq!(sections[1], "FREEFALL");
        assert_eq!(sections[2], "INFO");
        assert!(sections[3].starts_with("(") && sections[3].contains("layer.rs:"));
        assert_eq!(sections[4], "restarts:3,worker:\"coordinator.worker\"");
        assert_eq!(sections[5], "Worker restarted.");
    }

    #[test]
    fn text_format_without_fields_skips_field_section() {
        let output = capture(&LoggingConfiguration::default(), || info!("Hello."));
        assert!(output.ends_with(") | Hello.\n"), "unexpected line: {}", output);
    }

    #[test]
    fn text_format_names_the_logging_process() {
        let output = capture(&LoggingConfiguration::default(), || {
            let span = debug_span!("process", process_id = 7usize, process_name = "coordinator");
            let _entered = span.enter();
            info!("Coordinator starting.");
        });

        assert!(
            output.ends_with(" | process:coordinator | Coordinator starting.\n"),
            "unexpected line: {}",
            output
        );
    }

    #[test]
    fn json_format_is_flattened() {
        let config = LoggingConfiguration {
            log_format_json: true,
            ..LoggingConfiguration::default()
        };
        let output = capture(&config, || info!(body = "mars", "Computed."));

        assert!(output.starts_with('{'), "unexpected line: {}", output);
        assert!(output.contains("\"message\":\"Computed.\""));
        assert!(output.contains("\"body\":\"mars\""));
        assert!(output.contains("\"level\":\"INFO\""));
    }
}
