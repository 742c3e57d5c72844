//! Structured JSON logging shared by gateway services.
//!
//! Every event is written as a single JSON object carrying the service name,
//! a per-span trace identifier and, inside request spans, the request id.

use std::{
    collections::HashMap,
    fmt, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};

use chrono::{SecondsFormat, Utc};
use once_cell::sync::OnceCell;
use serde_json::{Map, Value};
use tracing::{field::Visit, span};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{
        self as tsfmt,
        format::Writer,
        writer::{BoxMakeWriter, MakeWriterExt},
        FmtContext, FormatEvent, FormatFields, MakeWriter,
    },
    layer::{Context, Layer, SubscriberExt},
    registry::{LookupSpan, SpanRef},
    EnvFilter, Registry,
};

#[derive(Debug, thiserror::Error)]
pub enum ObsInitError {
    #[error("tracing subscriber already initialized")]
    AlreadyInitialized,
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: InitError,
    },
}

/// Logging options decided by the service configuration.
#[derive(Debug, Clone, Default)]
pub struct ObsSettings {
    /// Emit debug-level events when no `RUST_LOG` filter is set.
    pub debug: bool,
    /// Append log lines to this file in addition to stderr.
    pub log_file: Option<PathBuf>,
}

impl ObsSettings {
    fn default_directive(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

/// Initialize observability for a service.
pub struct ObsInit;

impl ObsInit {
    /// Install a global tracing subscriber writing JSON lines to stderr and,
    /// when configured, to a log file.
    pub fn init(service: &str, settings: &ObsSettings) -> Result<(), ObsInitError> {
        let writer = build_writer(settings)?;
        let subscriber = Self::subscriber_with_writer(service, settings, writer);
        tracing::subscriber::set_global_default(subscriber).map_err(|err| {
            if tracing::dispatcher::has_been_set() {
                ObsInitError::AlreadyInitialized
            } else {
                ObsInitError::Install(err)
            }
        })
    }

    /// Build a tracing subscriber using the provided writer.
    pub fn subscriber_with_writer<W>(
        service: &str,
        settings: &ObsSettings,
        writer: W,
    ) -> impl tracing::Subscriber + Send + Sync
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(settings.default_directive()))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tsfmt::layer()
            .with_ansi(false)
            .event_format(JsonLineFormat::new(Arc::from(service)))
            .with_writer(writer);

        Registry::default()
            .with(env_filter)
            .with(TraceLayer::new())
            .with(fmt_layer)
    }
}

fn build_writer(settings: &ObsSettings) -> Result<BoxMakeWriter, ObsInitError> {
    Ok(match &settings.log_file {
        Some(path) => BoxMakeWriter::new(io::stderr.and(open_log_file(path)?)),
        None => BoxMakeWriter::new(io::stderr),
    })
}

fn open_log_file(path: &Path) -> Result<RollingFileAppender, ObsInitError> {
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app.log".to_string());

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .map_err(|source| ObsInitError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Helper trait for request scoped metadata.
pub trait SpanExt {
    /// Record a request identifier on the span so that subsequent logs emit it.
    fn with_req(&self, request_id: &str);

    /// Retrieve the active trace identifier for the span.
    fn trace_id(&self) -> Option<String>;
}

impl SpanExt for tracing::Span {
    fn with_req(&self, request_id: &str) {
        if let (Some(id), Some(state)) = (self.id(), TRACE_STATE.get()) {
            state.set_request_id(id.into_u64(), request_id);
        }
    }

    fn trace_id(&self) -> Option<String> {
        let id = self.id()?;
        TRACE_STATE.get()?.trace_id(id.into_u64())
    }
}

/// In-memory log sink.
///
/// Used by tests and diagnostics to capture exactly what a service logged.
#[derive(Clone, Default)]
pub struct MemoryWriter(Arc<Mutex<Vec<u8>>>);

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded as UTF-8.
    pub fn contents(&self) -> String {
        let guard = self.0.lock().unwrap_or_else(|poison| poison.into_inner());
        String::from_utf8_lossy(&guard).into_owned()
    }
}

impl io::Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.0.lock().unwrap_or_else(|poison| poison.into_inner());
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MemoryWriter {
    type Writer = MemoryWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

struct TraceLayer {
    state: Arc<TraceState>,
}

impl TraceLayer {
    fn new() -> Self {
        let state = TRACE_STATE
            .get_or_init(|| Arc::new(TraceState::default()))
            .clone();
        Self { state }
    }
}

impl<S> Layer<S> for TraceLayer
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &span::Id,
        ctx: Context<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let trace_ctx = span
            .parent()
            .and_then(|parent| {
                let inherited = parent.extensions().get::<Arc<TraceContext>>().cloned();
                inherited
            })
            .unwrap_or_else(|| Arc::new(self.state.make_context()));

        span.extensions_mut().insert(trace_ctx.clone());
        self.state.insert(id.into_u64(), trace_ctx);
    }

    fn on_close(&self, id: span::Id, _: Context<'_, S>) {
        self.state.remove(id.into_u64());
    }
}

#[derive(Default)]
struct TraceState {
    counter: AtomicU64,
    contexts: Mutex<HashMap<u64, Arc<TraceContext>>>,
}

impl TraceState {
    fn make_context(&self) -> TraceContext {
        let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        TraceContext::new(format!("{:016x}", id))
    }

    fn contexts(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<TraceContext>>> {
        self.contexts
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn insert(&self, span_id: u64, ctx: Arc<TraceContext>) {
        self.contexts().insert(span_id, ctx);
    }

    fn remove(&self, span_id: u64) {
        self.contexts().remove(&span_id);
    }

    fn set_request_id(&self, span_id: u64, request_id: &str) {
        let ctx = self.contexts().get(&span_id).cloned();
        if let Some(ctx) = ctx {
            ctx.set_request_id(request_id);
        }
    }

    fn trace_id(&self, span_id: u64) -> Option<String> {
        self.contexts()
            .get(&span_id)
            .map(|ctx| ctx.trace_id.clone())
    }
}

struct TraceContext {
    trace_id: String,
    request_id: RwLock<Option<String>>,
}

impl TraceContext {
    fn new(trace_id: String) -> Self {
        Self {
            trace_id,
            request_id: RwLock::new(None),
        }
    }

    fn request_id(&self) -> Option<String> {
        self.request_id
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    fn set_request_id(&self, value: &str) {
        *self
            .request_id
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = Some(value.to_string());
    }
}

static TRACE_STATE: OnceCell<Arc<TraceState>> = OnceCell::new();

struct JsonLineFormat {
    service: Arc<str>,
}

impl JsonLineFormat {
    fn new(service: Arc<str>) -> Self {
        Self { service }
    }
}

impl<S, N> FormatEvent<S, N> for JsonLineFormat
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut fields = FieldVisitor::default();
        event.record(&mut fields);

        let trace_ctx = ctx.lookup_current().and_then(find_trace_ctx);

        let mut line = Map::new();
        line.insert(
            "timestamp".into(),
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into(),
        );
        line.insert(
            "level".into(),
            metadata.level().as_str().to_ascii_lowercase().into(),
        );
        line.insert("target".into(), metadata.target().into());
        line.insert("service".into(), Value::from(&*self.service));
        line.insert(
            "trace_id".into(),
            trace_ctx
                .as_ref()
                .map(|ctx| Value::from(ctx.trace_id.as_str()))
                .unwrap_or(Value::Null),
        );
        line.insert(
            "request_id".into(),
            trace_ctx
                .and_then(|ctx| ctx.request_id())
                .map(Value::from)
                .unwrap_or(Value::Null),
        );
        line.insert("fields".into(), Value::Object(fields.0));

        let encoded = serde_json::to_string(&Value::Object(line)).map_err(|_| fmt::Error)?;
        writeln!(writer, "{encoded}")
    }
}

fn find_trace_ctx<S>(span: SpanRef<'_, S>) -> Option<Arc<TraceContext>>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    for scope_span in span.scope().from_root() {
        if let Some(ctx) = scope_span.extensions().get::<Arc<TraceContext>>() {
            return Some(ctx.clone());
        }
    }
    None
}

#[derive(Default)]
struct FieldVisitor(Map<String, Value>);

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{:?}", value).into());
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), value.into());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), value.into());
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), value.into());
    }
}
