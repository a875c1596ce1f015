//! Per-process binding of tracing events to the shared log queue.
//!
//! A [`LogBinding`] is an explicit handle: it owns this process's
//! [`LogProducer`], its severity threshold and its process identity.
//! Code that starts other processes passes the binding down (see
//! `WorkerConfig::from_binding`) instead of reading global state.
//!
//! [`install`] additionally registers the binding as the process-wide
//! tracing subscriber. It is idempotent: the first binding wins.

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::field::{Field, Visit};
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

use super::queue::{EnqueueError, LogProducer, QueueAddr, QueueMessage};
use super::record::{Level, LogRecord, ProcessIdentity};
use crate::error::Result;

/// Boolean field that promotes an error event to [`Level::Critical`].
pub const CRITICAL_FIELD: &str = "critical";

/// Field whose value is captured as the record's failure trace.
pub const ERROR_FIELD: &str = "error";

/// How long processes wait for their feeder before exiting.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Emit an event at CRITICAL severity.
///
/// ```no_run
/// applog::critical!("gave up waiting for responses");
/// ```
#[macro_export]
macro_rules! critical {
    ($($arg:tt)+) => {
        $crate::__tracing::error!(critical = true, $($arg)+)
    };
}

static PROCESS_BINDING: OnceLock<LogBinding> = OnceLock::new();

/// Connect this process to the queue and make it the global tracing
/// subscriber. Later calls return the binding installed first.
pub fn install(addr: &QueueAddr, level: Level, process_name: &str) -> Result<LogBinding> {
    if let Some(existing) = PROCESS_BINDING.get() {
        return Ok(existing.clone());
    }
    let binding = LogBinding::connect(addr, level, process_name)?;
    let mut first = false;
    let installed = PROCESS_BINDING.get_or_init(|| {
        first = true;
        binding
    });
    if first {
        set_global(installed.subscriber(), process_name);
    }

    tracing::debug!(
        pid = std::process::id(),
        queue = %addr,
        "configured log binding for process"
    );
    Ok(installed.clone())
}

/// Make `subscriber` the global default. Reports on stderr and returns
/// `false` if another subscriber got there first.
fn set_global<S>(subscriber: S, process_name: &str) -> bool
where
    S: Subscriber + Send + Sync + 'static,
{
    match subscriber.try_init() {
        Ok(()) => true,
        Err(e) => {
            eprintln!(
                "applog: {} keeps its log events local, a global tracing subscriber is already set: {}",
                process_name, e
            );
            false
        }
    }
}

/// The binding registered by [`install`], if any.
pub fn process_binding() -> Option<LogBinding> {
    PROCESS_BINDING.get().cloned()
}

struct BindingInner {
    producer: LogProducer,
    addr: Option<QueueAddr>,
    level: Level,
    process: ProcessIdentity,
    dropped: AtomicU64,
}

/// Explicit logging context for one process.
#[derive(Clone)]
pub struct LogBinding {
    inner: Arc<BindingInner>,
}

impl fmt::Debug for LogBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBinding")
            .field("addr", &self.inner.addr)
            .field("level", &self.inner.level)
            .field("process", &self.inner.process)
            .finish()
    }
}

impl LogBinding {
    /// Connect to the queue at `addr`.
    pub fn connect(addr: &QueueAddr, level: Level, process_name: &str) -> Result<Self> {
        let producer = LogProducer::connect(addr)?;
        Ok(Self::from_parts(
            producer,
            Some(addr.clone()),
            level,
            ProcessIdentity::current(process_name),
        ))
    }

    pub(crate) fn from_parts(
        producer: LogProducer,
        addr: Option<QueueAddr>,
        level: Level,
        process: ProcessIdentity,
    ) -> Self {
        Self {
            inner: Arc::new(BindingInner {
                producer,
                addr,
                level,
                process,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Minimum severity forwarded to the queue.
    pub fn level(&self) -> Level {
        self.inner.level
    }

    /// Queue this binding produces into. `None` only for bindings built
    /// around an anonymous socket.
    pub fn addr(&self) -> Option<&QueueAddr> {
        self.inner.addr.as_ref()
    }

    pub fn process(&self) -> &ProcessIdentity {
        &self.inner.process
    }

    /// Producer handle shared by every clone of this binding.
    pub fn producer(&self) -> &LogProducer {
        &self.inner.producer
    }

    /// Tracing layer that forwards events to the queue.
    pub fn layer(&self) -> QueueLayer {
        QueueLayer {
            binding: self.clone(),
            max_level: self.inner.level.tracing_filter(),
        }
    }

    /// A registry with only this binding's layer, for scoped use with
    /// `tracing::subscriber::with_default`.
    pub fn subscriber(&self) -> tracing_subscriber::layer::Layered<QueueLayer, Registry> {
        tracing_subscriber::registry().with(self.layer())
    }

    /// Forward a record if it meets the threshold. Never fails; a record
    /// that cannot be enqueued is dropped and reported on stderr.
    pub fn emit(&self, record: LogRecord) {
        if record.level < self.inner.level {
            return;
        }
        if let Err(e) = self.inner.producer.try_send(QueueMessage::Record(record)) {
            self.report_drop(e);
        }
    }

    /// Wait for the feeder to write everything emitted so far.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.inner.producer.flush(timeout)
    }

    fn report_drop(&self, error: EnqueueError) {
        let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % 1000 == 0 {
            eprintln!(
                "applog: {} dropped {} log record(s): {}",
                self.inner.process.name, dropped, error
            );
        }
    }
}

/// Tracing layer installed by a [`LogBinding`].
pub struct QueueLayer {
    binding: LogBinding,
    max_level: LevelFilter,
}

impl<S: Subscriber> Layer<S> for QueueLayer {
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        *metadata.level() <= self.max_level
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let level = Level::from_tracing(metadata.level(), visitor.critical);
        if level < self.binding.level() {
            return;
        }

        let mut record = LogRecord::new(
            level,
            metadata.target(),
            visitor.message.unwrap_or_default(),
            self.binding.process().clone(),
        )
        .with_fields(visitor.fields);
        record.trace = visitor.trace;
        self.binding.emit(record);
    }
}

/// Collects an event's fields into record parts.
#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
    trace: Option<String>,
    critical: bool,
}

impl Visit for RecordVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == CRITICAL_FIELD {
            self.critical = value;
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            ERROR_FIELD => self.trace = Some(value.to_string()),
            name => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    fn record_error(&mut self, _field: &Field, value: &(dyn StdError + 'static)) {
        self.trace = Some(render_error_chain(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{:?}", value)),
            ERROR_FIELD => self.trace = Some(format!("{:?}", value)),
            name if name.starts_with("log.") => {}
            name => self.fields.push((name.to_string(), format!("{:?}", value))),
        }
    }
}

/// Render an error and its sources as text.
pub fn render_error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
