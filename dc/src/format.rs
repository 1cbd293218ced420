//! Log line formatting with the calling thread's diagnostic context
//!
//! [`DiagnosticFormat`] wraps any `tracing-subscriber` event format. Each line
//! is prefixed with the thread label and the MDC entries, and the whole line
//! is passed through the thread's masking patterns before it is written.

use std::fmt::{self, Write as _};

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::{label, masking, mdc};

/// Event format that adds label and MDC, then masks the result
#[derive(Debug, Clone)]
pub struct DiagnosticFormat<E> {
    inner: E,
}

impl<E> DiagnosticFormat<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

impl<S, N, E> FormatEvent<S, N> for DiagnosticFormat<E>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    E: FormatEvent<S, N>,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let mut line = String::new();
        write!(line, "[{}] ", label::current())?;
        let context = mdc::render();
        if !context.is_empty() {
            write!(line, "{{{context}}} ")?;
        }
        self.inner.format_event(ctx, Writer::new(&mut line), event)?;
        writer.write_str(&masking::mask(&line))
    }
}
