// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for applications embedding the client.
//!
//! The pipeline itself only emits `tracing` events; it never installs a
//! subscriber. Applications that want the client's own output format can use
//! [`Formatter`] directly or call [`init`] once at startup.
//!
//! ```text
//! LANGFUSE | WARN | langfuse_worker{processor=0}: langfuse_event{context=3 fields=user=alice}: attempt 1 failed, retrying in 100 ms
//! ```

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::errors::{ErrorKind, IngestError};

/// Event formatter producing `LANGFUSE | LEVEL | spans: message fields`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(&mut writer, "LANGFUSE | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Filter directive for `level`, with the HTTP stack silenced.
pub fn env_filter(level: &str) -> Result<EnvFilter, IngestError> {
    EnvFilter::try_new(format!("h2=off,hyper=off,rustls=off,{level}")).map_err(|e| {
        IngestError::new(ErrorKind::Config, "INVALID_CONFIG", "invalid log level")
            .with_details([("log_level", level)])
            .with_cause(e)
    })
}

/// Installs a global subscriber using [`Formatter`] at `level`.
///
/// Fails if the level does not parse or a global subscriber is already set.
pub fn init(level: &str) -> Result<(), IngestError> {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(level)?)
        .event_format(Formatter)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        IngestError::new(
            ErrorKind::Config,
            "LOGGER_ALREADY_SET",
            "a global tracing subscriber is already installed",
        )
        .with_cause(e)
    })?;
    tracing::debug!("logging subsystem enabled");
    Ok(())
}
