//! Log sinks
//!
//! Connections report what they are doing through a [`LogSink`] handed in at
//! construction. [`TracingSink`] forwards to `tracing`; [`NullSink`] drops
//! everything.

use std::fmt;
use tracing::Level;

/// Destination for leveled connection messages
pub trait LogSink: Send + Sync {
    /// Accept one message at `level`
    fn log(&self, level: Level, message: fmt::Arguments<'_>);
}

/// Forwards to the `tracing` facade under the `uartmh` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: fmt::Arguments<'_>) {
        match level {
            Level::ERROR => tracing::error!(target: "uartmh", "{}", message),
            Level::WARN => tracing::warn!(target: "uartmh", "{}", message),
            Level::INFO => tracing::info!(target: "uartmh", "{}", message),
            Level::DEBUG => tracing::debug!(target: "uartmh", "{}", message),
            _ => tracing::trace!(target: "uartmh", "{}", message),
        }
    }
}

/// Discards all messages
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: Level, _message: fmt::Arguments<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Level, String)>>);

    impl LogSink for Recorder {
        fn log(&self, level: Level, message: fmt::Arguments<'_>) {
            self.0.lock().unwrap().push((level, message.to_string()));
        }
    }

    #[test]
    fn test_sink_receives_formatted_message() {
        let sink = Recorder::default();
        sink.log(Level::WARN, format_args!("chunk {} retried", 2));
        let entries = sink.0.lock().unwrap();
        assert_eq!(entries.as_slice(), &[(Level::WARN, "chunk 2 retried".to_string())]);
    }

    #[test]
    fn test_builtin_sinks_accept_every_level() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            TracingSink.log(level, format_args!("level {}", level));
            NullSink.log(level, format_args!("level {}", level));
        }
    }
}
