//! Log routing.
//!
//! Readers and writers accept an optional log callback. Messages may
//! originate from either the caller thread or an acquisition thread, so the
//! callback must be `Send + Sync`. When no callback is installed, messages
//! are forwarded to the [`log`] crate facade at the matching level.

use std::sync::Arc;

/// Severity of a library log message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Fatal,
    Error,
    Warning,
    Info,
    Debug,
}

/// Caller-supplied log callback. State that a C interface would pass as
/// `userdata` is captured by the closure instead.
pub type LogFn = dyn Fn(&str, LogLevel) + Send + Sync;

/// Cloneable handle that routes messages to the callback or the `log` facade.
#[derive(Clone, Default)]
pub(crate) struct LogSink {
    callback: Option<Arc<LogFn>>,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("callback", &self.callback.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl LogSink {
    pub(crate) fn new(callback: Option<Arc<LogFn>>) -> Self {
        Self { callback }
    }

    pub(crate) fn emit(&self, level: LogLevel, message: &str) {
        match &self.callback {
            Some(callback) => callback(message, level),
            None => match level {
                LogLevel::Fatal | LogLevel::Error => log::error!("{message}"),
                LogLevel::Warning => log::warn!("{message}"),
                LogLevel::Info => log::info!("{message}"),
                LogLevel::Debug => log::debug!("{message}"),
            },
        }
    }

    pub(crate) fn warning(&self, message: &str) {
        self.emit(LogLevel::Warning, message);
    }

    pub(crate) fn info(&self, message: &str) {
        self.emit(LogLevel::Info, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn callback_receives_level_and_message() {
        let seen: Arc<Mutex<Vec<(String, LogLevel)>>> = Arc::default();
        let sink = LogSink::new(Some({
            let seen = Arc::clone(&seen);
            Arc::new(move |message: &str, level| {
                seen.lock().unwrap().push((message.to_string(), level));
            })
        }));

        sink.warning("queue is running hot");
        sink.info("connected");

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("queue is running hot".to_string(), LogLevel::Warning),
                ("connected".to_string(), LogLevel::Info),
            ]
        );
    }

    #[test]
    fn no_callback_does_not_panic() {
        LogSink::new(None).emit(LogLevel::Debug, "routed to the log facade");
    }
}
