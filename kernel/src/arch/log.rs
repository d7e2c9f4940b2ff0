use core::fmt::Write;

/// Where log messages end up. Set once by [`setup`].
static WRITER: spin::Once<fn(&str)> = spin::Once::new();

/// A simple logger that forwards every record to the registered writer.
struct Logger {}

impl log::Log for Logger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let level = match record.level() {
                log::Level::Error => "\x1B[1m\x1b[31m[!]\x1b[0m",
                log::Level::Warn => "\x1B[1m\x1b[33m[-]\x1b[0m",
                log::Level::Info => "\x1B[1m\x1b[32m[*]\x1b[0m",
                log::Level::Debug => "\x1B[1m\x1b[34m[#]\x1b[0m",
                log::Level::Trace => "\x1B[1m\x1b[35m[~]\x1b[0m",
            };
            _ = writeln!(Logger {}, "{} {}", level, record.args());
        }
    }

    fn flush(&self) {}
}

impl core::fmt::Write for Logger {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        write(s);
        Ok(())
    }
}

/// Setup the logging subsystem. All log submitted to the logging subsystem
/// will be ignored until this function is called. On a target, `writer` is
/// typically a serial port or a console; the host substrate provides
/// [`host::stderr`](super::host::stderr).
///
/// # Errors
/// Returns an error if a logger was already installed.
pub fn setup(writer: fn(&str), level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    WRITER.call_once(|| writer);
    log::set_logger(&Logger {})?;
    log::set_max_level(level);
    log::trace!("Logger initialized");
    Ok(())
}

/// Write a message to the log. Messages written before [`setup`] are
/// dropped.
pub fn write(message: &str) {
    if let Some(writer) = WRITER.get() {
        writer(message);
    }
}
