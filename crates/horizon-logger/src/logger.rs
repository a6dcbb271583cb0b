use log::{Log, Metadata, Record};
use std::{path::PathBuf, sync::OnceLock, thread, time::Instant};
use tokio::sync::{mpsc, oneshot};

use crate::{
    log_codec::{LogFileWriter, LOG_VERSION},
    LogLine, LogMessage, TickRecord, TimestampedMessage,
};

static TELEMETRY_LOGGER: OnceLock<TelemetryLogger> = OnceLock::new();

enum WorkerMsg {
    Log(TimestampedMessage),
    Flush(Option<oneshot::Sender<()>>),
}

/// Record the telemetry of one control tick. Does nothing if no logger was initialized.
pub fn log_tick(record: &TickRecord) {
    if let Some(logger) = TELEMETRY_LOGGER.get() {
        logger.send(LogMessage::Tick(record.clone()));
    }
}

/// `log` backend that prints through `env_logger` and streams every record, together with the
/// tick telemetry, to a binary log file written on a background thread.
pub struct TelemetryLogger {
    env_logger: env_logger::Logger,
    sender: mpsc::UnboundedSender<WorkerMsg>,
    started: Instant,
}

impl TelemetryLogger {
    /// Initialize the global logger with the given log file path and stdout logger.
    ///
    /// Only the first call has an effect; later calls return the existing logger.
    pub fn init_with_env_logger(log_file_path: PathBuf, env: env_logger::Logger) -> &'static Self {
        TELEMETRY_LOGGER.get_or_init(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            thread::spawn(|| Self::run_worker(receiver, log_file_path));
            Self {
                env_logger: env,
                sender,
                started: Instant::now(),
            }
        })
    }

    /// Initialize the global logger with the given log file path and the default environment for
    /// the stdout logger.
    pub fn init(log_file_path: PathBuf) -> &'static Self {
        Self::init_with_env_logger(log_file_path, env_logger::Logger::from_default_env())
    }

    /// Flush the log file and wait until the worker has written everything sent so far.
    ///
    /// Must not be called from within an async context.
    pub fn sync(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(WorkerMsg::Flush(Some(tx))).is_ok() {
            // Err means the worker is gone, nothing left to wait for
            let _ = rx.blocking_recv();
        }
    }

    fn send(&self, message: LogMessage) {
        let msg = TimestampedMessage {
            timestamp: self.started.elapsed().as_secs_f64(),
            message,
        };
        // The worker only stops if the file could not be opened, in which case it already
        // reported the problem
        let _ = self.sender.send(WorkerMsg::Log(msg));
    }

    fn run_worker(mut receiver: mpsc::UnboundedReceiver<WorkerMsg>, log_file_path: PathBuf) {
        let mut log_file = match LogFileWriter::open(log_file_path, LOG_VERSION) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to open log file: {}", e);
                return;
            }
        };

        while let Some(msg) = receiver.blocking_recv() {
            match msg {
                WorkerMsg::Log(msg) => {
                    if let Err(e) = log_file.write_log_message(&msg) {
                        eprintln!("Failed to write to log file: {}", e);
                    }
                }
                WorkerMsg::Flush(done) => {
                    if let Err(e) = log_file.flush() {
                        eprintln!("Failed to flush log file: {}", e);
                    }
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                }
            }
        }
        let _ = log_file.flush();
    }
}

impl Log for TelemetryLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target().starts_with("horizon")
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Log to env_logger
        self.env_logger.log(record);

        self.send(LogMessage::Line(LogLine {
            level: record.level().into(),
            target: record.target().to_string(),
            message: format!("{}", record.args()),
            source: format!(
                "{}:{}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0)
            ),
        }));
    }

    fn flush(&self) {
        self.env_logger.flush();
        let _ = self.sender.send(WorkerMsg::Flush(None));
    }
}
