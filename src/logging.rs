use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Capacity of the in-process log fan-out. Slow SSE clients that fall
/// further behind than this see a "lagged" marker instead of blocking writers.
const LOG_CHANNEL_CAPACITY: usize = 500;

#[derive(Clone)]
pub(crate) struct BroadcastMakeWriter {
    pub sender: tokio::sync::broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct BroadcastWriter {
    sender: tokio::sync::broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(line); // no subscribers is fine
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Picks the max level: `BIDPILOT_LOG` wins, then the configured debug flag.
pub(crate) fn resolve_level(env_value: Option<&str>, debug_mode: bool) -> Level {
    match env_value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("trace") => Level::TRACE,
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("warn") => Level::WARN,
        Some("error") => Level::ERROR,
        _ if debug_mode => Level::DEBUG,
        _ => Level::INFO,
    }
}

/// Installs the global fmt subscriber and returns the sender feeding `/api/logs`.
pub(crate) fn init(debug_mode: bool) -> tokio::sync::broadcast::Sender<String> {
    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(LOG_CHANNEL_CAPACITY);
    let make_writer = BroadcastMakeWriter {
        sender: log_tx.clone(),
        suppress_stdout: false,
    };

    let env_level = std::env::var("BIDPILOT_LOG").ok();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(resolve_level(env_level.as_deref(), debug_mode))
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    log_tx
}
