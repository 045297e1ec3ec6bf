use env_logger::{Env, Target};
use std::io::{self, Write};
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Targets that are only interesting when something is wrong
const QUIET_TARGETS: &[&str] = &["ort", "hyper", "h2", "tower", "reqwest", "pdf_extract"];

const DEFAULT_LOG_DIR: &str = "logs";
const LOG_FILE_PREFIX: &str = "medical_rag";

/// Writes every record to stderr and to the daily log file
struct Tee<W> {
    file: W,
}

impl<W: Write> Write for Tee<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Daily file `medical_rag.YYYY-MM-DD.log` under `dir`
fn open_log_file(dir: &Path) -> Result<RollingFileAppender, String> {
    std::fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| e.to_string())
}

/// Initialize the process-wide logger.
///
/// Output looks like `2024-05-01T10:00:00Z | medical_rag::rag | INFO | message`
/// and goes to stderr and to a daily file under `LOG_DIR` (default `logs/`).
/// `RUST_LOG` overrides the default filter.
pub fn init() {
    let mut filter = String::from("info");
    for target in QUIET_TARGETS {
        filter.push_str(&format!(",{}=warn", target));
    }

    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string());
    let file = open_log_file(Path::new(&log_dir));

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(filter));
    builder.format(|buf, record| {
        let level = buf.default_styled_level(record.level());
        writeln!(
            buf,
            "{} | {} | {} | {}",
            buf.timestamp_seconds(),
            record.target(),
            level,
            record.args()
        )
    });
    match file {
        Ok(file) => {
            builder.target(Target::Pipe(Box::new(Tee { file })));
            builder.init();
        }
        Err(e) => {
            builder.init();
            log::warn!("Logging to console only, cannot open {}: {}", log_dir, e);
        }
    }
}
