use chrono::Local;
use env_logger::{Builder, Target};
use lazy_static::lazy_static;
use log::{error, info, LevelFilter};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

lazy_static! {
    static ref LOGGER_INITIALIZED: Mutex<bool> = Mutex::new(false);
}

/// Host-side logging setup. The engine itself only ever talks to the `log`
/// facade; installing this logger is optional.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    enabled: bool,
    log_dir: Option<PathBuf>,
    log_level: LevelFilter,
    write_to_stdout: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
            log_level: LevelFilter::Debug,
            write_to_stdout: true,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    pub fn stdout_only(mut self) -> Self {
        self.log_dir = None;
        self
    }

    pub fn disable_logging(mut self) -> Self {
        self.enabled = false;
        self
    }
}

struct MultiWriter {
    file: Option<Mutex<File>>,
    write_to_stdout: bool,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        if let Some(ref file) = self.file {
            if let Ok(n) = file.lock().unwrap().write(buf) {
                written = n;
            }
        }
        if self.write_to_stdout {
            if let Ok(n) = io::stdout().lock().write(buf) {
                written = written.max(n);
            }
        }
        if written > 0 {
            Ok(written)
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                "Failed to write to any log output",
            ))
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(ref file) = self.file {
            file.lock().unwrap().flush()?;
        }
        if self.write_to_stdout {
            io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Install the logger once per process. A second call is an error unless
/// logging is disabled.
pub fn setup_logger(config: LoggerConfig) -> io::Result<()> {
    let mut initialized = LOGGER_INITIALIZED.lock().unwrap();
    if *initialized {
        if !config.enabled {
            return Ok(());
        }
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "Logger already initialized",
        ));
    }

    if !config.enabled {
        *initialized = true;
        return Ok(());
    }

    let file = match config.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(&log_dir)?;
            let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
            let log_file_path = log_dir.join(format!("capture_engine_{}.log", timestamp));
            Some(Mutex::new(File::create(log_file_path)?))
        }
        None => None,
    };

    let writer = MultiWriter {
        file,
        write_to_stdout: config.write_to_stdout,
    };

    let mut builder = Builder::new();
    builder
        .filter_level(config.log_level)
        .target(Target::Pipe(Box::new(writer)))
        .format(|buf, record| {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            writeln!(buf, "{} [{}] - {}", timestamp, record.level(), record.args())
        });

    if let Err(e) = builder.try_init() {
        return Err(io::Error::new(io::ErrorKind::Other, e.to_string()));
    }

    std::panic::set_hook(Box::new(|panic_info| {
        error!("PANIC: {}", panic_info);
        if let Some(location) = panic_info.location() {
            error!(
                "PANIC occurred in file '{}' at line {}",
                location.file(),
                location.line()
            );
        }
    }));

    *initialized = true;
    info!("Logger initialized");
    Ok(())
}
