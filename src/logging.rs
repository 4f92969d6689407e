//! Logger setup for the binary.
//!
//! Lines look like `[2024-05-01 03:00:00] WARNING repo - skipped ...`.
//! Output goes to stdout, and additionally to a file when one is given.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Local};
use env_logger::{Env, Target};
use log::Level;

/// Install the global logger. `RUST_LOG` still wins over `verbose`.
pub fn init(verbose: bool, log_file: Option<&Path>) -> io::Result<()> {
    let default_filter = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default_filter));

    builder.format(|buf, record| {
        writeln!(
            buf,
            "{}",
            format_line(&Local::now(), record.level(), record.args())
        )
    });

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.target(Target::Pipe(Box::new(Tee {
                stdout: io::stdout(),
                file,
            })));
        }
        None => {
            builder.target(Target::Stdout);
        }
    }

    builder.try_init().map_err(io::Error::other)
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

fn format_line(now: &DateTime<Local>, level: Level, message: &fmt::Arguments<'_>) -> String {
    format!(
        "[{}] {:<7} {}",
        now.format("%Y-%m-%d %H:%M:%S"),
        level_name(level),
        message
    )
}

/// Writes everything to both stdout and the log file.
struct Tee {
    stdout: io::Stdout,
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdout.write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()?;
        self.file.flush()
    }
}
