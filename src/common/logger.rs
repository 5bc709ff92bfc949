use std::{
  fs::{self, OpenOptions},
  io::{self, Write},
  path::{Path, PathBuf},
  sync::{Arc, Mutex},
};

use tracing_subscriber::{
  EnvFilter,
  fmt::{self, format::Writer, time::FormatTime},
  prelude::*,
};

use crate::configs::Config;

/// Builds the filter directive from the `[logging]` section.
pub fn filter_directive(config: &Config) -> String {
  let log_level = config
    .logging
    .as_ref()
    .and_then(|l| l.level.as_deref())
    .unwrap_or("info");

  let filters = config
    .logging
    .as_ref()
    .and_then(|l| l.filters.as_deref())
    .unwrap_or("");

  if filters.is_empty() {
    log_level.to_string()
  } else {
    format!("{},{}", log_level, filters)
  }
}

pub fn init(config: &Config) {
  // RUST_LOG wins over the config file
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

  let stdout_layer = fmt::layer()
    .with_timer(LogTimer)
    .with_target(true)
    .with_thread_ids(true)
    .with_line_number(true)
    .with_file(false);

  let file_layer = config
    .logging
    .as_ref()
    .and_then(|l| l.file.as_ref())
    .map(|file_config| {
      if let Some(parent) = Path::new(&file_config.path).parent() {
        if let Err(e) = fs::create_dir_all(parent) {
          eprintln!("Failed to create log directory: {}", e);
        }
      }

      fmt::layer()
        .with_writer(RollingFileWriter::new(
          PathBuf::from(&file_config.path),
          file_config.max_bytes,
        ))
        .with_timer(LogTimer)
        .with_target(true)
        .with_line_number(true)
        .with_ansi(false)
    });

  tracing_subscriber::registry()
    .with(env_filter)
    .with(stdout_layer)
    .with(file_layer)
    .init();
}

/// Local wall-clock timestamps with millisecond precision; falls back to UTC
/// when the local offset cannot be determined.
#[derive(Clone, Copy, Default)]
struct LogTimer;

impl FormatTime for LogTimer {
  fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
    let format = time::macros::format_description!(
      "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    );
    let now =
      time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let stamp = now
      .format(&format)
      .unwrap_or_else(|_| "unknown time".to_string());
    write!(w, "{}", stamp)
  }
}

/// Appends to a log file and moves it aside to `<path>.old` once it grows past
/// `max_bytes`, so at most two files exist on disk.
#[derive(Clone)]
pub(crate) struct RollingFileWriter {
  path: PathBuf,
  max_bytes: u64,
  written: Arc<Mutex<u64>>,
}

impl RollingFileWriter {
  fn new(path: PathBuf, max_bytes: u64) -> Self {
    let existing = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    Self {
      path,
      max_bytes,
      written: Arc::new(Mutex::new(existing)),
    }
  }

  fn roll(&self) -> io::Result<()> {
    let mut old = self.path.clone().into_os_string();
    old.push(".old");
    fs::rename(&self.path, old)
  }
}

impl io::Write for RollingFileWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    let mut written = self.written.lock().unwrap_or_else(|e| e.into_inner());
    if *written + buf.len() as u64 > self.max_bytes && *written > 0 {
      if let Err(e) = self.roll() {
        eprintln!("Failed to roll log file: {}", e);
      }
      *written = 0;
    }

    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    file.write_all(buf)?;
    *written += buf.len() as u64;

    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<'a> fmt::MakeWriter<'a> for RollingFileWriter {
  type Writer = Self;

  fn make_writer(&'a self) -> Self::Writer {
    self.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::configs::LoggingConfig;

  #[test]
  fn directive_defaults_to_info() {
    let config = Config::default();
    assert_eq!(filter_directive(&config), "info");
  }

  #[test]
  fn directive_appends_filters() {
    let mut config = Config::default();
    config.logging = Some(LoggingConfig {
      level: Some("debug".into()),
      filters: Some("tokio_tungstenite=warn".into()),
      file: None,
    });
    assert_eq!(filter_directive(&config), "debug,tokio_tungstenite=warn");
  }
}
