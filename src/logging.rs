//! 日志模块 - 提供文件日志和大小管理功能

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

/// 日志文件名
pub const LOG_FILE_NAME: &str = "drivesync.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用文件日志
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从 `config.json` 的 `log` 段落加载，失败时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        crate::config::load_section(config_dir, "log")
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        crate::config::save_section(config_dir, "log", self)
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器，超过限制时把当前文件轮转为 `.old`
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    written: u64,
    writer: BufWriter<File>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        Self::with_max_bytes(log_dir, (max_size_mb as u64) * 1024 * 1024)
    }

    pub fn with_max_bytes(log_dir: &Path, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let file_path = log_dir.join(LOG_FILE_NAME);

        if fs::metadata(&file_path).map(|m| m.len() > max_size).unwrap_or(false) {
            Self::rotate_log(&file_path)?;
        }
        let (writer, written) = Self::open_file(&file_path)?;

        Ok(Self {
            file_path,
            max_size,
            written,
            writer,
        })
    }

    fn open_file(file_path: &Path) -> io::Result<(BufWriter<File>, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        let len = file.metadata()?.len();
        Ok((BufWriter::new(file), len))
    }

    /// 重命名当前日志为 `<name>.old`，已有备份会被覆盖
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        fs::rename(file_path, &backup_path)
    }

    fn check_and_rotate(&mut self) -> io::Result<()> {
        if self.written <= self.max_size {
            return Ok(());
        }

        self.writer.flush()?;
        Self::rotate_log(&self.file_path)?;
        let (writer, written) = Self::open_file(&self.file_path)?;
        self.writer = writer;
        self.written = written;
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.writer.flush()?;
        self.written += n as u64;
        self.check_and_rotate()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// 初始化日志系统
///
/// 返回的 guard 必须在进程存活期间持有，否则后台写入线程会提前退出。
pub fn init(config_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let config = LogConfig::load(config_dir);
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.tracing_level()
    };

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("reqwest=warn".parse().expect("static directive"))
        .add_directive("opendal=warn".parse().expect("static directive"));

    let console_layer = (verbose || cfg!(debug_assertions)).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
    });

    let log_dir = config_dir.join("logs");
    let file = config
        .enabled
        .then(|| SizeRotatingWriter::new(&log_dir, config.max_size_mb))
        .and_then(|r| r.map_err(|e| eprintln!("无法创建日志文件: {}", e)).ok());

    let (file_layer, guard) = match file {
        Some(writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // 文件日志不可用时至少输出到控制台
    let console_layer = if file_layer.is_none() && console_layer.is_none() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
    } else {
        console_layer
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_roundtrip_through_config_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(LogConfig::load(dir.path()).level, "info");

        let config = LogConfig {
            enabled: false,
            max_size_mb: 1,
            level: "debug".to_string(),
        };
        config.save(dir.path()).unwrap();

        let loaded = LogConfig::load(dir.path());
        assert!(!loaded.enabled);
        assert_eq!(loaded.tracing_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let config = LogConfig {
            level: "verbose".to_string(),
            ..Default::default()
        };
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_writer_rotates_when_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SizeRotatingWriter::with_max_bytes(dir.path(), 16).unwrap();

        writer.write_all(b"0123456789").unwrap();
        assert!(!dir.path().join("drivesync.log.old").exists());

        writer.write_all(b"0123456789").unwrap();
        writer.write_all(b"tail").unwrap();
        writer.flush().unwrap();

        let old = fs::read(dir.path().join("drivesync.log.old")).unwrap();
        assert_eq!(old, b"01234567890123456789");
        let current = fs::read(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert_eq!(current, b"tail");
    }
}
