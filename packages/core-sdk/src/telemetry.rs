use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

static TELEMETRY_ENABLED: Lazy<std::sync::RwLock<bool>> =
    Lazy::new(|| std::sync::RwLock::new(false));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
        }
    }
}

/**
 * \brief 更新日志开关状态。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief 记录常规事件，例如代理转发与生成完成。
 */
pub fn log_event(category: &str, message: &str) {
    record(Level::Info, category, message);
}

/**
 * \brief 记录错误事件；关闭日志时错误仍输出到 stderr。
 */
pub fn log_error(category: &str, message: &str) {
    if !is_enabled() {
        eprintln!("[{}] {}", category, message);
    }
    record(Level::Error, category, message);
}

fn record(level: Level, category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line(level, category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

/** \brief 日志目录，`LISTCRAFT_LOG_DIR` 可覆盖。 */
fn log_dir() -> PathBuf {
    std::env::var("LISTCRAFT_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

fn format_line(timestamp: &str, level: Level, category: &str, message: &str) -> String {
    // 单行记录，消息内换行折叠为空格
    let message = message.replace(['\r', '\n'], " ");
    format!("{} [{}] {} - {}", timestamp, level.as_str(), category, message)
}

fn write_line(level: Level, category: &str, message: &str) -> Result<()> {
    let dir = log_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("listcraft.log"))?;
    writeln!(file, "{}", format_line(&timestamp, level, category, message))?;
    Ok(())
}
