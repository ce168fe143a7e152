use anyhow::{bail, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::{Map, Value};
use std::{thread, time::Duration};

use crate::models::{GenType, ListingConfig, ListingForm};

/** \brief 本地存储中保存表单与配置的固定键，版本号内嵌于键名。 */
pub const STORAGE_KEY: &str = "amazon-listing-tool:v1";

const TELEMETRY_KEY: &str = "telemetry_enabled";

/**
 * \brief 打开默认数据库文件（`LISTCRAFT_DB`，缺省为本地目录下的 listcraft.db）。
 */
pub fn open_default_db() -> Result<Connection> {
    let path = std::env::var("LISTCRAFT_DB").unwrap_or_else(|_| "listcraft.db".to_string());
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS local_storage (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

/**
 * \brief 读取本地存储中的一项，不存在时返回 None。
 */
pub fn get_item(conn: &Connection, key: &str) -> Result<Option<String>> {
    let val = conn
        .query_row(
            "SELECT value FROM local_storage WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val)
}

/**
 * \brief 整体覆盖写入本地存储中的一项。
 */
pub fn set_item(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO local_storage (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

pub fn remove_item(conn: &Connection, key: &str) -> Result<()> {
    retry_on_locked(|| conn.execute("DELETE FROM local_storage WHERE key=?1", params![key]))?;
    Ok(())
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, if value { "1" } else { "0" }],
        )
    })?;
    Ok(())
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val.map(|s| s == "1").unwrap_or(default))
}

pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, TELEMETRY_KEY, false)
}

pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, TELEMETRY_KEY, enabled)
}

/**
 * \brief 读取生成配置；各字段独立回落到默认值，单个字段损坏不影响其余字段。
 * \details 空的 provider/model 视为未设置。
 */
pub fn load_config(conn: &Connection) -> Result<ListingConfig> {
    let record = load_record(conn)?.unwrap_or_default();
    let defaults = ListingConfig::default();
    Ok(ListingConfig {
        provider: non_empty_field(&record, "provider").unwrap_or(defaults.provider),
        model: non_empty_field(&record, "model").unwrap_or(defaults.model),
        temperature: record
            .get("temperature")
            .and_then(Value::as_f64)
            .unwrap_or(defaults.temperature),
        use_custom: record.get("useCustom").map(truthy).unwrap_or(false),
        custom_endpoint: str_field(&record, "customEndpoint").unwrap_or_default(),
        custom_api_key: str_field(&record, "customApiKey").unwrap_or_default(),
    })
}

/**
 * \brief 恢复表单内容；尚未保存或记录损坏时返回 None。
 * \details 未知的 genType 被忽略，保持默认类型。
 */
pub fn load_form(conn: &Connection) -> Result<Option<ListingForm>> {
    let Some(record) = load_record(conn)? else {
        return Ok(None);
    };
    let gen_type = record
        .get("genType")
        .and_then(|v| serde_json::from_value::<GenType>(v.clone()).ok())
        .unwrap_or_default();
    Ok(Some(ListingForm {
        keywords: str_field(&record, "keywords").unwrap_or_default(),
        features: str_field(&record, "features").unwrap_or_default(),
        comp_title: str_field(&record, "compTitle").unwrap_or_default(),
        comp_bullets: str_field(&record, "compBullets").unwrap_or_default(),
        gen_type,
    }))
}

fn load_record(conn: &Connection) -> Result<Option<Map<String, Value>>> {
    Ok(get_item(conn, STORAGE_KEY)?
        .and_then(|s| serde_json::from_str::<Map<String, Value>>(&s).ok()))
}

fn str_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_string)
}

fn non_empty_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    str_field(record, key).filter(|s| !s.is_empty())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/**
 * \brief 保存当前配置与表单。
 * \details 仅在 `save_enabled` 时写入；新字段逐项合并进已有记录，其余字段保持不变。
 * \return 是否实际写入。
 */
pub fn save_state(
    conn: &Connection,
    config: &ListingConfig,
    form: &ListingForm,
    save_enabled: bool,
) -> Result<bool> {
    if !save_enabled {
        return Ok(false);
    }
    if !config.temperature.is_finite() {
        bail!("temperature must be a finite number, got {}", config.temperature);
    }
    let mut record = get_item(conn, STORAGE_KEY)?
        .and_then(|s| serde_json::from_str::<Map<String, Value>>(&s).ok())
        .unwrap_or_default();
    for value in [serde_json::to_value(config)?, serde_json::to_value(form)?] {
        if let Value::Object(fields) = value {
            record.extend(fields);
        }
    }
    set_item(conn, STORAGE_KEY, &Value::Object(record).to_string())?;
    Ok(true)
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并进行指数退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
