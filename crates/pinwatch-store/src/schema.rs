use chrono::{DateTime, Utc};
use pinwatch_core::{FailureReason, ServerKey, ServerStatus};
use rusqlite::types::Type;
use rusqlite::Row;

pub const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS server_status (
        entity_id        TEXT NOT NULL,
        base_uri         TEXT NOT NULL,
        last_checked     INTEGER,
        healthy          INTEGER,
        reason           TEXT,
        detail           TEXT,
        cert_cn          TEXT,
        cert_expires     INTEGER,
        cert_fingerprint TEXT,
        PRIMARY KEY (entity_id, base_uri)
    );
    CREATE INDEX IF NOT EXISTS server_status_last_checked
        ON server_status (last_checked);
";

/// Column order expected by [`status_from_row`]
pub const STATUS_COLUMNS: &str = "entity_id, base_uri, last_checked, healthy, reason, detail, \
                                  cert_cn, cert_expires, cert_fingerprint";

pub fn status_from_row(row: &Row<'_>) -> rusqlite::Result<ServerStatus> {
    Ok(ServerStatus {
        key: ServerKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        last_checked: optional_time(row, 2)?,
        healthy: row.get(3)?,
        reason: row
            .get::<_, Option<String>>(4)?
            .map(|code| {
                code.parse::<FailureReason>()
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))
            })
            .transpose()?,
        detail: row.get(5)?,
        cert_common_name: row.get(6)?,
        cert_expires: optional_time(row, 7)?,
        cert_fingerprint: row.get(8)?,
    })
}

pub fn optional_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(idx)?
        .map(|millis| {
            DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    Type::Integer,
                    format!("timestamp out of range: {millis}").into(),
                )
            })
        })
        .transpose()
}
