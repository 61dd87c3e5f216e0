use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params, OptionalExtension};
use shared::types::{
    HistoryRecord, NewService, OwnerId, ProbeLocation, Service, ServiceConfig, ServiceId,
    ServiceStatus,
};

/// Schema steps, applied in order. `PRAGMA user_version` records how many ran.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS services (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id       INTEGER NOT NULL,
        name          TEXT NOT NULL,
        type          TEXT NOT NULL,
        target        TEXT NOT NULL,
        interval_secs INTEGER NOT NULL,
        status        TEXT NOT NULL DEFAULT 'Pending',
        last_checked  TEXT
    );
    "#,
    r#"
    ALTER TABLE services ADD COLUMN last_response_time INTEGER;
    CREATE TABLE IF NOT EXISTS status_history (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        service_id    INTEGER NOT NULL,
        timestamp     TEXT NOT NULL,
        status        INTEGER NOT NULL,
        response_time INTEGER NOT NULL,
        FOREIGN KEY (service_id) REFERENCES services (id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_history_service_time
        ON status_history(service_id, timestamp);
    "#,
    "ALTER TABLE services ADD COLUMN locations TEXT NOT NULL DEFAULT '[]';",
    "ALTER TABLE services ADD COLUMN uptime_percentage REAL;",
];

const SERVICE_COLUMNS: &str = "id, user_id, name, type, target, interval_secs, status,
    last_checked, last_response_time, uptime_percentage, locations";

/// Partial status write. `None` keeps the stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: Option<ServiceStatus>,
    pub last_checked: DateTime<Utc>,
    pub last_response_time: Option<u64>,
    pub uptime_percentage: Option<f64>,
}

pub struct StoreDb {
    conn: Connection,
}

impl StoreDb {
    /// Open or create the SQLite database and bring the schema up to date
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("Failed to configure connection")?;

        migrate(&mut conn)?;

        Ok(Self { conn })
    }

    pub fn schema_version(&self) -> Result<usize> {
        user_version(&self.conn)
    }

    pub fn insert_service(&self, new: &NewService) -> Result<Service> {
        let locations_json = serde_json::to_string(&new.config.locations)
            .context("Failed to serialize locations")?;

        self.conn.execute(
            "INSERT INTO services (user_id, name, type, target, interval_secs, locations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.owner_id,
                &new.config.name,
                new.config.check_type.as_str(),
                &new.config.target,
                new.config.interval_secs as i64,
                &locations_json,
            ],
        )
        .context("Failed to insert service")?;

        let id = self.conn.last_insert_rowid();
        self.get_service(id)?
            .context("Inserted service vanished")
    }

    /// Replace the configuration of a service and clear `last_checked` so the
    /// edit is measured right away. Returns `None` if the service does not exist.
    pub fn update_service_config(&self, id: ServiceId, config: &ServiceConfig) -> Result<Option<Service>> {
        let locations_json = serde_json::to_string(&config.locations)
            .context("Failed to serialize locations")?;

        let changed = self.conn.execute(
            "UPDATE services
             SET name = ?1, type = ?2, target = ?3, interval_secs = ?4, locations = ?5,
                 last_checked = NULL
             WHERE id = ?6",
            params![
                &config.name,
                config.check_type.as_str(),
                &config.target,
                config.interval_secs as i64,
                &locations_json,
                id,
            ],
        )
        .context("Failed to update service")?;

        if changed == 0 {
            return Ok(None);
        }
        self.get_service(id)
    }

    /// Delete a service and, through the foreign key, its history
    pub fn delete_service(&self, id: ServiceId) -> Result<bool> {
        let count = self.conn.execute("DELETE FROM services WHERE id = ?1", params![id])
            .context("Failed to delete service")?;
        Ok(count > 0)
    }

    pub fn get_service(&self, id: ServiceId) -> Result<Option<Service>> {
        let sql = format!("SELECT {} FROM services WHERE id = ?1", SERVICE_COLUMNS);
        let result = self
            .conn
            .query_row(&sql, params![id], Self::row_to_service)
            .optional()
            .context("Failed to query service")?;

        Ok(result)
    }

    pub fn get_all_services(&self) -> Result<Vec<Service>> {
        let sql = format!("SELECT {} FROM services ORDER BY id", SERVICE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare query")?;

        let services = stmt
            .query_map([], Self::row_to_service)
            .context("Failed to query services")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect services")?;

        Ok(services)
    }

    pub fn get_services_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Service>> {
        let sql = format!(
            "SELECT {} FROM services WHERE user_id = ?1 ORDER BY name",
            SERVICE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql).context("Failed to prepare query")?;

        let services = stmt
            .query_map(params![owner_id], Self::row_to_service)
            .context("Failed to query services by owner")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect services")?;

        Ok(services)
    }

    /// Append a history row if the owning service still exists.
    /// Returns false when the service is gone and nothing was written.
    pub fn append_history(&self, record: &HistoryRecord) -> Result<bool> {
        let count = self.conn.execute(
            "INSERT INTO status_history (service_id, timestamp, status, response_time)
             SELECT ?1, ?2, ?3, ?4
             WHERE EXISTS (SELECT 1 FROM services WHERE id = ?1)",
            params![
                record.service_id,
                format_ts(&record.timestamp),
                record.up as i32,
                record.response_time as i64,
            ],
        )
        .context("Failed to append history")?;

        Ok(count > 0)
    }

    /// History rows at or after `since`, oldest first
    pub fn get_history_since(&self, id: ServiceId, since: DateTime<Utc>) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT service_id, timestamp, status, response_time
                 FROM status_history
                 WHERE service_id = ?1 AND timestamp >= ?2
                 ORDER BY timestamp ASC, id ASC",
            )
            .context("Failed to prepare query")?;

        let rows = stmt
            .query_map(params![id, format_ts(&since)], Self::row_to_history)
            .context("Failed to query history")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect history")?;

        Ok(rows)
    }

    /// The newest `limit` history rows, returned oldest first for charting
    pub fn recent_history(&self, id: ServiceId, limit: usize) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT service_id, timestamp, status, response_time
                 FROM status_history
                 WHERE service_id = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2",
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query_map(params![id, limit as i64], Self::row_to_history)
            .context("Failed to query recent history")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect history")?;

        rows.reverse();
        Ok(rows)
    }

    /// Returns false when no service has this id
    pub fn update_service_status(&self, id: ServiceId, update: &StatusUpdate) -> Result<bool> {
        let count = self.conn.execute(
            "UPDATE services
             SET status = COALESCE(?1, status),
                 last_checked = ?2,
                 last_response_time = COALESCE(?3, last_response_time),
                 uptime_percentage = COALESCE(?4, uptime_percentage)
             WHERE id = ?5",
            params![
                update.status.map(|s| s.as_str()),
                format_ts(&update.last_checked),
                update.last_response_time.map(|t| t as i64),
                update.uptime_percentage,
                id,
            ],
        )
        .context("Failed to update service status")?;

        Ok(count > 0)
    }

    fn row_to_service(row: &rusqlite::Row) -> Result<Service, rusqlite::Error> {
        let check_type: String = row.get(3)?;
        let status: String = row.get(6)?;
        let last_checked: Option<String> = row.get(7)?;
        let last_response_time: Option<i64> = row.get(8)?;
        let locations_json: String = row.get(10)?;

        let check_type = check_type
            .parse()
            .map_err(|e: String| conversion_error(3, e.into()))?;

        let status = status
            .parse()
            .map_err(|e: String| conversion_error(6, e.into()))?;

        let last_checked = last_checked
            .map(|s| parse_ts(&s).map_err(|e| conversion_error(7, Box::new(e))))
            .transpose()?;

        let locations: Vec<ProbeLocation> = serde_json::from_str(&locations_json)
            .map_err(|e| conversion_error(10, Box::new(e)))?;

        Ok(Service {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            check_type,
            target: row.get(4)?,
            interval_secs: row.get::<_, i64>(5)? as u64,
            status,
            last_checked,
            last_response_time: last_response_time.map(|t| t as u64),
            uptime_percentage: row.get(9)?,
            locations,
        })
    }

    fn row_to_history(row: &rusqlite::Row) -> Result<HistoryRecord, rusqlite::Error> {
        let timestamp: String = row.get(1)?;
        let status: i32 = row.get(2)?;

        Ok(HistoryRecord {
            service_id: row.get(0)?,
            timestamp: parse_ts(&timestamp).map_err(|e| conversion_error(1, Box::new(e)))?,
            up: status != 0,
            response_time: row.get::<_, i64>(3)? as u64,
        })
    }
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let current = user_version(conn)?;
    if current >= MIGRATIONS.len() {
        tracing::debug!("Database schema is up to date (version {})", current);
        return Ok(());
    }

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current) {
        let version = idx + 1;
        let tx = conn.transaction().context("Failed to begin migration")?;
        tx.execute_batch(sql)
            .with_context(|| format!("Failed to run migration for version {}", version))?;
        tx.pragma_update(None, "user_version", version as i64)
            .with_context(|| format!("Failed to record schema version {}", version))?;
        tx.commit()
            .with_context(|| format!("Failed to commit migration for version {}", version))?;
        tracing::info!("Migrated database schema to version {}", version);
    }

    Ok(())
}

fn user_version(conn: &Connection) -> Result<usize> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .context("Failed to read schema version")?;
    Ok(version as usize)
}

/// Fixed-width UTC form, so text order matches time order in range queries.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn conversion_error(
    column: usize,
    err: Box<dyn std::error::Error + Send + Sync>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, err)
}
