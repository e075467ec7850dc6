//! [`HistoryStore`] backed by the `SQLite` `attribute_history` table.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};

use crate::model::{AttributeType, DATE_FORMAT, HistoryRecord, parse_date};
use crate::store::{HistoryStore, OpenRecords, StoreError, StoreStats, sort_records};

const RECORD_COLUMNS: &str = "entity_id, attribute_type, start_date, end_date, value";

/// History store over one `SQLite` connection.
///
/// A unit of work is a `BEGIN IMMEDIATE` transaction, so the write lock is
/// taken up front rather than on the first mutation.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    in_unit: bool,
}

impl SqliteStore {
    /// Open (or create and migrate) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(super::open_history_db(path)?))
    }

    /// Fresh in-memory database with the latest schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(super::open_in_memory()?))
    }

    /// Wrap an already migrated connection.
    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            in_unit: false,
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("prepare history query: {sql}"))?;
        let mut records = stmt
            .query_map(params, row_to_record)
            .context("execute history query")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read history rows")?;
        sort_records(&mut records);
        Ok(records)
    }
}

impl HistoryStore for SqliteStore {
    fn load_open_records(&self) -> Result<OpenRecords, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT entity_id, attribute_type, value \
                 FROM attribute_history WHERE end_date IS NULL",
            )
            .context("prepare open records query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    attribute_from_sql(row, 1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .context("load open records")?;

        let mut open = OpenRecords::new();
        for row in rows {
            let (entity_id, attribute, value) = row.context("read open record")?;
            open.entry(entity_id).or_default().insert(attribute, value);
        }
        Ok(open)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.in_unit {
            return Err(anyhow!("unit of work already in progress").into());
        }
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .context("begin unit of work")?;
        self.in_unit = true;
        Ok(())
    }

    fn close_open_record(
        &mut self,
        entity_id: &str,
        attribute: AttributeType,
        end_date: NaiveDate,
    ) -> Result<(), StoreError> {
        let open_start = self
            .conn
            .query_row(
                "SELECT start_date FROM attribute_history \
                 WHERE entity_id = ?1 AND attribute_type = ?2 AND end_date IS NULL",
                params![entity_id, attribute.as_str()],
                |row| date_from_sql(row, 0),
            )
            .optional()
            .with_context(|| format!("find open {attribute} record for {entity_id}"))?;

        let Some(start_date) = open_start else {
            return Err(StoreError::NoOpenRecord {
                entity_id: entity_id.to_string(),
                attribute,
            });
        };
        if end_date < start_date {
            return Err(StoreError::OutOfOrder {
                entity_id: entity_id.to_string(),
                attribute,
                end_date,
                start_date,
            });
        }

        self.conn
            .execute(
                "UPDATE attribute_history SET end_date = ?3 \
                 WHERE entity_id = ?1 AND attribute_type = ?2 AND end_date IS NULL",
                params![entity_id, attribute.as_str(), date_to_sql(end_date)],
            )
            .with_context(|| format!("close open {attribute} record for {entity_id}"))?;
        Ok(())
    }

    fn insert_record(
        &mut self,
        entity_id: &str,
        attribute: AttributeType,
        start_date: NaiveDate,
        value: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO attribute_history (entity_id, attribute_type, start_date, end_date, value) \
                 VALUES (?1, ?2, ?3, NULL, ?4)",
                params![entity_id, attribute.as_str(), date_to_sql(start_date), value],
            )
            .with_context(|| format!("insert {attribute} record for {entity_id}"))?;
        Ok(())
    }

    fn record_committed_date(&mut self, date: NaiveDate) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE run_meta SET last_committed_date = ?1 \
                 WHERE id = 1 AND (last_committed_date IS NULL OR last_committed_date < ?1)",
                params![date_to_sql(date)],
            )
            .context("advance resume cursor")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.in_unit {
            return Ok(());
        }
        self.conn
            .execute_batch("COMMIT")
            .context("commit unit of work")?;
        self.in_unit = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.in_unit {
            return Ok(());
        }
        self.in_unit = false;
        match self.conn.execute_batch("ROLLBACK") {
            // SQLite may already have rolled back on its own after a failed
            // COMMIT; that leaves the connection in autocommit mode.
            Err(_) if self.conn.is_autocommit() => Ok(()),
            Err(err) => Err(anyhow::Error::new(err)
                .context("roll back unit of work")
                .into()),
            Ok(()) => Ok(()),
        }
    }

    fn last_committed_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT last_committed_date FROM run_meta WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("read resume cursor")?
            .flatten();

        raw.map(|text| parse_date(&text).context("parse resume cursor"))
            .transpose()
            .map_err(StoreError::from)
    }

    fn history(
        &self,
        entity_id: &str,
        attribute: Option<AttributeType>,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        match attribute {
            Some(attribute) => self.query_records(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM attribute_history \
                     WHERE entity_id = ?1 AND attribute_type = ?2 ORDER BY start_date"
                ),
                params![entity_id, attribute.as_str()],
            ),
            None => self.query_records(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM attribute_history \
                     WHERE entity_id = ?1 ORDER BY attribute_type, start_date"
                ),
                params![entity_id],
            ),
        }
    }

    fn all_records(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM attribute_history \
                 ORDER BY entity_id, attribute_type, start_date"
            ),
            [],
        )
    }

    fn value_as_of(
        &self,
        entity_id: &str,
        attribute: AttributeType,
        date: NaiveDate,
    ) -> Result<Option<HistoryRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM attribute_history \
                     WHERE entity_id = ?1 AND attribute_type = ?2 \
                       AND start_date <= ?3 AND (end_date IS NULL OR end_date > ?3) \
                     ORDER BY start_date DESC LIMIT 1"
                ),
                params![entity_id, attribute.as_str(), date_to_sql(date)],
                row_to_record,
            )
            .optional()
            .with_context(|| format!("{attribute} of {entity_id} as of {date}"))?;
        Ok(record)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let (records, open_records, entities): (i64, i64, i64) = self
            .conn
            .query_row(
                "SELECT COUNT(*), \
                        COALESCE(SUM(CASE WHEN end_date IS NULL THEN 1 ELSE 0 END), 0), \
                        COUNT(DISTINCT entity_id) \
                 FROM attribute_history",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("count history rows")?;

        Ok(StoreStats {
            records: count_to_usize(records)?,
            open_records: count_to_usize(open_records)?,
            entities: count_to_usize(entities)?,
        })
    }
}

fn count_to_usize(count: i64) -> Result<usize, StoreError> {
    usize::try_from(count)
        .with_context(|| format!("row count {count} out of range"))
        .map_err(StoreError::from)
}

fn date_to_sql(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn date_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    parse_date(&text)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn attribute_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<AttributeType> {
    let tag: String = row.get(idx)?;
    tag.parse()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let end_date = match row.get::<_, Option<String>>(3)? {
        Some(_) => Some(date_from_sql(row, 3)?),
        None => None,
    };
    Ok(HistoryRecord {
        entity_id: row.get(0)?,
        attribute_type: attribute_from_sql(row, 1)?,
        start_date: date_from_sql(row, 2)?,
        end_date,
        value: row.get(4)?,
    })
}
