use rusqlite::{params, params_from_iter, Row};

use super::*;
use crate::util::contains_ci;
use crate::year_tables::{YearTable, LINK_COLUMN};

impl PortalDb {
    // =========================================================================
    // Survey submissions (year-partitioned)
    // =========================================================================

    /// All rows whose organisation column(s) contain `fragment`, case-insensitively.
    ///
    /// Matching happens in Rust so non-ASCII names fold the same way as the
    /// hosted backend's `ilike`; yearly tables hold a few hundred rows.
    pub fn find_survey_rows(
        &self,
        table: &YearTable,
        fragment: &str,
    ) -> Result<Vec<DbSurveyRow>, DbError> {
        let not_null = table
            .organization_columns
            .iter()
            .map(|c| format!("{c} IS NOT NULL"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY id",
            table.select_columns().join(", "),
            table.table,
            not_null
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mapped = stmt.query_map([], |row| Self::map_survey_row(table, row))?;

        let mut rows = Vec::new();
        for row in mapped {
            let row = row?;
            if row.names.iter().any(|name| contains_ci(name, fragment)) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// The row currently linked to `user_id` in this year's table, if any.
    pub fn get_linked_survey_row(
        &self,
        table: &YearTable,
        user_id: &str,
    ) -> Result<Option<DbSurveyRow>, DbError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 ORDER BY id LIMIT 1",
            table.select_columns().join(", "),
            table.table,
            LINK_COLUMN
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![user_id], |row| Self::map_survey_row(table, row))?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_survey_row(&self, table: &YearTable, id: i64) -> Result<Option<DbSurveyRow>, DbError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            table.select_columns().join(", "),
            table.table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], |row| Self::map_survey_row(table, row))?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Rewrite a row's email and, when `user_id` is given, its identity link.
    ///
    /// Returns the number of rows changed (0 when the id does not exist).
    pub fn update_survey_row(
        &self,
        table: &YearTable,
        id: i64,
        email: &str,
        user_id: Option<&str>,
    ) -> Result<usize, DbError> {
        let changed = match user_id {
            Some(user_id) => self.conn.execute(
                &format!(
                    "UPDATE {} SET {} = ?1, {} = ?2 WHERE id = ?3",
                    table.table, table.email_column, LINK_COLUMN
                ),
                params![email, user_id, id],
            )?,
            None => self.conn.execute(
                &format!(
                    "UPDATE {} SET {} = ?1 WHERE id = ?2",
                    table.table, table.email_column
                ),
                params![email, id],
            )?,
        };
        Ok(changed)
    }

    /// Insert a submission. `names` is positional over the year's organisation columns.
    pub fn insert_survey_row(
        &self,
        table: &YearTable,
        names: &[Option<&str>],
        email: Option<&str>,
    ) -> Result<i64, DbError> {
        let columns: Vec<&str> = table
            .organization_columns
            .iter()
            .copied()
            .chain(std::iter::once(table.email_column))
            .collect();
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let values: Vec<Option<&str>> = (0..table.organization_columns.len())
            .map(|i| names.get(i).copied().flatten())
            .chain(std::iter::once(email))
            .collect();

        self.conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table.table,
                columns.join(", "),
                placeholders
            ),
            params_from_iter(values),
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn map_survey_row(table: &YearTable, row: &Row) -> rusqlite::Result<DbSurveyRow> {
        let width = table.organization_columns.len();
        let mut names = Vec::with_capacity(width);
        for i in 0..width {
            if let Some(name) = row.get::<_, Option<String>>(1 + i)? {
                if !name.trim().is_empty() {
                    names.push(name);
                }
            }
        }
        Ok(DbSurveyRow {
            id: row.get(0)?,
            names,
            email: row.get(1 + width)?,
            user_id: row.get(2 + width)?,
        })
    }
}
