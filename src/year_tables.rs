//! Year-partitioned survey tables.
//!
//! Each survey year was collected with its own form, so the same concepts live
//! under different column names. Callers never branch on the year number; they
//! ask the table descriptor which columns hold the organisation name(s) and the
//! respondent email.
//!
//! Every table also carries a nullable `user_id` column linking the submission
//! to a portal identity. At most one row per table may point at any identity.

use serde::Serialize;

/// Column holding the link to a portal identity, identical in every year.
pub const LINK_COLUMN: &str = "user_id";

/// Descriptor for one year's survey table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearTable {
    pub year: u16,
    pub table: &'static str,
    /// Columns that may hold an organisation or fund name, matched with OR semantics.
    pub organization_columns: &'static [&'static str],
    pub email_column: &'static str,
}

pub const SURVEY_2021: YearTable = YearTable {
    year: 2021,
    table: "survey_responses_2021",
    organization_columns: &["firm_name"],
    email_column: "email_address",
};

pub const SURVEY_2022: YearTable = YearTable {
    year: 2022,
    table: "survey_responses_2022",
    organization_columns: &["organisation"],
    email_column: "email",
};

pub const SURVEY_2023: YearTable = YearTable {
    year: 2023,
    table: "survey_responses_2023",
    organization_columns: &["organisation_name", "fund_name"],
    email_column: "email_address",
};

pub const SURVEY_2024: YearTable = YearTable {
    year: 2024,
    table: "survey_responses_2024",
    organization_columns: &["organisation_name", "fund_name"],
    email_column: "email_address",
};

/// All survey tables, oldest first.
pub const SURVEY_TABLES: &[YearTable] = &[SURVEY_2021, SURVEY_2022, SURVEY_2023, SURVEY_2024];

/// Look up the table for a survey year.
pub fn table_for_year(year: u16) -> Option<&'static YearTable> {
    SURVEY_TABLES.iter().find(|t| t.year == year)
}

impl YearTable {
    /// Every column a search or claim needs to read from this table.
    pub fn select_columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["id"];
        columns.extend_from_slice(self.organization_columns);
        columns.push(self.email_column);
        columns.push(LINK_COLUMN);
        columns
    }
}
