//! Row reshaping between the source's dynamic typing and the destination's
//! declared schema.
//!
//! SQLite stores booleans as integers; the destination declares real boolean
//! columns for a known set of tables. [`convert_page`] strips the leading
//! rowid column the reader prepends and coerces those columns so a value of
//! any integer magnitude lands as plain true/false.

use crate::source::SourcePage;
use crate::value::SqlValue;

/// Columns declared boolean in the destination schema, per table. Every
/// other column passes through untouched.
const BOOLEAN_COLUMNS: &[(&str, &[&str])] = &[
    ("events", &["processed", "outlier"]),
    ("rooms", &["is_public"]),
    ("event_edges", &["is_state"]),
    ("presence_list", &["accepted"]),
];

/// Boolean columns for `table`, empty for tables with none.
fn boolean_columns(table: &str) -> &'static [&'static str] {
    BOOLEAN_COLUMNS
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, cols)| *cols)
        .unwrap_or(&[])
}

/// Convert a raw source page into destination-shaped columns and rows.
///
/// Returns the column headers without the rowid and the rows with the rowid
/// value dropped and boolean columns coerced.
pub fn convert_page(table: &str, page: &SourcePage) -> (Vec<String>, Vec<Vec<SqlValue>>) {
    // The reader selects rowid first; everything after it is table data.
    let headers: Vec<String> = page.headers.iter().skip(1).cloned().collect();

    let bool_cols = boolean_columns(table);
    let bool_idx: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| bool_cols.contains(&name.as_str()))
        .map(|(idx, _)| idx)
        .collect();

    let rows = page
        .rows
        .iter()
        .map(|row| {
            let mut out: Vec<SqlValue> = row.iter().skip(1).cloned().collect();
            for &idx in &bool_idx {
                out[idx] = coerce_bool(&out[idx]);
            }
            out
        })
        .collect();

    (headers, rows)
}

fn coerce_bool(value: &SqlValue) -> SqlValue {
    match value {
        SqlValue::Null => SqlValue::Null,
        other => SqlValue::Bool(other.is_truthy()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(headers: &[&str], rows: Vec<Vec<SqlValue>>) -> SourcePage {
        SourcePage {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
            last_rowid: None,
        }
    }

    #[test]
    fn drops_rowid_column() {
        let page = page(
            &["rowid", "room_id", "creator"],
            vec![vec![
                SqlValue::Integer(7),
                SqlValue::Text("!a:x".into()),
                SqlValue::Text("@u:x".into()),
            ]],
        );
        let (headers, rows) = convert_page("room_memberships", &page);
        assert_eq!(headers, vec!["room_id", "creator"]);
        assert_eq!(
            rows,
            vec![vec![
                SqlValue::Text("!a:x".into()),
                SqlValue::Text("@u:x".into())
            ]]
        );
    }

    #[test]
    fn coerces_declared_boolean_columns() {
        let page = page(
            &["rowid", "room_id", "is_public"],
            vec![
                vec![
                    SqlValue::Integer(1),
                    SqlValue::Text("!a:x".into()),
                    SqlValue::Integer(0),
                ],
                vec![
                    SqlValue::Integer(2),
                    SqlValue::Text("!b:x".into()),
                    SqlValue::Integer(5),
                ],
            ],
        );
        let (_, rows) = convert_page("rooms", &page);
        assert_eq!(rows[0][1], SqlValue::Bool(false));
        assert_eq!(rows[1][1], SqlValue::Bool(true));
    }

    #[test]
    fn null_stays_null_in_boolean_columns() {
        let page = page(
            &["rowid", "room_id", "is_public"],
            vec![vec![
                SqlValue::Integer(1),
                SqlValue::Text("!a:x".into()),
                SqlValue::Null,
            ]],
        );
        let (_, rows) = convert_page("rooms", &page);
        assert_eq!(rows[0][1], SqlValue::Null);
    }

    #[test]
    fn leaves_undeclared_tables_alone() {
        let page = page(
            &["rowid", "is_public"],
            vec![vec![SqlValue::Integer(1), SqlValue::Integer(1)]],
        );
        let (_, rows) = convert_page("profiles", &page);
        assert_eq!(rows[0][0], SqlValue::Integer(1));
    }
}
