use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get a nullable text column, treating NULL as empty.
pub fn get_text_or_empty(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<String, StoreError> {
    get::<Option<String>>(row, idx, table, column).map(Option::unwrap_or_default)
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatroom_core::MessageKind;

    #[test]
    fn parse_enum_success() {
        let kind: MessageKind = parse_enum("leave", "messages", "type").unwrap();
        assert_eq!(kind, MessageKind::Leave);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<MessageKind, _> = parse_enum("INVALID", "messages", "type");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "messages", column: "type", .. })
        ));
    }

    #[test]
    fn parse_timestamp_accepts_offsets() {
        let ts = parse_timestamp("2026-01-02T04:04:05+01:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-02T03:04:05+00:00");
    }

    #[test]
    fn parse_timestamp_rejects_sqlite_default_format() {
        assert!(parse_timestamp("2026-01-02 03:04:05").is_none());
    }
}
