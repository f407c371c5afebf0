//! Read-only SQL validation policy.
//!
//! A statement passes when, after stripping leading comments, it begins
//! with an allowed statement keyword and contains no mutating keyword
//! anywhere in its text.  The forbidden-keyword check is a plain
//! case-insensitive substring match, not token-aware: a string literal
//! containing "DROP" is rejected even inside an otherwise-safe SELECT.
//! Conservative over precise.

/// Statement types a query may start with.
pub const ALLOWED_STATEMENTS: &[&str] = &["SELECT", "PRAGMA", "EXPLAIN"];

/// Keywords that reject a query wherever they appear.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "REPLACE", "ATTACH",
    "DETACH",
];

/// Strip leading `--` line comments and `/* */` block comments.
fn strip_leading_comments(sql: &str) -> Result<&str, String> {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(idx) => after[idx + 1..].trim_start(),
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(idx) => after[idx + 2..].trim_start(),
                None => return Err("malformed comment block".into()),
            };
        } else {
            return Ok(rest);
        }
        if rest.is_empty() {
            return Ok(rest);
        }
    }
}

/// Check that a statement is read-only.  `Err` carries the rejection
/// reason shown to the caller; a rejection is a contract violation to
/// surface, not a bug.
pub fn validate(sql: &str) -> Result<(), String> {
    let cleaned = strip_leading_comments(sql.trim())?;
    if cleaned.is_empty() {
        return Err("query is empty after removing comments".into());
    }

    let upper = cleaned.to_uppercase();

    for keyword in FORBIDDEN_KEYWORDS {
        if upper.contains(keyword) {
            return Err(format!("operation not allowed: {keyword}"));
        }
    }

    if !ALLOWED_STATEMENTS.iter().any(|kw| upper.starts_with(kw)) {
        return Err(format!(
            "query must start with one of: {}",
            ALLOWED_STATEMENTS.join(", ")
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_select_passes() {
        assert!(validate("SELECT * FROM invoices").is_ok());
        assert!(validate("  select id from items  ").is_ok());
    }

    #[test]
    fn pragma_and_explain_pass() {
        assert!(validate("PRAGMA table_info(invoices)").is_ok());
        assert!(validate("EXPLAIN QUERY PLAN SELECT * FROM invoices").is_ok());
    }

    #[test]
    fn mutating_statements_rejected() {
        for sql in [
            "INSERT INTO invoices VALUES (1)",
            "update invoices set total_cents = 0",
            "DELETE FROM items",
            "DROP TABLE invoices",
            "CREATE TABLE x (id)",
        ] {
            assert!(validate(sql).is_err(), "should reject: {sql}");
        }
    }

    #[test]
    fn forbidden_keyword_anywhere_rejects() {
        // Substring match by design: even a literal containing the word.
        let sql = "SELECT * FROM invoices WHERE raw_text LIKE '%drop%'";
        assert!(validate(sql).is_err());
    }

    #[test]
    fn forbidden_keyword_rejected_regardless_of_leading_comments() {
        let sql = "-- harmless note\nSELECT 1; DROP TABLE invoices";
        assert!(validate(sql).is_err());
    }

    #[test]
    fn leading_comments_are_stripped_before_start_check() {
        assert!(validate("-- count things\nSELECT COUNT(*) FROM items").is_ok());
        assert!(validate("/* block\n comment */ SELECT 1").is_ok());
        assert!(validate("-- a\n/* b */ -- c\nSELECT 1").is_ok());
    }

    #[test]
    fn unterminated_block_comment_rejected() {
        let err = validate("/* oops SELECT 1").unwrap_err();
        assert!(err.contains("comment"));
    }

    #[test]
    fn comment_only_statement_rejected() {
        let err = validate("-- nothing here").unwrap_err();
        assert!(err.contains("empty"));
    }

    #[test]
    fn non_allowed_start_rejected() {
        let err = validate("WITH x AS (SELECT 1) SELECT * FROM x").unwrap_err();
        assert!(err.contains("must start with"));
    }
}
