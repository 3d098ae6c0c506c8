//! Keyword dictionary for the default dialect.

use std::collections::HashMap;

use super::TokenType;
use super::dialect::{BUILTIN, CTE, DCL, DDL, DML, KEYWORD};

/// Upper-case word to tag. Words not present lex as plain names.
pub type KeywordTable = HashMap<&'static str, &'static TokenType>;

const DML_WORDS: &[&str] = &["SELECT", "INSERT", "DELETE", "UPDATE", "UPSERT", "REPLACE", "MERGE"];

const DDL_WORDS: &[&str] = &["CREATE", "DROP", "ALTER", "TRUNCATE", "RENAME"];

const DCL_WORDS: &[&str] = &["GRANT", "REVOKE"];

const CTE_WORDS: &[&str] = &["WITH"];

const BUILTIN_WORDS: &[&str] = &[
    "ARRAY", "BIGINT", "BINARY", "BIT", "BLOB", "BOOLEAN", "CHAR", "CHARACTER", "DATE",
    "DATETIME", "DATETIME64", "DEC", "DECIMAL", "FLOAT", "FLOAT32", "FLOAT64", "INT", "INT8",
    "INT16", "INT32", "INT64", "INTEGER", "LONG", "NUMBER", "NUMERIC", "REAL", "SERIAL",
    "SMALLINT", "STRING", "TEXT", "TINYINT", "UINT8", "UINT16", "UINT32", "UINT64", "UUID",
    "VARCHAR", "VARCHAR2",
];

const GENERAL_WORDS: &[&str] = &[
    "ABORT", "ALL", "ALWAYS", "ANALYZE", "AND", "ANY", "AS", "ASC", "BEGIN", "BETWEEN", "BOTH",
    "BY", "CASCADE", "CASE", "CAST", "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONSTRAINT",
    "CROSS", "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DEFAULT",
    "DESC", "DISTINCT", "DO", "EACH", "ELSE", "END", "ESCAPE", "EXCEPT", "EXISTS", "EXPLAIN",
    "FALSE", "FETCH", "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL",
    "FUNCTION", "GLOBAL", "GROUP", "HAVING", "IF", "ILIKE", "IN", "INDEX", "INNER",
    "INTERSECT", "INTERVAL", "INTO", "IS", "ISNULL", "JOIN", "KEY", "LAST", "LATERAL",
    "LEADING", "LEFT", "LIKE", "LIMIT", "LOCAL", "NATURAL", "NOT", "NOTNULL", "NULL", "NULLS",
    "OFFSET", "ON", "OR", "ORDER", "OUTER", "OVER", "PARTITION", "PRECEDING", "PRIMARY",
    "RANGE", "RECURSIVE", "REFERENCES", "REGEXP", "RETURNING", "RIGHT", "ROLLBACK", "ROW",
    "ROWS", "SCHEMA", "SEQUENCE", "SET", "SETTINGS", "SOME", "TABLE", "TEMPORARY", "THEN",
    "TIES", "TO", "TOP", "TRAILING", "TRANSACTION", "TRIGGER", "TRUE", "UNBOUNDED", "UNION",
    "UNIQUE", "USING", "VALUES", "VIEW", "WHEN", "WHERE", "WINDOW", "WITHIN",
    // pipe operators
    "AGGREGATE", "EXTEND", "CALL",
];

/// All keywords of the default dialect.
pub fn all_keywords() -> KeywordTable {
    let groups: [(&[&'static str], &'static TokenType); 6] = [
        (GENERAL_WORDS, &KEYWORD),
        (BUILTIN_WORDS, &BUILTIN),
        (DML_WORDS, &DML),
        (DDL_WORDS, &DDL),
        (DCL_WORDS, &DCL),
        (CTE_WORDS, &CTE),
    ];

    groups
        .into_iter()
        .flat_map(|(words, kind)| words.iter().map(move |word| (*word, kind)))
        .collect()
}
