//! Read-only SQL guard for the forecast query gateway.
//!
//! [`validate`] is a structural/lexical filter, not a parser. It decides from
//! the text alone whether a statement may be handed to the database and
//! explains every rejection. The database connection is independently forced
//! read-only, so this layer is the first of two, never the only one.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. comments are stripped (`-- …` and `/* … */`);
//! 2. the statement must start with `SELECT` or `WITH`;
//! 3. no token may be on the keyword blocklist;
//! 4. exactly one statement;
//! 5. no exfiltration / delay function calls;
//! 6. statements touching a protected table must name columns explicitly,
//!    carry a `WHERE` and carry a literal `LIMIT`.

use once_cell::sync::Lazy;
use regex::Regex;

/// The four billion-row ensemble tables subject to the scope checks.
pub const PROTECTED_TABLES: &[&str] = &[
    "WEATHER_FORECAST_ENSEMBLE",
    "WEATHER_SEASONAL_ENSEMBLE",
    "ENERGY_BASE_ENSEMBLE",
    "ENERGY_FORECAST_ENSEMBLE",
];

/// Single-token vocabulary that never appears in a legitimate read.
///
/// `LOAD` and `IMPORT` are deliberately absent: `load` is an energy variable
/// and a common alias in this schema, and the SQL `LOAD` command can only be a
/// top-level statement, which the leading `SELECT`/`WITH` requirement already
/// blocks.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "DROP",
    "ALTER",
    "CREATE",
    "TRUNCATE",
    "GRANT",
    "REVOKE",
    "REPLACE",
    "UPSERT",
    "MERGE",
    "COPY",
    "EXECUTE",
    "EXEC",
    "CALL",
    "BEGIN",
    "COMMIT",
    "ROLLBACK",
    "SAVEPOINT",
    "LOCK",
    "VACUUM",
    "ANALYZE",
    "REINDEX",
    "CLUSTER",
    "COMMENT",
    "SECURITY",
    "REASSIGN",
    "DISCARD",
    "DO",
    "NOTIFY",
    "LISTEN",
    "UNLISTEN",
    "PREPARE",
    "DEALLOCATE",
];

/// Multi-word session-control phrases, matched across arbitrary whitespace.
static FORBIDDEN_PHRASES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("SET ROLE", r"\bSET\s+ROLE\b"),
        ("SET SESSION AUTHORIZATION", r"\bSET\s+SESSION\s+AUTHORIZATION\b"),
        ("RESET ROLE", r"\bRESET\s+ROLE\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("phrase regex")))
    .collect()
});

/// Exfiltration, remote-link and artificial-delay calls.
static DANGEROUS_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("into_outfile", r"(?i)\bINTO\s+(?:OUTFILE|DUMPFILE)\b"),
        ("load_file", r"(?i)\bLOAD_FILE\s*\("),
        ("pg_sleep", r"(?i)\bPG_SLEEP(?:_FOR|_UNTIL)?\s*\("),
        ("dblink", r"(?i)\bDBLINK(?:_[A-Z_]+)?\s*\("),
        ("pg_read_file", r"(?i)\bPG_READ_(?:BINARY_)?FILE\s*\("),
        ("pg_write_file", r"(?i)\bPG_WRITE_FILE\s*\("),
        ("pg_ls_dir", r"(?i)\bPG_LS_DIR\s*\("),
        ("lo_import", r"(?i)\bLO_IMPORT\s*\("),
        ("lo_export", r"(?i)\bLO_EXPORT\s*\("),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("dangerous pattern regex")))
    .collect()
});

static RE_LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)--.*$").expect("line comment"));
static RE_BLOCK_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment"));
static RE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z_][A-Z0-9_$]*").expect("token"));
static RE_SELECT_STAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bSELECT\s+(?:ALL\s+|DISTINCT\s+)?\*").expect("select star"));
static RE_WHERE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bWHERE\b").expect("where"));
static RE_LIMIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bLIMIT\s+\d+").expect("limit"));

/// Why a statement was refused. Every variant renders a `BLOCKED: …` message
/// suitable for feeding back to the interpreter or the end user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("BLOCKED: Only SELECT / WITH queries are allowed. No data modification permitted.")]
    NotReadOnly,
    #[error("BLOCKED: Forbidden keyword '{0}' detected. No data modification permitted.")]
    ForbiddenKeyword(String),
    #[error("BLOCKED: Multiple SQL statements are not allowed.")]
    MultipleStatements,
    #[error("BLOCKED: Potentially dangerous SQL pattern detected ({0}).")]
    DangerousPattern(&'static str),
    #[error(
        "BLOCKED: SELECT * is not permitted on forecast tables. Please select specific columns."
    )]
    SelectStar,
    #[error(
        "BLOCKED: Queries on forecast tables must include a WHERE clause to filter by \
         project_name, location, variable, and/or time range. Full table scans are not permitted."
    )]
    MissingWhere,
    #[error(
        "BLOCKED: Queries on forecast tables must include a LIMIT clause to cap the number of \
         rows returned."
    )]
    MissingLimit,
}

impl Rejection {
    /// Stable machine-readable code, used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NotReadOnly => "not_read_only",
            Rejection::ForbiddenKeyword(_) => "forbidden_keyword",
            Rejection::MultipleStatements => "multiple_statements",
            Rejection::DangerousPattern(_) => "dangerous_pattern",
            Rejection::SelectStar => "select_star",
            Rejection::MissingWhere => "missing_where",
            Rejection::MissingLimit => "missing_limit",
        }
    }

    /// True for the security checks (1-5), false for the scope checks (6).
    pub fn is_security(&self) -> bool {
        !matches!(
            self,
            Rejection::SelectStar | Rejection::MissingWhere | Rejection::MissingLimit
        )
    }
}

/// Accept (`Ok(())`) or reject with a reason.
pub type Verdict = Result<(), Rejection>;

/// Replace `--` line comments and `/* */` block comments with a single space.
///
/// Line comments go first, so a `--` inside a block comment truncates that line
/// and can leave an unterminated `/*` behind; any such residue stays visible to
/// the later checks.
pub fn strip_comments(sql: &str) -> String {
    let without_lines = RE_LINE_COMMENT.replace_all(sql, " ");
    RE_BLOCK_COMMENT.replace_all(&without_lines, " ").into_owned()
}

/// Whether the (upper-cased, comment-free) text mentions a protected table.
pub fn references_protected_table(cleaned_upper: &str) -> bool {
    PROTECTED_TABLES
        .iter()
        .any(|table| cleaned_upper.contains(table))
}

/// Run every check against `sql`. Pure: no I/O, no shared mutable state.
pub fn validate(sql: &str) -> Verdict {
    let cleaned = strip_comments(sql);
    let upper = cleaned.trim().to_uppercase();

    check_shape(&upper)?;
    check_keywords(&upper)?;
    check_single_statement(&cleaned)?;
    check_dangerous(&cleaned)?;
    if references_protected_table(&upper) {
        check_scope(&upper)?;
    }
    Ok(())
}

fn check_shape(upper: &str) -> Verdict {
    match RE_TOKEN.find(upper) {
        Some(first) if first.start() == 0 && matches!(first.as_str(), "SELECT" | "WITH") => Ok(()),
        _ => Err(Rejection::NotReadOnly),
    }
}

fn check_keywords(upper: &str) -> Verdict {
    for token in RE_TOKEN.find_iter(upper) {
        let token = token.as_str();
        if FORBIDDEN_KEYWORDS.iter().any(|kw| *kw == token) {
            return Err(Rejection::ForbiddenKeyword(token.to_string()));
        }
    }
    for (label, re) in FORBIDDEN_PHRASES.iter() {
        if re.is_match(upper) {
            return Err(Rejection::ForbiddenKeyword((*label).to_string()));
        }
    }
    Ok(())
}

fn check_single_statement(cleaned: &str) -> Verdict {
    let statements = cleaned
        .split(';')
        .filter(|part| !part.trim().is_empty())
        .count();
    if statements > 1 {
        return Err(Rejection::MultipleStatements);
    }
    Ok(())
}

fn check_dangerous(cleaned: &str) -> Verdict {
    match DANGEROUS_PATTERNS.iter().find(|(_, re)| re.is_match(cleaned)) {
        Some((label, _)) => Err(Rejection::DangerousPattern(*label)),
        None => Ok(()),
    }
}

fn check_scope(upper: &str) -> Verdict {
    if RE_SELECT_STAR.is_match(upper) {
        return Err(Rejection::SelectStar);
    }
    // Anywhere in the text, so a WHERE inside a CTE body counts.
    if !RE_WHERE.is_match(upper) {
        return Err(Rejection::MissingWhere);
    }
    if !RE_LIMIT.is_match(upper) {
        return Err(Rejection::MissingLimit);
    }
    Ok(())
}
