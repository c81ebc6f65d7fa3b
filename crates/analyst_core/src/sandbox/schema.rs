//! Schema validation over candidate code text. Column references are
//! extracted by pattern-matching the literal bracket-indexing idiom
//! (`df["col"]` / `df['col']`), not by semantic analysis; computed column
//! names that dodge this pattern are re-checked by the executor at runtime.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static COLUMN_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"df\[\s*['"]([^'"]+)['"]\s*\]"#).expect("column reference pattern")
});

#[derive(Debug, Error, PartialEq)]
#[error("unknown column(s) referenced: {}. Available columns are: {}", offending.join(", "), available.join(", "))]
pub struct UnknownColumnError {
    /// Referenced names absent from the dataset, sorted.
    pub offending: Vec<String>,
    /// The dataset's actual column names, in frame order.
    pub available: Vec<String>,
}

/// Column-name literals referenced through the dataset's indexing syntax.
pub fn extract_column_refs(code: &str) -> BTreeSet<String> {
    COLUMN_REF
        .captures_iter(code)
        .map(|c| c[1].to_string())
        .collect()
}

/// Every extracted reference must equal a real column name exactly —
/// case-sensitive, no fuzzy matching.
pub fn validate(code: &str, columns: &[String]) -> Result<(), UnknownColumnError> {
    let known: BTreeSet<&str> = columns.iter().map(|s| s.as_str()).collect();
    let offending: Vec<String> = extract_column_refs(code)
        .into_iter()
        .filter(|name| !known.contains(name.as_str()))
        .collect();
    if offending.is_empty() {
        Ok(())
    } else {
        Err(UnknownColumnError {
            offending,
            available: columns.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec!["age".to_string(), "income".to_string()]
    }

    #[test]
    fn extracts_single_and_double_quoted_references() {
        let refs = extract_column_refs("a = df[\"age\"]\nb = df['income']\n");
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec!["age".to_string(), "income".to_string()]
        );
    }

    #[test]
    fn tolerates_spaces_inside_the_brackets() {
        let refs = extract_column_refs("x = df[ \"age\" ]");
        assert!(refs.contains("age"));
    }

    #[test]
    fn known_columns_pass() {
        assert!(validate("result = df[\"age\"].mean()", &columns()).is_ok());
    }

    #[test]
    fn unknown_column_is_named_with_the_valid_list() {
        let err = validate("result = df[\"salary\"].mean()", &columns()).unwrap_err();
        assert_eq!(err.offending, vec!["salary".to_string()]);
        assert_eq!(err.available, columns());
        let msg = err.to_string();
        assert!(msg.contains("salary"));
        assert!(msg.contains("age, income"));
    }

    #[test]
    fn multiple_offenders_are_sorted() {
        let err = validate("x = df[\"z\"]\ny = df[\"a\"]\n", &columns()).unwrap_err();
        assert_eq!(err.offending, vec!["a".to_string(), "z".to_string()]);
    }

    #[test]
    fn matching_is_case_sensitive() {
        let err = validate("result = df[\"Age\"]", &columns()).unwrap_err();
        assert_eq!(err.offending, vec!["Age".to_string()]);
    }

    #[test]
    fn code_without_references_passes_vacuously() {
        assert!(validate("result = 1 + 1", &columns()).is_ok());
    }

    #[test]
    fn computed_references_are_not_extracted() {
        // Caught at runtime by the executor instead.
        let refs = extract_column_refs("name = \"age\"\nx = df[name]\n");
        assert!(refs.is_empty());
    }
}
