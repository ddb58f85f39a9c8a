//! Datastore-neutral filter expressions and the translator that builds them
//! from validated request input.

pub mod translate;

pub use translate::{exclusion_filter, segment_filter, translate_params};

use crate::registry::{Comparison, TypedValue};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static WILDCARD_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[*?]").expect("Invalid wildcard token regex"));

/// Identifier glob using `*` (any run) and `?` (one character), anchored at
/// both ends.
#[derive(Debug, Clone)]
pub struct Wildcard {
    glob: String,
    regex: Regex,
}

impl Wildcard {
    pub fn new(glob: &str) -> common::Result<Self> {
        let body: String = glob
            .chars()
            .map(|c| match c {
                '*' => ".*".to_string(),
                '?' => ".".to_string(),
                other => regex::escape(&other.to_string()),
            })
            .collect();
        let regex = Regex::new(&format!("^{}$", body))
            .map_err(|e| common::Error::Internal(format!("wildcard {}: {}", glob, e)))?;

        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn is_wildcard(token: &str) -> bool {
        WILDCARD_TOKEN.is_match(token)
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    /// SQL `LIKE` rendering of the glob.
    pub fn to_like(&self) -> String {
        self.glob.replace('*', "%").replace('?', "_")
    }
}

impl PartialEq for Wildcard {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob
    }
}

/// Boolean filter over dotted document paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All(Vec<Filter>),
    Any(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        field: String,
        op: Comparison,
        value: TypedValue,
    },
    In {
        field: String,
        values: Vec<TypedValue>,
    },
    Matches {
        field: String,
        pattern: Wildcard,
    },
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: TypedValue) -> Self {
        Filter::Compare {
            field: field.into(),
            op: Comparison::Eq,
            value,
        }
    }

    /// Conjunction, flattening nested `All` terms.
    pub fn and(self, other: Filter) -> Filter {
        let mut terms = match self {
            Filter::All(terms) => terms,
            single => vec![single],
        };
        match other {
            Filter::All(more) => terms.extend(more),
            single => terms.push(single),
        }
        Filter::All(terms)
    }

    /// A filter with no terms matches everything.
    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::All(terms) if terms.is_empty())
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All(Vec::new())
    }
}

fn join(f: &mut fmt::Formatter<'_>, terms: &[Filter], separator: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", separator)?;
        }
        write!(f, "{}", term)?;
    }
    write!(f, ")")
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            filter if filter.is_empty() => write!(f, "TRUE"),
            Filter::All(terms) => join(f, terms, "AND"),
            Filter::Any(terms) => join(f, terms, "OR"),
            Filter::Not(inner) => write!(f, "NOT {}", inner),
            Filter::Compare { field, op, value } => {
                write!(f, "{} {} {}", field, op.symbol(), value)
            }
            Filter::In { field, values } => {
                let values: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{} IN ({})", field, values.join(", "))
            }
            Filter::Matches { field, pattern } => {
                write!(f, "{} LIKE '{}'", field, pattern.to_like())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_is_anchored() {
        let pattern = Wildcard::new("HG?").unwrap();
        assert!(pattern.is_match("HGN"));
        assert!(!pattern.is_match("HGNX"));
        assert!(!pattern.is_match("XHGN"));

        let prefix = Wildcard::new("B*").unwrap();
        assert!(prefix.is_match("BHZ"));
        assert!(prefix.is_match("B"));
        assert_eq!(prefix.to_like(), "B%");
        assert_eq!(Wildcard::new("H?Z").unwrap().to_like(), "H_Z");
    }

    #[test]
    fn test_and_flattens() {
        let a = Filter::equals("net", TypedValue::Text("NL".into()));
        let b = Filter::equals("sta", TypedValue::Text("HGN".into()));
        let c = Filter::equals("cha", TypedValue::Text("BHZ".into()));

        let merged = Filter::default().and(a.clone()).and(Filter::All(vec![b.clone(), c.clone()]));
        assert_eq!(merged, Filter::All(vec![a, b, c]));
        assert!(Filter::default().is_empty());
        assert_eq!(Filter::default().to_string(), "TRUE");
    }

    #[test]
    fn test_display() {
        let filter = Filter::All(vec![
            Filter::equals("net", TypedValue::Text("NL".into())),
            Filter::Not(Box::new(Filter::Matches {
                field: "sta".into(),
                pattern: Wildcard::new("X*").unwrap(),
            })),
        ]);
        assert_eq!(filter.to_string(), "(net = 'NL' AND NOT sta LIKE 'X%')");
    }
}
