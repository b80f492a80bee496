//! IAM clause patterns.
//!
//! Action and resource clauses use shell-style wildcards:
//! - `*` matches any run of characters, including none
//! - `?` matches exactly one character
//!
//! Everything else is literal. Matching covers the whole value and ignores
//! case, as AWS does for actions and ARNs.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer};

use crate::error::{CartographyError, CartographyResult};

/// A compiled action/resource pattern.
#[derive(Debug, Clone)]
pub struct Clause {
    source: String,
    regex: Regex,
}

impl Clause {
    /// Compile a wildcard pattern.
    pub fn compile(pattern: &str) -> CartographyResult<Self> {
        let regex = RegexBuilder::new(&translate(pattern))
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| CartographyError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Check whether the whole `value` matches this clause.
    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    /// The pattern as written in the policy.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Clause {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Clause {}

impl<'de> Deserialize<'de> for Clause {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Clause::compile(&raw).map_err(serde::de::Error::custom)
    }
}

/// Evaluate a single pattern against a value.
pub fn evaluate_clause(clause: &Clause, value: &str) -> bool {
    clause.matches(value)
}

/// Translate a wildcard pattern into an anchored regular expression.
fn translate(pattern: &str) -> String {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    let mut literal = String::new();

    for ch in pattern.chars() {
        match ch {
            '*' | '?' => {
                expr.push_str(&regex::escape(&literal));
                literal.clear();
                expr.push_str(if ch == '*' { ".*" } else { "." });
            }
            _ => literal.push(ch),
        }
    }

    expr.push_str(&regex::escape(&literal));
    expr.push('$');
    expr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(p: &str) -> Clause {
        Clause::compile(p).unwrap()
    }

    #[test]
    fn test_exact_match_ignores_case() {
        assert!(clause("s3:GetObject").matches("S3:GETOBJECT"));
        assert!(!clause("s3:GetObject").matches("s3:GetObjectAcl"));
    }

    #[test]
    fn test_star_wildcard() {
        assert!(clause("s3:*").matches("s3:PutObject"));
        assert!(clause("*").matches("dynamodb:Query"));
        assert!(clause("s3:Get*").matches("s3:Get"));
        assert!(!clause("s3:Get*").matches("ec2:GetConsoleOutput"));
        assert!(clause("arn:aws:s3:::bucket/*").matches("arn:aws:s3:::bucket/a/b/c"));
    }

    #[test]
    fn test_question_mark_matches_one_char() {
        assert!(clause("s3:Get?bject").matches("s3:GetObject"));
        assert!(!clause("s3:Get?bject").matches("s3:GetObbject"));
        assert!(!clause("s3:Get?bject").matches("s3:Getbject"));
    }

    #[test]
    fn test_dots_and_regex_chars_are_literal() {
        assert!(clause("arn:aws:s3:::my.bucket").matches("arn:aws:s3:::my.bucket"));
        assert!(!clause("arn:aws:s3:::my.bucket").matches("arn:aws:s3:::myxbucket"));
        assert!(clause("arn:aws:s3:::a+b(c)").matches("arn:aws:s3:::a+b(c)"));
        assert!(!clause("arn:aws:s3:::a+b").matches("arn:aws:s3:::aab"));
    }

    #[test]
    fn test_match_is_anchored() {
        assert!(!clause("GetObject").matches("s3:GetObject"));
        assert!(!clause("s3:Get").matches("s3:GetObject"));
    }

    #[test]
    fn test_deserialize() {
        let parsed: Vec<Clause> = serde_json::from_str(r#"["s3:*", "iam:Get?"]"#).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].as_str(), "iam:Get?");
        assert!(parsed[0].matches("s3:ListBucket"));
    }
}
