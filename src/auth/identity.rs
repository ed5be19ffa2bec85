//! Identity matching
//!
//! Sources are evaluated in declared order and the first match wins. A
//! pattern that fails to compile is a broken rule and is reported as such,
//! never treated as "does not match".

use regex::Regex;
use tracing::debug;

use crate::error::RouteError;
use crate::rules::{RuleDocument, SourceIdentity};

/// Does `username` satisfy this source identity?
///
/// Patterns use `regex` search semantics: anchor with `^...$` for a
/// full-string match.
pub fn identity_matches(source: &SourceIdentity, username: &str) -> Result<bool, RouteError> {
    if !source.username_is_pattern {
        return Ok(source.username == username);
    }

    let pattern = Regex::new(&source.username).map_err(|e| {
        RouteError::InvalidRule(format!(
            "invalid username pattern {:?}: {}",
            source.username, e
        ))
    })?;
    Ok(pattern.is_match(username))
}

/// Every source identity matching `username`, in declared order.
///
/// Iteration yields an error for the first malformed entry reached.
pub fn matching_identities<'a>(
    username: &'a str,
    document: &'a RuleDocument,
) -> impl Iterator<Item = Result<&'a SourceIdentity, RouteError>> + 'a {
    document
        .sources
        .iter()
        .filter_map(move |source| match identity_matches(source, username) {
            Ok(true) => Some(Ok(source)),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        })
}

/// First source identity matching `username`.
pub fn match_identity<'a>(
    username: &str,
    document: &'a RuleDocument,
) -> Result<&'a SourceIdentity, RouteError> {
    for (index, source) in document.sources.iter().enumerate() {
        if identity_matches(source, username)? {
            debug!(
                "User {} matched source #{} of rule document {}",
                username, index, document.id
            );
            return Ok(source);
        }
    }

    Err(RouteError::NotFound(format!(
        "cannot find a matching document for username [{}]",
        username
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::DestinationDescriptor;

    fn doc(sources: Vec<SourceIdentity>) -> RuleDocument {
        RuleDocument {
            id: "rules".into(),
            sources,
            destination: DestinationDescriptor::default(),
        }
    }

    #[test]
    fn test_exact_match_is_byte_equal() {
        let source = SourceIdentity::exact("alice");
        assert!(identity_matches(&source, "alice").unwrap());
        assert!(!identity_matches(&source, "Alice").unwrap());
        assert!(!identity_matches(&source, "alice ").unwrap());
        assert!(!identity_matches(&source, "alic").unwrap());
    }

    #[test]
    fn test_exact_match_ignores_regex_metacharacters() {
        let source = SourceIdentity::exact("ci-.*");
        assert!(!identity_matches(&source, "ci-build").unwrap());
        assert!(identity_matches(&source, "ci-.*").unwrap());
    }

    #[test]
    fn test_pattern_match() {
        let source = SourceIdentity::pattern("^admin-.*$");
        assert!(identity_matches(&source, "admin-joe").unwrap());
        assert!(!identity_matches(&source, "joe-admin").unwrap());
    }

    #[test]
    fn test_unanchored_pattern_searches() {
        let source = SourceIdentity::pattern("admin");
        assert!(identity_matches(&source, "joe-admin").unwrap());
    }

    #[test]
    fn test_malformed_pattern_is_invalid_rule() {
        let source = SourceIdentity::pattern("^(admin");
        assert!(matches!(
            identity_matches(&source, "admin"),
            Err(RouteError::InvalidRule(_))
        ));
    }

    #[test]
    fn test_first_match_wins() {
        let document = doc(vec![
            SourceIdentity::exact("bob"),
            SourceIdentity::pattern("^ali"),
            SourceIdentity::exact("alice"),
        ]);
        let matched = match_identity("alice", &document).unwrap();
        assert!(matched.username_is_pattern);
        assert_eq!(matched.username, "^ali");

        let all: Vec<_> = matching_identities("alice", &document)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].username, "alice");
    }

    #[test]
    fn test_no_match_is_not_found() {
        let document = doc(vec![SourceIdentity::exact("alice")]);
        assert!(matches!(
            match_identity("bob", &document),
            Err(RouteError::NotFound(_))
        ));
        assert!(matches!(
            match_identity("bob", &doc(vec![])),
            Err(RouteError::NotFound(_))
        ));
    }

    #[test]
    fn test_malformed_entry_before_match_surfaces() {
        let document = doc(vec![
            SourceIdentity::pattern("[unclosed"),
            SourceIdentity::exact("alice"),
        ]);
        assert!(matches!(
            match_identity("alice", &document),
            Err(RouteError::InvalidRule(_))
        ));
    }
}
