//! turning the memberURL of a groupOfURLs into attribute values that make a
//! user match the group's search filter
//!
//! Only a deliberately small part of the filter grammar is understood: a flat
//! list of `(attribute=value)` clauses, optionally wrapped in one `(&...)` or
//! one pair of parentheses. Anything using `|`, `!` or a nested `&` is
//! rejected, as are clauses with other match types (`>=`, `<=`, `~=`, `:=`).
//! Assertion values are written in decoded form, `(department=R\26D)` puts
//! `R&D` on the user entry.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::instrument;
use url::Url;

use crate::directory::parse_scope;
use crate::error::{ConstraintViolation, MembershipError};
use crate::filter::unescape_filter_value;
use crate::group::GroupDescriptor;
use crate::model::AttributeValuePair;

/// filter used by LDAP URLs without a filter component (RFC 4516)
pub const DEFAULT_URL_FILTER: &str = "(objectClass=*)";

/// attributes that identify the user itself and must never be written
const FORBIDDEN_ATTRIBUTES: [&str; 2] = ["uid", "cn"];

/// the filter component of an LDAP URL, percent-decoded
///
/// `ldap://host/base?attributes?scope?filter?extensions`, a scope other
/// than base, one or sub makes the URL invalid
///
/// LDAP URLs have no fragment, so the components are split off the raw
/// value and a `#` stored unencoded in the filter stays part of it
pub fn member_url_filter(member_url: &str) -> Result<String, MembershipError> {
    let invalid = |reason: String| MembershipError::InvalidMemberUrl {
        url: member_url.to_string(),
        reason,
    };
    let url = Url::parse(member_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "ldap" | "ldaps" | "ldapi") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    let components: Vec<&str> = member_url
        .split_once('?')
        .map(|(_, query)| query.split('?').collect())
        .unwrap_or_default();
    if let Some(scope) = components.get(1).filter(|scope| !scope.is_empty()) {
        parse_scope(scope).map_err(|e| invalid(e.to_string()))?;
    }
    let filter = components.get(2).copied().unwrap_or_default();
    let filter = urlencoding::decode(filter).map_err(|e| invalid(e.to_string()))?;
    let filter = filter.trim();
    if filter.is_empty() {
        Ok(DEFAULT_URL_FILTER.to_string())
    } else {
        Ok(filter.to_string())
    }
}

/// the clauses found in a memberURL filter, split into the ones that are
/// candidates for modification and the ones that were dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterExtraction {
    /// clauses that could be written to user entries
    pub candidates: Vec<AttributeValuePair>,
    /// substring clauses like `(department=Eng*)`; presence clauses like
    /// `(objectClass=*)` and uid/cn clauses are dropped without a trace
    pub wildcard_clauses: Vec<AttributeValuePair>,
}

/// remove one outer `(&...)` or `(...)` from the filter
///
/// a lone `(attribute=value)` is left alone, it is its own clause
fn strip_outer_wrapper(filter: &str) -> &str {
    let filter = filter.trim();
    if let Some(inner) = filter.strip_prefix("(&").and_then(|f| f.strip_suffix(')')) {
        inner
    } else if let Some(inner) = filter
        .strip_prefix('(')
        .and_then(|f| f.strip_suffix(')'))
        .filter(|inner| inner.starts_with('('))
    {
        inner
    } else {
        filter
    }
}

/// whether the attribute is one of the forbidden ones
fn is_forbidden_attribute(attribute: &str) -> bool {
    FORBIDDEN_ATTRIBUTES
        .iter()
        .any(|forbidden| attribute.eq_ignore_ascii_case(forbidden))
}

/// scan a memberURL filter for `(attribute=value)` clauses
///
/// uid and cn clauses and clauses with a `*` in the value are not candidates,
/// the values of the other clauses are decoded
pub fn extract_attribute_pairs(filter: &str) -> Result<FilterExtraction, MembershipError> {
    lazy_static! {
        static ref CLAUSE_RE: Regex = Regex::new(r"\(([^=]+)=([^)]+)\)").unwrap();
        static ref ATTRIBUTE_RE: Regex =
            Regex::new(r"^([A-Za-z][A-Za-z0-9-]*|[0-9]+(\.[0-9]+)*)(;[A-Za-z0-9-]+)*$").unwrap();
    }
    let inner = strip_outer_wrapper(filter);
    if inner.starts_with(|c: char| matches!(c, '|' | '!' | '&'))
        || ["(|", "(!", "(&"].iter().any(|op| inner.contains(op))
    {
        return Err(MembershipError::UnsupportedMemberUrlFilter(
            filter.to_string(),
        ));
    }
    let mut extraction = FilterExtraction::default();
    for caps in CLAUSE_RE.captures_iter(inner) {
        let attribute = caps[1].trim();
        let value = caps[2].trim();
        if !ATTRIBUTE_RE.is_match(attribute) {
            return Err(MembershipError::UnsupportedMemberUrlFilter(
                filter.to_string(),
            ));
        }
        if is_forbidden_attribute(attribute) {
            tracing::debug!("Dropping {}={} from memberURL filter", attribute, value);
        } else if value.contains('*') {
            tracing::debug!("Dropping wildcard clause {}={}", attribute, value);
            if value != "*" {
                extraction
                    .wildcard_clauses
                    .push(AttributeValuePair::new(attribute, value));
            }
        } else {
            let value = unescape_filter_value(value).ok_or_else(|| {
                MembershipError::UnsupportedMemberUrlFilter(filter.to_string())
            })?;
            extraction
                .candidates
                .push(AttributeValuePair::new(attribute, value));
        }
    }
    Ok(extraction)
}

/// check the extracted clauses against the dynamic group constraints
///
/// the candidates are checked for uid/cn and wildcards again even though
/// extraction already keeps those out
pub fn validate_extraction(
    extraction: FilterExtraction,
    filter: &str,
) -> Result<Vec<AttributeValuePair>, MembershipError> {
    for pair in &extraction.candidates {
        if is_forbidden_attribute(&pair.attribute) {
            return Err(ConstraintViolation::ForbiddenAttribute(pair.attribute.to_owned()).into());
        }
        if pair.value.contains('*') {
            return Err(ConstraintViolation::WildcardValue(pair.value.to_owned()).into());
        }
    }
    if let Some(pair) = extraction.wildcard_clauses.first() {
        return Err(ConstraintViolation::WildcardValue(pair.value.to_owned()).into());
    }
    if extraction.candidates.is_empty() {
        return Err(MembershipError::NoModifiableAttributes(filter.to_string()));
    }
    Ok(extraction.candidates)
}

/// determine the attribute values to write to (or remove from) user entries
/// for a groupOfURLs
#[instrument(skip(group), fields(group = %group.dn))]
pub fn resolve_dynamic_pairs(
    group: &GroupDescriptor,
) -> Result<Vec<AttributeValuePair>, MembershipError> {
    let member_url = match group.member_urls.as_slice() {
        [] => return Err(MembershipError::MissingMemberUrl),
        [member_url] => member_url,
        member_urls => return Err(MembershipError::AmbiguousMemberUrl(member_urls.len())),
    };
    let filter = member_url_filter(member_url)?;
    tracing::debug!("memberURL filter of {} is {}", group.dn, filter);
    let extraction = extract_attribute_pairs(&filter)?;
    validate_extraction(extraction, &filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_with_urls(urls: &[&str]) -> GroupDescriptor {
        GroupDescriptor {
            dn: "cn=engineers,ou=groups,dc=example,dc=com".to_string(),
            object_classes: vec!["groupOfURLs".to_string()],
            member_urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn filter_is_taken_from_the_fourth_component() {
        assert_eq!(
            member_url_filter("ldap:///ou=people,dc=example,dc=com??sub?(department=Engineering)")
                .unwrap(),
            "(department=Engineering)"
        );
        assert_eq!(
            member_url_filter(
                "ldap://ldap.example.com:389/ou=people,dc=example,dc=com?uid,cn?one?(&(l=Berlin)(ou=Dev))"
            )
            .unwrap(),
            "(&(l=Berlin)(ou=Dev))"
        );
    }

    #[test]
    fn filter_is_percent_decoded() {
        assert_eq!(
            member_url_filter("ldap:///dc=example,dc=com??sub?(department=Research%20and%20Development)")
                .unwrap(),
            "(department=Research and Development)"
        );
    }

    #[test]
    fn missing_filter_defaults_to_presence_of_object_class() {
        assert_eq!(
            member_url_filter("ldap:///dc=example,dc=com??sub").unwrap(),
            DEFAULT_URL_FILTER
        );
        assert_eq!(
            member_url_filter("ldap:///dc=example,dc=com").unwrap(),
            DEFAULT_URL_FILTER
        );
    }

    #[test]
    fn unencoded_hash_stays_in_the_filter() {
        assert_eq!(
            member_url_filter("ldap:///ou=people,dc=example,dc=com??sub?(description=Team #1)")
                .unwrap(),
            "(description=Team #1)"
        );
        assert_eq!(
            member_url_filter("ldap:///ou=people,dc=example,dc=com??sub?(&(l=Berlin)(roomNumber=#12))")
                .unwrap(),
            "(&(l=Berlin)(roomNumber=#12))"
        );
        assert_eq!(
            member_url_filter("ldap:///ou=people,dc=example,dc=com??sub?(description=Team%20%231)")
                .unwrap(),
            "(description=Team #1)"
        );
        assert_eq!(
            resolve_dynamic_pairs(&group_with_urls(&[
                "ldap:///ou=people,dc=example,dc=com??sub?(&(l=Berlin)(roomNumber=#12))"
            ]))
            .unwrap(),
            vec![
                AttributeValuePair::new("l", "Berlin"),
                AttributeValuePair::new("roomNumber", "#12"),
            ]
        );
    }

    #[test]
    fn escaped_values_are_decoded() {
        let extraction =
            extract_attribute_pairs("(&(department=R\\26D)(description=\\28temp\\29))").unwrap();
        assert_eq!(
            extraction.candidates,
            vec![
                AttributeValuePair::new("department", "R&D"),
                AttributeValuePair::new("description", "(temp)"),
            ]
        );
        assert!(matches!(
            extract_attribute_pairs("(department=R\\2)"),
            Err(MembershipError::UnsupportedMemberUrlFilter(_))
        ));
    }

    #[test]
    fn bad_scope_is_rejected() {
        assert!(matches!(
            member_url_filter("ldap:///dc=example,dc=com??children?(l=Berlin)"),
            Err(MembershipError::InvalidMemberUrl { reason, .. }) if reason.contains("children")
        ));
    }

    #[test]
    fn non_ldap_urls_are_rejected() {
        assert!(matches!(
            member_url_filter("https://example.com/?a?b?(x=y)"),
            Err(MembershipError::InvalidMemberUrl { .. })
        ));
        assert!(matches!(
            member_url_filter("not a url"),
            Err(MembershipError::InvalidMemberUrl { .. })
        ));
    }

    #[test]
    fn uid_is_dropped_during_extraction() {
        let extraction = extract_attribute_pairs("(&(uid=x)(department=Eng))").unwrap();
        assert_eq!(
            extraction.candidates,
            vec![AttributeValuePair::new("department", "Eng")]
        );
        assert!(extraction.wildcard_clauses.is_empty());
        assert_eq!(
            validate_extraction(extraction, "(&(uid=x)(department=Eng))").unwrap(),
            vec![AttributeValuePair::new("department", "Eng")]
        );
    }

    #[test]
    fn cn_is_dropped_case_insensitively() {
        let extraction = extract_attribute_pairs("(&(CN=bob)(objectClass=person)(l=Berlin))").unwrap();
        assert_eq!(
            extraction.candidates,
            vec![
                AttributeValuePair::new("objectClass", "person"),
                AttributeValuePair::new("l", "Berlin"),
            ]
        );
    }

    #[test]
    fn substring_wildcard_is_a_constraint_violation() {
        let extraction = extract_attribute_pairs("(department=Eng*)").unwrap();
        assert!(extraction.candidates.is_empty());
        assert!(matches!(
            validate_extraction(extraction, "(department=Eng*)"),
            Err(MembershipError::DynamicGroupConstraintViolation(
                ConstraintViolation::WildcardValue(v)
            )) if v == "Eng*"
        ));
    }

    #[test]
    fn presence_clause_is_silently_ignored() {
        let pairs = validate_extraction(
            extract_attribute_pairs("(&(objectClass=*)(employeeType=contractor))").unwrap(),
            "(&(objectClass=*)(employeeType=contractor))",
        )
        .unwrap();
        assert_eq!(pairs, vec![AttributeValuePair::new("employeeType", "contractor")]);
    }

    #[test]
    fn nothing_modifiable() {
        assert!(matches!(
            validate_extraction(
                extract_attribute_pairs(DEFAULT_URL_FILTER).unwrap(),
                DEFAULT_URL_FILTER
            ),
            Err(MembershipError::NoModifiableAttributes(f)) if f == DEFAULT_URL_FILTER
        ));
        assert!(matches!(
            validate_extraction(extract_attribute_pairs("(uid=alice)").unwrap(), "(uid=alice)"),
            Err(MembershipError::NoModifiableAttributes(_))
        ));
    }

    #[test]
    fn forbidden_candidates_are_caught_by_validation() {
        let extraction = FilterExtraction {
            candidates: vec![
                AttributeValuePair::new("department", "Eng"),
                AttributeValuePair::new("Uid", "x"),
            ],
            wildcard_clauses: vec![],
        };
        assert!(matches!(
            validate_extraction(extraction, "(&(department=Eng)(Uid=x))"),
            Err(MembershipError::DynamicGroupConstraintViolation(
                ConstraintViolation::ForbiddenAttribute(a)
            )) if a == "Uid"
        ));
    }

    #[test]
    fn or_and_not_filters_are_flagged() {
        for filter in [
            "(|(department=Eng)(department=Ops))",
            "(!(department=Eng))",
            "(&(|(l=Berlin)(l=Bonn))(department=Eng))",
            "(&(department=Eng)(!(l=Bonn)))",
        ] {
            assert!(
                matches!(
                    extract_attribute_pairs(filter),
                    Err(MembershipError::UnsupportedMemberUrlFilter(_))
                ),
                "{} should be rejected",
                filter
            );
        }
    }

    #[test]
    fn other_match_types_are_flagged() {
        assert!(matches!(
            extract_attribute_pairs("(&(department=Eng)(employeeNumber>=100))"),
            Err(MembershipError::UnsupportedMemberUrlFilter(_))
        ));
    }

    #[test]
    fn member_url_count() {
        assert!(matches!(
            resolve_dynamic_pairs(&group_with_urls(&[])),
            Err(MembershipError::MissingMemberUrl)
        ));
        assert!(matches!(
            resolve_dynamic_pairs(&group_with_urls(&[
                "ldap:///dc=example,dc=com??sub?(l=Berlin)",
                "ldap:///dc=example,dc=com??sub?(l=Bonn)",
            ])),
            Err(MembershipError::AmbiguousMemberUrl(2))
        ));
        assert_eq!(
            resolve_dynamic_pairs(&group_with_urls(&[
                "ldap:///ou=people,dc=example,dc=com??sub?(department=Engineering)"
            ]))
            .unwrap(),
            vec![AttributeValuePair::new("department", "Engineering")]
        );
    }
}
