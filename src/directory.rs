//! the directory operations a bulk membership run needs and their
//! implementation on top of an already connected [ldap3::Ldap] handle

use std::collections::HashSet;
use std::convert::TryFrom;

use async_trait::async_trait;
use ldap3::controls::RawControl;
use ldap3::{Ldap, Scope, SearchEntry};
use oid::ObjectIdentifier;
use thiserror::Error;

use crate::error::{DirectoryError, OIDError};
use crate::model::{AttributeChange, ChangeOp};

/// OID of the Permissive Modify request control
pub const PERMISSIVE_MODIFY_OID: &str = "1.2.840.113556.1.4.1413";

/// creates a Permissive Modify control object for use with ldap3
///
/// with this control the server does not fail an add of a value that is
/// already present or a delete of a value that is already absent
pub fn permissive_modify_control() -> RawControl {
    RawControl {
        ctype: PERMISSIVE_MODIFY_OID.to_string(),
        crit: false,
        val: None,
    }
}

/// error which can occur while parsing a scope
#[derive(Debug, Clone, Error)]
pub enum ScopeParserError {
    /// could not parse the value as a scope
    #[error("Could not parse {0} as an ldap scope")]
    CouldNotParseAsScope(String),
}

/// parse an [ldap3::Scope] from the string one would specify to use the same
/// scope with OpenLDAP's ldapsearch -s parameter or in an LDAP URL
pub fn parse_scope(src: &str) -> Result<Scope, ScopeParserError> {
    match src {
        "base" => Ok(Scope::Base),
        "one" => Ok(Scope::OneLevel),
        "sub" => Ok(Scope::Subtree),
        s => Err(ScopeParserError::CouldNotParseAsScope(s.to_string())),
    }
}

/// look up the values of an attribute in a search entry
///
/// attribute names are case-insensitive in LDAP and servers return them in
/// the spelling of their schema, not the one used in the request
pub fn attribute_values<'a>(entry: &'a SearchEntry, attribute: &str) -> &'a [String] {
    entry
        .attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
        .map(|(_, values)| values.as_slice())
        .unwrap_or(&[])
}

/// the first value of an attribute in a search entry, if any
pub fn first_attribute_value<'a>(entry: &'a SearchEntry, attribute: &str) -> Option<&'a str> {
    attribute_values(entry, attribute)
        .first()
        .map(String::as_str)
}

/// the directory operations used by a bulk membership run
///
/// an implementation represents one server with an established, bound
/// session; opening and closing it is up to the caller
#[async_trait]
pub trait DirectoryClient: Send {
    /// search below `base` and return all entries matching `filter`
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, DirectoryError>;

    /// apply all changes to `dn` in a single modify operation
    async fn modify(
        &mut self,
        dn: &str,
        changes: &[AttributeChange],
        controls: Vec<RawControl>,
    ) -> Result<(), DirectoryError>;

    /// whether the server announces support for the control with this OID
    async fn is_control_supported(&mut self, oid: &str) -> Result<bool, DirectoryError>;
}

/// convert changes into one [ldap3::Mod] each, keeping their order
pub fn changes_as_mods(changes: &[AttributeChange]) -> Vec<ldap3::Mod<String>> {
    changes
        .iter()
        .map(|change| {
            let values = HashSet::from([change.value.to_owned()]);
            match change.op {
                ChangeOp::Add => ldap3::Mod::Add(change.attribute.to_owned(), values),
                ChangeOp::Delete => ldap3::Mod::Delete(change.attribute.to_owned(), values),
            }
        })
        .collect()
}

/// perform an LDAP search via ldap3, logging a proper error message if it fails
pub async fn ldap_search(
    ldap: &mut Ldap,
    base: &str,
    scope: Scope,
    filter: &str,
    attrs: Vec<String>,
) -> Result<Vec<SearchEntry>, DirectoryError> {
    let adapter: ldap3::adapters::PagedResults<String, Vec<String>> =
        ldap3::adapters::PagedResults::new(100);
    let mut search_stream = ldap
        .streaming_search_with(adapter, base, scope, filter, attrs.clone())
        .await?;
    let mut rs = Vec::new();
    loop {
        match search_stream.next().await {
            Ok(None) => {
                let res = search_stream.finish().await;
                if res.rc != 0 {
                    tracing::debug!(
                        "Non-zero return code {} in LDAP query\n  base: {}\n  scope: {:?}\n  filter: {}\n  attrs: {:#?}",
                        res.rc,
                        base,
                        scope,
                        filter,
                        attrs
                    );
                    log_equivalent_ldapsearch(base, scope, filter, &attrs);
                    break Err(DirectoryError::ResultCode {
                        rc: res.rc,
                        text: res.text,
                    });
                }
                break Ok(rs.into_iter().map(SearchEntry::construct).collect());
            }
            Ok(Some(value)) => {
                rs.push(value);
            }
            Err(err) => {
                tracing::debug!(
                    "Error {} in LDAP query after {} results\n  base: {}\n  scope: {:?}\n  filter: {}\n  attrs: {:#?}",
                    err,
                    rs.len(),
                    base,
                    scope,
                    filter,
                    attrs
                );
                log_equivalent_ldapsearch(base, scope, filter, &attrs);
                break Err(err.into());
            }
        }
    }
}

/// log the ldapsearch command line that reproduces a failed query
fn log_equivalent_ldapsearch(base: &str, scope: Scope, filter: &str, attrs: &[String]) {
    tracing::debug!(
        "ldapsearch -Q -LLL -E pr=100/noprompt -o ldif-wrap=no -b '{}' -s {} '{}' {}",
        base,
        format!("{:?}", scope).to_lowercase(),
        filter,
        itertools::join(attrs.iter(), " ")
    );
}

/// retrieve the OIDs of all controls the server lists in its RootDSE
pub async fn query_supported_controls(
    ldap: &mut Ldap,
) -> Result<Vec<ObjectIdentifier>, DirectoryError> {
    let entries = ldap_search(
        ldap,
        "",
        Scope::Base,
        "(objectClass=*)",
        vec!["supportedControl".to_string()],
    )
    .await?;
    let mut supported_controls = Vec::new();
    for entry in &entries {
        for value in attribute_values(entry, "supportedControl") {
            supported_controls
                .push(ObjectIdentifier::try_from(value.as_str()).map_err(OIDError)?);
        }
    }
    Ok(supported_controls)
}

#[async_trait]
impl DirectoryClient for Ldap {
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, DirectoryError> {
        ldap_search(
            self,
            base,
            scope,
            filter,
            attrs.iter().map(|a| a.to_string()).collect(),
        )
        .await
    }

    async fn modify(
        &mut self,
        dn: &str,
        changes: &[AttributeChange],
        controls: Vec<RawControl>,
    ) -> Result<(), DirectoryError> {
        tracing::debug!(
            "Modifying LDAP entry at {} with modifications\n{:#?}\nand controls\n{:#?}",
            dn,
            changes,
            controls
        );
        let result = self
            .with_controls(controls)
            .modify(dn, changes_as_mods(changes))
            .await?;
        if result.rc != 0 {
            return Err(DirectoryError::ResultCode {
                rc: result.rc,
                text: result.text,
            });
        }
        Ok(())
    }

    async fn is_control_supported(&mut self, oid: &str) -> Result<bool, DirectoryError> {
        let wanted = ObjectIdentifier::try_from(oid).map_err(OIDError)?;
        let supported = query_supported_controls(self).await?;
        Ok(supported.contains(&wanted))
    }
}
