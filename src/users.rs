//! resolving raw user identifiers to exactly one directory entry each

use ldap3::Scope;
use tracing::instrument;

use crate::directory::{first_attribute_value, DirectoryClient};
use crate::error::MembershipError;
use crate::filter::{any_object_class_filter, equality_filter};
use crate::model::ResolvedUser;

/// the object classes a user entry may carry
pub const USER_OBJECT_CLASSES: [&str; 2] = ["posixAccount", "inetOrgPerson"];

/// the filter matching a user by uid
pub fn user_filter(identifier: &str) -> String {
    format!(
        "(&{}{})",
        any_object_class_filter(&USER_OBJECT_CLASSES),
        equality_filter("uid", identifier)
    )
}

/// the users that were resolved and the errors for those that were not
#[derive(Debug, Default)]
pub struct UserResolution {
    /// users in input order
    pub resolved: Vec<ResolvedUser>,
    /// one error per identifier that could not be resolved
    pub errors: Vec<MembershipError>,
}

/// resolve a single identifier
async fn resolve_one<D: DirectoryClient + ?Sized>(
    directory: &mut D,
    identifier: &str,
    base_dn: &str,
) -> Result<ResolvedUser, MembershipError> {
    let mut users = directory
        .search(base_dn, Scope::Subtree, &user_filter(identifier), &["uid"])
        .await
        .map_err(|source| MembershipError::UserLookupFailed {
            identifier: identifier.to_string(),
            source,
        })?;
    match users.len() {
        0 => Err(MembershipError::UserNotFound(identifier.to_string())),
        1 => {
            let entry = users.remove(0);
            let uid = match first_attribute_value(&entry, "uid") {
                Some(uid) => uid.to_string(),
                None => {
                    tracing::debug!(
                        "User entry {} returned without uid, using identifier {}",
                        entry.dn,
                        identifier
                    );
                    identifier.to_string()
                }
            };
            Ok(ResolvedUser { uid, dn: entry.dn })
        }
        _ => Err(MembershipError::AmbiguousUser(identifier.to_string())),
    }
}

/// resolve every identifier below `base_dn`
///
/// without `continue_on_error` resolution stops at the first identifier that
/// fails, the users resolved up to that point are still returned
#[instrument(skip(directory, identifiers), fields(count = identifiers.len()))]
pub async fn resolve_users<D: DirectoryClient + ?Sized>(
    directory: &mut D,
    identifiers: &[String],
    base_dn: &str,
    continue_on_error: bool,
) -> UserResolution {
    let mut resolution = UserResolution::default();
    for identifier in identifiers {
        match resolve_one(directory, identifier, base_dn).await {
            Ok(user) => {
                tracing::debug!("Resolved {} to {}", identifier, user.dn);
                resolution.resolved.push(user);
            }
            Err(err) => {
                tracing::debug!("Could not resolve {}: {}", identifier, err);
                resolution.errors.push(err);
                if !continue_on_error {
                    break;
                }
            }
        }
    }
    resolution
}
