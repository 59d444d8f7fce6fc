//! looking up the target group and telling apart the four group schemas

use std::collections::HashSet;
use std::fmt::Display;

use ldap3::{Scope, SearchEntry};
use tracing::instrument;

use crate::directory::{attribute_values, DirectoryClient};
use crate::error::MembershipError;
use crate::filter::{any_object_class_filter, equality_filter};

/// the object classes a group entry may carry, in lookup filter order
pub const GROUP_OBJECT_CLASSES: [&str; 4] = [
    "posixGroup",
    "groupOfNames",
    "groupOfUniqueNames",
    "groupOfURLs",
];

/// the way a group stores its members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupVariant {
    /// uids in `memberUid`
    PosixGroup,
    /// DNs in `member`
    GroupOfNames,
    /// DNs in `uniqueMember`
    GroupOfUniqueNames,
    /// a `memberURL` search, membership is a property of the user entries
    GroupOfUrls,
    /// none of the above
    Unknown,
}

impl Display for GroupVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupVariant::PosixGroup => write!(f, "posixGroup"),
            GroupVariant::GroupOfNames => write!(f, "groupOfNames"),
            GroupVariant::GroupOfUniqueNames => write!(f, "groupOfUniqueNames"),
            GroupVariant::GroupOfUrls => write!(f, "groupOfURLs"),
            GroupVariant::Unknown => write!(f, "unknown"),
        }
    }
}

/// determine the [GroupVariant] from the object classes of a group entry
///
/// an entry may carry several group classes at once, the first match in the
/// order groupOfURLs, posixGroup, groupOfNames, groupOfUniqueNames wins
pub fn classify<S: AsRef<str>>(object_classes: &[S], case_insensitive: bool) -> GroupVariant {
    let classes: HashSet<String> = object_classes
        .iter()
        .map(|oc| {
            if case_insensitive {
                oc.as_ref().to_lowercase()
            } else {
                oc.as_ref().to_string()
            }
        })
        .collect();
    let has = |name: &str| {
        if case_insensitive {
            classes.contains(&name.to_lowercase())
        } else {
            classes.contains(name)
        }
    };
    if has("groupOfURLs") {
        GroupVariant::GroupOfUrls
    } else if has("posixGroup") {
        GroupVariant::PosixGroup
    } else if has("groupOfNames") {
        GroupVariant::GroupOfNames
    } else if has("groupOfUniqueNames") {
        GroupVariant::GroupOfUniqueNames
    } else {
        GroupVariant::Unknown
    }
}

/// the parts of a group entry a run needs, fetched once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDescriptor {
    /// DN of the group
    pub dn: String,
    /// all values of objectClass
    pub object_classes: Vec<String>,
    /// all values of memberURL
    pub member_urls: Vec<String>,
}

impl GroupDescriptor {
    /// the variant of this group, object class names compared case-insensitively
    pub fn variant(&self) -> GroupVariant {
        classify(&self.object_classes, true)
    }
}

impl From<SearchEntry> for GroupDescriptor {
    fn from(entry: SearchEntry) -> Self {
        let object_classes = attribute_values(&entry, "objectClass").to_vec();
        let member_urls = attribute_values(&entry, "memberURL").to_vec();
        Self {
            dn: entry.dn,
            object_classes,
            member_urls,
        }
    }
}

/// the filter matching a group by cn with any of the supported group classes
pub fn group_filter(group_name: &str) -> String {
    format!(
        "(&{}{})",
        any_object_class_filter(&GROUP_OBJECT_CLASSES),
        equality_filter("cn", group_name)
    )
}

/// find the one group named `group_name` below `group_base_dn`
#[instrument(skip(directory))]
pub async fn lookup_group<D: DirectoryClient + ?Sized>(
    directory: &mut D,
    group_base_dn: &str,
    group_name: &str,
) -> Result<GroupDescriptor, MembershipError> {
    let mut groups = directory
        .search(
            group_base_dn,
            Scope::Subtree,
            &group_filter(group_name),
            &["objectClass", "memberURL"],
        )
        .await
        .map_err(|source| MembershipError::GroupLookupFailed {
            group_name: group_name.to_string(),
            source,
        })?;
    match groups.len() {
        0 => Err(MembershipError::GroupNotFound(group_name.to_string())),
        1 => {
            let group = GroupDescriptor::from(groups.remove(0));
            tracing::debug!("Found group {} with object classes {:?}", group.dn, group.object_classes);
            Ok(group)
        }
        n => {
            tracing::debug!("Found {} groups named {}", n, group_name);
            Err(MembershipError::AmbiguousGroup(group_name.to_string()))
        }
    }
}
