//! error types for directory access and for the bulk membership run

use std::fmt::Display;

use thiserror::Error;

use crate::group::GroupVariant;

/// an error type in case parsing an OID fails when reading the supported
/// controls from the RootDSE
#[derive(Debug)]
pub struct OIDError(pub oid::ObjectIdentifierError);

impl Display for OIDError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error parsing OID: {:?}", self.0)
    }
}

impl std::error::Error for OIDError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// an error reported by the directory client (search, modify, RootDSE lookup)
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// an error in the ldap3 library
    #[error("ldap3 Ldap error: {0}")]
    LdapError(#[from] ldap3::LdapError),
    /// the server answered with a non-zero result code
    #[error("LDAP result code {rc}: {text}")]
    ResultCode {
        /// the LDAP result code
        rc: u32,
        /// the diagnostic message sent by the server
        text: String,
    },
    /// and error parsing an OID
    #[error("OID error: {0}")]
    OIDError(#[from] OIDError),
}

/// a constraint on the memberURL filter of a dynamic group that was violated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintViolation {
    /// the filter asserts on an attribute that identifies the user itself
    #[error("memberURL filter contains uid or cn attribute which is not allowed: {0}")]
    ForbiddenAttribute(String),
    /// the filter asserts a substring or presence match which can not be turned into a value
    #[error("memberURL filter contains wildcard values which is not allowed: {0}")]
    WildcardValue(String),
}

/// errors which can happen during a bulk group membership run
///
/// fatal errors abort the run regardless of the continue-on-error flag,
/// the others are recorded per user and the run goes on if allowed to
#[derive(Debug, Error)]
pub enum MembershipError {
    /// no group name was given
    #[error("Group name is required")]
    MissingGroupName,
    /// the identifier did not match any user
    #[error("User not found: {0}")]
    UserNotFound(String),
    /// the identifier matched more than one user
    #[error("Multiple users found for ID: {0}")]
    AmbiguousUser(String),
    /// the directory failed while searching for a user
    #[error("Error validating user {identifier}: {source}")]
    UserLookupFailed {
        /// the identifier being resolved
        identifier: String,
        /// the underlying directory error
        source: DirectoryError,
    },
    /// none of the identifiers could be resolved
    #[error("No valid users found")]
    NoValidUsers,
    /// the directory failed while searching for the group
    #[error("Error looking up group {group_name}: {source}")]
    GroupLookupFailed {
        /// the group name being looked up
        group_name: String,
        /// the underlying directory error
        source: DirectoryError,
    },
    /// no group with this name exists below the group base DN
    #[error("Group not found: {0}")]
    GroupNotFound(String),
    /// more than one group with this name exists below the group base DN
    #[error("Multiple groups found with name: {0}")]
    AmbiguousGroup(String),
    /// none of the supported group object classes is present on the group
    #[error("Unsupported group type: {0}")]
    UnsupportedGroupVariant(String),
    /// a groupOfURLs entry without memberURL
    #[error("groupOfURLs has no memberURL attribute")]
    MissingMemberUrl,
    /// a groupOfURLs entry with several memberURL values
    #[error("groupOfURLs has multiple memberURL values ({0}) - only single memberURL is supported")]
    AmbiguousMemberUrl(usize),
    /// the memberURL value is not a usable LDAP URL
    #[error("Could not parse memberURL {url}: {reason}")]
    InvalidMemberUrl {
        /// the memberURL value
        url: String,
        /// why it could not be parsed
        reason: String,
    },
    /// the memberURL filter uses operators beyond a flat conjunction of equality clauses
    #[error("memberURL filter uses constructs that are not supported (only (attr=value) clauses, optionally wrapped in a single (&...), are): {0}")]
    UnsupportedMemberUrlFilter(String),
    /// the memberURL filter violates one of the dynamic group constraints
    #[error("{0}")]
    DynamicGroupConstraintViolation(#[from] ConstraintViolation),
    /// nothing in the memberURL filter can be written to a user entry
    #[error("No modifiable attributes found in memberURL filter: {0}")]
    NoModifiableAttributes(String),
    /// the requested control is not announced by the server
    #[error("Control {oid} is not supported by the directory server, not modifying {dn}")]
    UnsupportedControl {
        /// OID of the control
        oid: String,
        /// the entry that would have been modified
        dn: String,
    },
    /// the batched modify of a static group failed
    #[error("Failed to modify {variant}: {source}")]
    GroupModifyFailed {
        /// the variant of the group that was modified
        variant: GroupVariant,
        /// the underlying directory error
        source: DirectoryError,
    },
    /// the modify of a single user entry for a dynamic group failed
    #[error("Failed to modify user {uid} for dynamic group: {source}")]
    UserModifyFailed {
        /// uid of the user
        uid: String,
        /// the underlying directory error
        source: DirectoryError,
    },
}

impl MembershipError {
    /// whether this error aborts the whole run no matter what the
    /// continue-on-error flag says
    pub fn is_fatal(&self) -> bool {
        match self {
            MembershipError::UserNotFound(_)
            | MembershipError::AmbiguousUser(_)
            | MembershipError::UserLookupFailed { .. }
            | MembershipError::UnsupportedControl { .. }
            | MembershipError::GroupModifyFailed { .. }
            | MembershipError::UserModifyFailed { .. } => false,
            MembershipError::MissingGroupName
            | MembershipError::NoValidUsers
            | MembershipError::GroupLookupFailed { .. }
            | MembershipError::GroupNotFound(_)
            | MembershipError::AmbiguousGroup(_)
            | MembershipError::UnsupportedGroupVariant(_)
            | MembershipError::MissingMemberUrl
            | MembershipError::AmbiguousMemberUrl(_)
            | MembershipError::InvalidMemberUrl { .. }
            | MembershipError::UnsupportedMemberUrlFilter(_)
            | MembershipError::DynamicGroupConstraintViolation(_)
            | MembershipError::NoModifiableAttributes(_) => true,
        }
    }
}
