//! the values flowing through a bulk membership run
//!
//! everything in here is created fresh for a single run and dropped once
//! the [ExecutionReport] has been handed back to the caller

use std::fmt::Display;
use std::str::FromStr;

use derive_builder::Builder;
use serde::Deserialize;
use thiserror::Error;

/// a user identifier that resolved to exactly one directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser {
    /// the uid as stored in the directory
    pub uid: String,
    /// the DN of the user entry
    pub dn: String,
}

/// whether members are added to or removed from the group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipOperation {
    /// add the users to the group
    Add,
    /// remove the users from the group
    Remove,
}

impl Display for MembershipOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipOperation::Add => write!(f, "Add Members"),
            MembershipOperation::Remove => write!(f, "Remove Members"),
        }
    }
}

/// error which can occur while parsing a membership operation
#[derive(Debug, Clone, Error)]
pub enum MembershipOperationParseError {
    /// neither add nor remove
    #[error("Could not parse {0} as a membership operation, expected add or remove")]
    CouldNotParseAsOperation(String),
}

impl FromStr for MembershipOperation {
    type Err = MembershipOperationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "add" | "add members" => Ok(MembershipOperation::Add),
            "remove" | "remove members" => Ok(MembershipOperation::Remove),
            _ => Err(MembershipOperationParseError::CouldNotParseAsOperation(
                s.to_string(),
            )),
        }
    }
}

/// the kind of a single attribute value change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    /// add the value to the attribute
    Add,
    /// delete the value from the attribute
    Delete,
}

impl From<MembershipOperation> for ChangeOp {
    fn from(operation: MembershipOperation) -> Self {
        match operation {
            MembershipOperation::Add => ChangeOp::Add,
            MembershipOperation::Remove => ChangeOp::Delete,
        }
    }
}

/// one value added to or deleted from one attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    /// the attribute name
    pub attribute: String,
    /// add or delete
    pub op: ChangeOp,
    /// the value
    pub value: String,
}

impl AttributeChange {
    /// create a new change
    pub fn new(attribute: impl Into<String>, op: ChangeOp, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }
}

/// the changes sent to the directory in a single modify operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationRequest {
    /// the entry to modify
    pub target_dn: String,
    /// the changes, applied in order
    pub changes: Vec<AttributeChange>,
}

/// an attribute assertion taken from a dynamic group's memberURL filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValuePair {
    /// the attribute name
    pub attribute: String,
    /// the asserted value
    pub value: String,
}

impl AttributeValuePair {
    /// create a new pair
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

/// the outcome of a bulk membership run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionReport {
    /// number of users whose membership was changed successfully
    pub success_count: usize,
    /// human readable description of every error that occurred
    pub errors: Vec<String>,
    /// number of resolved users the run operated on
    pub total: usize,
}

impl ExecutionReport {
    /// true if no error occurred at all
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// number of recorded errors
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

/// a request to change the membership of many users in one group
#[derive(Debug, Clone, Builder, Deserialize)]
#[builder(setter(into))]
pub struct BulkMembershipRequest {
    /// cn of the group
    pub group_name: String,
    /// add or remove
    pub operation: MembershipOperation,
    /// the uid values of the users
    pub user_identifiers: Vec<String>,
    /// where to search for users
    #[builder(default)]
    #[serde(default)]
    pub user_base_dn: String,
    /// where to search for the group
    #[builder(default)]
    #[serde(default)]
    pub group_base_dn: String,
    /// record per user errors and go on instead of stopping at the first one
    #[builder(default = "true")]
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
    /// send the Permissive Modify control with every modify
    #[builder(default)]
    #[serde(default)]
    pub use_permissive_modify: bool,
}

/// serde default for [BulkMembershipRequest::continue_on_error]
fn default_continue_on_error() -> bool {
    true
}

impl BulkMembershipRequest {
    /// fill in blank user and group base DNs with the base DN of the server
    pub fn with_default_base_dn(mut self, base_dn: &str) -> Self {
        if self.user_base_dn.trim().is_empty() {
            self.user_base_dn = base_dn.to_string();
        }
        if self.group_base_dn.trim().is_empty() {
            self.group_base_dn = base_dn.to_string();
        }
        self
    }
}

/// split a pasted or uploaded list of user identifiers, one per line
///
/// blank lines and lines starting with `#` are skipped
pub fn parse_identifier_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
