#![deny(unknown_lints)]
#![deny(renamed_and_removed_lints)]
#![forbid(unsafe_code)]
#![deny(deprecated)]
#![forbid(non_fmt_panics)]
#![deny(unreachable_code)]
#![deny(unreachable_patterns)]
#![forbid(unused_doc_comments)]
#![forbid(unused_must_use)]
#![deny(while_true)]
#![deny(unused_parens)]
#![deny(redundant_semicolons)]
#![deny(non_ascii_idents)]
#![deny(confusable_idents)]
#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(clippy::cargo_common_metadata)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(missing_debug_implementations)]
#![deny(clippy::mod_module_files)]
#![doc = include_str!("../README.md")]

pub mod connect;
pub mod coordinator;
pub mod directory;
pub mod dynamic;
pub mod error;
pub mod filter;
pub mod group;
pub mod model;
pub mod planner;
pub mod users;

pub use coordinator::run_bulk_membership;
pub use directory::{permissive_modify_control, DirectoryClient, PERMISSIVE_MODIFY_OID};
pub use error::{ConstraintViolation, DirectoryError, MembershipError};
pub use filter::escape_filter_value;
pub use group::{classify, GroupDescriptor, GroupVariant};
pub use model::{
    parse_identifier_list, AttributeChange, AttributeValuePair, BulkMembershipRequest,
    BulkMembershipRequestBuilder, ChangeOp, ExecutionReport, MembershipOperation,
    ModificationRequest, ResolvedUser,
};
