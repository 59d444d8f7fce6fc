//! running a bulk membership request from user resolution to the report
//!
//! A run is a single sequential pass: resolve users, look up and classify the
//! group, plan, submit. Fatal errors end the run with a report holding only
//! that error. Per user errors are collected and, if the request allows it,
//! the run goes on with the next user.

use tracing::instrument;

use crate::directory::{permissive_modify_control, DirectoryClient, PERMISSIVE_MODIFY_OID};
use crate::error::{DirectoryError, MembershipError};
use crate::group::lookup_group;
use crate::model::{BulkMembershipRequest, ExecutionReport, ModificationRequest, ResolvedUser};
use crate::planner::{GroupPlanner, MembershipPlanner};
use crate::users::resolve_users;

/// successes and errors accumulated over a run
#[derive(Debug, Default)]
struct Tally {
    /// users whose membership was changed
    success_count: usize,
    /// error messages in the order they occurred
    errors: Vec<String>,
}

impl Tally {
    /// record an error
    fn error(&mut self, err: &MembershipError) {
        self.errors.push(err.to_string());
    }

    /// record an error, true if the run may go on with the next item
    fn record(&mut self, err: &MembershipError, continue_on_error: bool) -> bool {
        self.error(err);
        continue_on_error && !err.is_fatal()
    }

    /// the final report
    fn into_report(self, total: usize) -> ExecutionReport {
        ExecutionReport {
            success_count: self.success_count,
            errors: self.errors,
            total,
        }
    }
}

/// the report of a run that ended with a fatal error
fn fatal_report(err: MembershipError, total: usize) -> ExecutionReport {
    tracing::debug!("Aborting bulk membership run: {}", err);
    ExecutionReport {
        success_count: 0,
        errors: vec![err.to_string()],
        total,
    }
}

/// send one modify request, checking for Permissive Modify support first if
/// it was asked for
///
/// `wrap` turns a directory error into the error reported for this request
async fn submit<D, F>(
    directory: &mut D,
    request: &ModificationRequest,
    use_permissive_modify: bool,
    wrap: F,
) -> Result<(), MembershipError>
where
    D: DirectoryClient + ?Sized,
    F: Fn(DirectoryError) -> MembershipError,
{
    let mut controls = Vec::new();
    if use_permissive_modify {
        if !directory
            .is_control_supported(PERMISSIVE_MODIFY_OID)
            .await
            .map_err(&wrap)?
        {
            return Err(MembershipError::UnsupportedControl {
                oid: PERMISSIVE_MODIFY_OID.to_string(),
                dn: request.target_dn.to_owned(),
            });
        }
        controls.push(permissive_modify_control());
    }
    directory
        .modify(&request.target_dn, &request.changes, controls)
        .await
        .map_err(wrap)
}

/// look up the group and pick the planner for it
async fn select_planner<D: DirectoryClient + ?Sized>(
    directory: &mut D,
    request: &BulkMembershipRequest,
) -> Result<GroupPlanner, MembershipError> {
    let group = lookup_group(directory, &request.group_base_dn, &request.group_name).await?;
    let variant = group.variant();
    tracing::debug!("Group {} is a {}", group.dn, variant);
    GroupPlanner::for_group(variant, &group)
}

/// submit the planned requests in order
///
/// static groups yield one request for the group entry, dynamic groups one
/// per user entry
async fn apply<D: DirectoryClient + ?Sized>(
    directory: &mut D,
    planner: &GroupPlanner,
    users: &[ResolvedUser],
    request: &BulkMembershipRequest,
    tally: &mut Tally,
) {
    for modification in planner.plan(users, request.operation) {
        let result = submit(directory, &modification, request.use_permissive_modify, |source| {
            planner.modify_failed(&modification, users, source)
        })
        .await;
        match result {
            Ok(()) => tally.success_count += planner.users_changed(&modification),
            Err(err) => {
                if !tally.record(&err, request.continue_on_error) {
                    tracing::debug!("Stopping after failure on {}", modification.target_dn);
                    break;
                }
            }
        }
    }
}

/// add the users named in the request to the group or remove them from it
///
/// the directory session has to be connected and bound already, it is left
/// open when the run is done
#[instrument(skip(directory, request), fields(group = %request.group_name, operation = %request.operation))]
pub async fn run_bulk_membership<D: DirectoryClient + ?Sized>(
    directory: &mut D,
    request: &BulkMembershipRequest,
) -> ExecutionReport {
    tracing::info!(
        "Starting bulk group membership operation for {} users",
        request.user_identifiers.len()
    );
    if request.group_name.trim().is_empty() {
        return fatal_report(MembershipError::MissingGroupName, 0);
    }

    let resolution = resolve_users(
        directory,
        &request.user_identifiers,
        &request.user_base_dn,
        request.continue_on_error,
    )
    .await;
    let mut tally = Tally::default();
    for err in &resolution.errors {
        tally.error(err);
    }
    let users = resolution.resolved;
    if users.is_empty() {
        if tally.errors.is_empty() {
            return fatal_report(MembershipError::NoValidUsers, 0);
        }
        return tally.into_report(0);
    }
    let total = users.len();

    let planner = match select_planner(directory, request).await {
        Ok(planner) => planner,
        Err(err) => return fatal_report(err, total),
    };

    apply(directory, &planner, &users, request, &mut tally).await;

    let report = tally.into_report(total);
    if report.is_success() {
        tracing::info!(
            "Bulk group membership operation completed successfully, {} users processed",
            report.success_count
        );
    } else {
        tracing::warn!(
            "Bulk group membership operation completed with {} successes and {} errors",
            report.success_count,
            report.error_count()
        );
    }
    report
}
