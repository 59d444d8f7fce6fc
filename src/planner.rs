//! building the modify requests that add users to or remove them from a group
//!
//! Static groups list their members on the group entry, so all users end up in
//! one request against the group. Dynamic groups select their members with a
//! search filter, so every user gets a request of its own that makes its entry
//! match (or stop matching) that filter.

use crate::error::{DirectoryError, MembershipError};
use crate::group::{GroupDescriptor, GroupVariant};
use crate::model::{
    AttributeChange, AttributeValuePair, ChangeOp, MembershipOperation, ModificationRequest,
    ResolvedUser,
};

/// which property of a user is stored in a static group's member attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberValue {
    /// the uid
    Uid,
    /// the DN
    Dn,
}

impl MemberValue {
    /// the value for this user
    fn of(self, user: &ResolvedUser) -> &str {
        match self {
            MemberValue::Uid => &user.uid,
            MemberValue::Dn => &user.dn,
        }
    }
}

/// the member attribute and value kind of a static group variant
pub fn member_attribute(variant: GroupVariant) -> Option<(&'static str, MemberValue)> {
    match variant {
        GroupVariant::PosixGroup => Some(("memberUid", MemberValue::Uid)),
        GroupVariant::GroupOfNames => Some(("member", MemberValue::Dn)),
        GroupVariant::GroupOfUniqueNames => Some(("uniqueMember", MemberValue::Dn)),
        GroupVariant::GroupOfUrls | GroupVariant::Unknown => None,
    }
}

/// building modify requests for a set of users
pub trait MembershipPlanner {
    /// the requests that apply `operation` for all `users`
    fn plan(&self, users: &[ResolvedUser], operation: MembershipOperation)
        -> Vec<ModificationRequest>;

    /// the number of users whose membership changed once `request` was applied
    fn users_changed(&self, request: &ModificationRequest) -> usize;

    /// the error reported when the directory rejected `request`, which was
    /// planned for `users`
    fn modify_failed(
        &self,
        request: &ModificationRequest,
        users: &[ResolvedUser],
        source: DirectoryError,
    ) -> MembershipError;
}

/// planner for posixGroup, groupOfNames and groupOfUniqueNames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticGroupPlanner {
    /// the variant, kept for error messages
    pub variant: GroupVariant,
    /// DN of the group entry
    pub group_dn: String,
    /// the member attribute
    pub attribute: &'static str,
    /// what goes into the member attribute
    pub value: MemberValue,
}

impl StaticGroupPlanner {
    /// planner for a static variant, None for groupOfURLs and unknown groups
    pub fn new(variant: GroupVariant, group_dn: &str) -> Option<Self> {
        member_attribute(variant).map(|(attribute, value)| Self {
            variant,
            group_dn: group_dn.to_string(),
            attribute,
            value,
        })
    }

    /// the single request changing the member attribute for all users,
    /// None if there are no users
    pub fn plan_batch(
        &self,
        users: &[ResolvedUser],
        operation: MembershipOperation,
    ) -> Option<ModificationRequest> {
        if users.is_empty() {
            return None;
        }
        let op = ChangeOp::from(operation);
        Some(ModificationRequest {
            target_dn: self.group_dn.to_owned(),
            changes: users
                .iter()
                .map(|user| AttributeChange::new(self.attribute, op, self.value.of(user)))
                .collect(),
        })
    }
}

impl MembershipPlanner for StaticGroupPlanner {
    fn plan(
        &self,
        users: &[ResolvedUser],
        operation: MembershipOperation,
    ) -> Vec<ModificationRequest> {
        self.plan_batch(users, operation).into_iter().collect()
    }

    fn users_changed(&self, request: &ModificationRequest) -> usize {
        request.changes.len()
    }

    fn modify_failed(
        &self,
        _request: &ModificationRequest,
        _users: &[ResolvedUser],
        source: DirectoryError,
    ) -> MembershipError {
        MembershipError::GroupModifyFailed {
            variant: self.variant,
            source,
        }
    }
}

/// planner for groupOfURLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicGroupPlanner {
    /// the attribute values taken from the memberURL filter
    pub pairs: Vec<AttributeValuePair>,
}

impl DynamicGroupPlanner {
    /// the request for a single user
    ///
    /// objectClass values are never removed from a user, so a removal that
    /// only concerns objectClass yields no request
    pub fn plan_user(
        &self,
        user: &ResolvedUser,
        operation: MembershipOperation,
    ) -> Option<ModificationRequest> {
        let op = ChangeOp::from(operation);
        let changes: Vec<AttributeChange> = self
            .pairs
            .iter()
            .filter(|pair| {
                operation == MembershipOperation::Add
                    || !pair.attribute.eq_ignore_ascii_case("objectClass")
            })
            .map(|pair| AttributeChange::new(pair.attribute.to_owned(), op, pair.value.to_owned()))
            .collect();
        if changes.is_empty() {
            tracing::debug!("Nothing to change on {} for {:?}", user.dn, operation);
            return None;
        }
        Some(ModificationRequest {
            target_dn: user.dn.to_owned(),
            changes,
        })
    }
}

impl MembershipPlanner for DynamicGroupPlanner {
    fn plan(
        &self,
        users: &[ResolvedUser],
        operation: MembershipOperation,
    ) -> Vec<ModificationRequest> {
        users
            .iter()
            .filter_map(|user| self.plan_user(user, operation))
            .collect()
    }

    fn users_changed(&self, _request: &ModificationRequest) -> usize {
        1
    }

    fn modify_failed(
        &self,
        request: &ModificationRequest,
        users: &[ResolvedUser],
        source: DirectoryError,
    ) -> MembershipError {
        let uid = users
            .iter()
            .find(|user| user.dn == request.target_dn)
            .map(|user| user.uid.to_owned())
            .unwrap_or_else(|| request.target_dn.to_owned());
        MembershipError::UserModifyFailed { uid, source }
    }
}

/// the planner selected for a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupPlanner {
    /// members are listed on the group entry, one batched request
    Static(StaticGroupPlanner),
    /// members are selected by a filter, one request per user
    Dynamic(DynamicGroupPlanner),
}

impl GroupPlanner {
    /// select the planner for the variant of `group`
    ///
    /// for groupOfURLs this parses and validates the memberURL
    pub fn for_group(
        variant: GroupVariant,
        group: &GroupDescriptor,
    ) -> Result<Self, MembershipError> {
        match variant {
            GroupVariant::GroupOfUrls => Ok(GroupPlanner::Dynamic(DynamicGroupPlanner {
                pairs: crate::dynamic::resolve_dynamic_pairs(group)?,
            })),
            GroupVariant::Unknown => Err(MembershipError::UnsupportedGroupVariant(
                group.object_classes.join(", "),
            )),
            static_variant => StaticGroupPlanner::new(static_variant, &group.dn)
                .map(GroupPlanner::Static)
                .ok_or_else(|| {
                    MembershipError::UnsupportedGroupVariant(group.object_classes.join(", "))
                }),
        }
    }
}

impl MembershipPlanner for GroupPlanner {
    fn plan(
        &self,
        users: &[ResolvedUser],
        operation: MembershipOperation,
    ) -> Vec<ModificationRequest> {
        match self {
            GroupPlanner::Static(planner) => planner.plan(users, operation),
            GroupPlanner::Dynamic(planner) => planner.plan(users, operation),
        }
    }

    fn users_changed(&self, request: &ModificationRequest) -> usize {
        match self {
            GroupPlanner::Static(planner) => planner.users_changed(request),
            GroupPlanner::Dynamic(planner) => planner.users_changed(request),
        }
    }

    fn modify_failed(
        &self,
        request: &ModificationRequest,
        users: &[ResolvedUser],
        source: DirectoryError,
    ) -> MembershipError {
        match self {
            GroupPlanner::Static(planner) => planner.modify_failed(request, users, source),
            GroupPlanner::Dynamic(planner) => planner.modify_failed(request, users, source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Vec<ResolvedUser> {
        ["alice", "bob", "carol"]
            .iter()
            .map(|uid| ResolvedUser {
                uid: uid.to_string(),
                dn: format!("uid={},ou=people,dc=example,dc=com", uid),
            })
            .collect()
    }

    const GROUP_DN: &str = "cn=admins,ou=groups,dc=example,dc=com";

    #[test]
    fn static_variants_produce_one_request_with_one_change_per_user() {
        for (variant, attribute, uses_dn) in [
            (GroupVariant::PosixGroup, "memberUid", false),
            (GroupVariant::GroupOfNames, "member", true),
            (GroupVariant::GroupOfUniqueNames, "uniqueMember", true),
        ] {
            let planner = StaticGroupPlanner::new(variant, GROUP_DN).unwrap();
            let requests = planner.plan(&users(), MembershipOperation::Add);
            assert_eq!(requests.len(), 1);
            let request = &requests[0];
            assert_eq!(request.target_dn, GROUP_DN);
            assert_eq!(request.changes.len(), 3);
            for (change, user) in request.changes.iter().zip(users()) {
                assert_eq!(change.attribute, attribute);
                assert_eq!(change.op, ChangeOp::Add);
                let expected = if uses_dn { &user.dn } else { &user.uid };
                assert_eq!(&change.value, expected);
            }
        }
    }

    #[test]
    fn add_and_remove_are_inverses() {
        for variant in [
            GroupVariant::PosixGroup,
            GroupVariant::GroupOfNames,
            GroupVariant::GroupOfUniqueNames,
        ] {
            let planner = StaticGroupPlanner::new(variant, GROUP_DN).unwrap();
            let added = planner.plan_batch(&users(), MembershipOperation::Add).unwrap();
            let removed = planner
                .plan_batch(&users(), MembershipOperation::Remove)
                .unwrap();
            assert_eq!(added.target_dn, removed.target_dn);
            assert_eq!(added.changes.len(), removed.changes.len());
            for (a, r) in added.changes.iter().zip(&removed.changes) {
                assert_eq!(a.attribute, r.attribute);
                assert_eq!(a.value, r.value);
                assert_eq!(a.op, ChangeOp::Add);
                assert_eq!(r.op, ChangeOp::Delete);
            }
        }
    }

    #[test]
    fn no_users_no_request() {
        let planner = StaticGroupPlanner::new(GroupVariant::GroupOfNames, GROUP_DN).unwrap();
        assert_eq!(planner.plan_batch(&[], MembershipOperation::Add), None);
        assert!(planner.plan(&[], MembershipOperation::Remove).is_empty());
    }

    #[test]
    fn no_static_planner_for_dynamic_or_unknown_groups() {
        assert!(StaticGroupPlanner::new(GroupVariant::GroupOfUrls, GROUP_DN).is_none());
        assert!(StaticGroupPlanner::new(GroupVariant::Unknown, GROUP_DN).is_none());
    }

    #[test]
    fn dynamic_requests_target_each_user() {
        let planner = DynamicGroupPlanner {
            pairs: vec![
                AttributeValuePair::new("objectClass", "extensibleObject"),
                AttributeValuePair::new("department", "Engineering"),
            ],
        };
        let requests = planner.plan(&users(), MembershipOperation::Add);
        assert_eq!(requests.len(), 3);
        for (request, user) in requests.iter().zip(users()) {
            assert_eq!(request.target_dn, user.dn);
            assert_eq!(
                request.changes,
                vec![
                    AttributeChange::new("objectClass", ChangeOp::Add, "extensibleObject"),
                    AttributeChange::new("department", ChangeOp::Add, "Engineering"),
                ]
            );
        }
    }

    #[test]
    fn dynamic_removal_keeps_object_classes() {
        let planner = DynamicGroupPlanner {
            pairs: vec![
                AttributeValuePair::new("ObjectClass", "extensibleObject"),
                AttributeValuePair::new("department", "Engineering"),
            ],
        };
        let requests = planner.plan(&users()[..1], MembershipOperation::Remove);
        assert_eq!(
            requests,
            vec![ModificationRequest {
                target_dn: "uid=alice,ou=people,dc=example,dc=com".to_string(),
                changes: vec![AttributeChange::new(
                    "department",
                    ChangeOp::Delete,
                    "Engineering"
                )],
            }]
        );
    }

    #[test]
    fn dynamic_removal_of_only_object_classes_is_a_no_op() {
        let planner = DynamicGroupPlanner {
            pairs: vec![AttributeValuePair::new("objectClass", "engineer")],
        };
        assert!(planner.plan(&users(), MembershipOperation::Remove).is_empty());
        assert_eq!(planner.plan(&users(), MembershipOperation::Add).len(), 3);
    }

    fn rejected() -> DirectoryError {
        DirectoryError::ResultCode {
            rc: 50,
            text: "insufficient access".to_string(),
        }
    }

    #[test]
    fn static_requests_report_against_the_group() {
        let planner = GroupPlanner::Static(
            StaticGroupPlanner::new(GroupVariant::PosixGroup, GROUP_DN).unwrap(),
        );
        let requests = planner.plan(&users(), MembershipOperation::Add);
        assert_eq!(requests.len(), 1);
        assert_eq!(planner.users_changed(&requests[0]), 3);
        assert_eq!(
            planner
                .modify_failed(&requests[0], &users(), rejected())
                .to_string(),
            "Failed to modify posixGroup: LDAP result code 50: insufficient access"
        );
    }

    #[test]
    fn dynamic_requests_report_against_their_user() {
        let planner = GroupPlanner::Dynamic(DynamicGroupPlanner {
            pairs: vec![AttributeValuePair::new("l", "Berlin")],
        });
        let requests = planner.plan(&users(), MembershipOperation::Add);
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| planner.users_changed(r) == 1));
        assert_eq!(
            planner
                .modify_failed(&requests[1], &users(), rejected())
                .to_string(),
            "Failed to modify user bob for dynamic group: LDAP result code 50: insufficient access"
        );
    }

    #[test]
    fn planner_selection() {
        let group = GroupDescriptor {
            dn: GROUP_DN.to_string(),
            object_classes: vec!["top".to_string(), "groupOfNames".to_string()],
            member_urls: vec![],
        };
        assert!(matches!(
            GroupPlanner::for_group(GroupVariant::GroupOfNames, &group),
            Ok(GroupPlanner::Static(StaticGroupPlanner { attribute: "member", .. }))
        ));
        assert!(matches!(
            GroupPlanner::for_group(GroupVariant::Unknown, &group),
            Err(MembershipError::UnsupportedGroupVariant(_))
        ));
        assert!(matches!(
            GroupPlanner::for_group(GroupVariant::GroupOfUrls, &group),
            Err(MembershipError::MissingMemberUrl)
        ));
    }
}
