//! Durable authorization state: principals, groups, grants, and policies.
//!
//! Backed by process memory behind a single RwLock; all mutation goes
//! through service operations that enforce the write-time invariants
//! (unique names, referential integrity of grants, acyclic group graph).

use std::collections::HashSet;

use parking_lot::RwLock;
use tracing::debug;

use lakegate_core::{
    ColumnMask, ColumnMaskBinding, GranteeType, Group, GroupMember, LakegateError, LakegateResult,
    MemberType, Principal, PrivilegeGrant, RowFilter, RowFilterBinding,
};

#[derive(Debug, Default)]
struct Inner {
    principals: Vec<Principal>,
    groups: Vec<Group>,
    memberships: Vec<GroupMember>,
    grants: Vec<PrivilegeGrant>,
    row_filters: Vec<RowFilter>,
    row_filter_bindings: Vec<RowFilterBinding>,
    column_masks: Vec<ColumnMask>,
    column_mask_bindings: Vec<ColumnMaskBinding>,
}

/// Authorization state store.
#[derive(Debug, Default)]
pub struct AuthStore {
    inner: RwLock<Inner>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Principals
    // ------------------------------------------------------------------

    /// Create a principal. Names are unique.
    pub fn create_principal(&self, principal: Principal) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        if inner.principals.iter().any(|p| p.name == principal.name) {
            return Err(LakegateError::conflict(format!(
                "principal '{}' already exists",
                principal.name
            )));
        }
        debug!(principal = %principal.name, "Creating principal");
        inner.principals.push(principal);
        Ok(())
    }

    pub fn principal_by_name(&self, name: &str) -> LakegateResult<Principal> {
        self.inner
            .read()
            .principals
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| LakegateError::not_found(format!("principal '{name}'")))
    }

    fn principal_exists(inner: &Inner, id: &str) -> bool {
        inner.principals.iter().any(|p| p.id == id)
    }

    fn group_exists(inner: &Inner, id: &str) -> bool {
        inner.groups.iter().any(|g| g.id == id)
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Create a group. Names are unique.
    pub fn create_group(&self, group: Group) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        if inner.groups.iter().any(|g| g.name == group.name) {
            return Err(LakegateError::conflict(format!(
                "group '{}' already exists",
                group.name
            )));
        }
        inner.groups.push(group);
        Ok(())
    }

    pub fn group_by_name(&self, name: &str) -> LakegateResult<Group> {
        self.inner
            .read()
            .groups
            .iter()
            .find(|g| g.name == name)
            .cloned()
            .ok_or_else(|| LakegateError::not_found(format!("group '{name}'")))
    }

    /// Add a membership edge. Nested-group edges are rejected when they
    /// would close a cycle.
    pub fn add_group_member(&self, member: GroupMember) -> LakegateResult<()> {
        let mut inner = self.inner.write();

        if !Self::group_exists(&inner, &member.group_id) {
            return Err(LakegateError::not_found(format!(
                "group id '{}'",
                member.group_id
            )));
        }
        match member.member_type {
            MemberType::User => {
                if !Self::principal_exists(&inner, &member.member_id) {
                    return Err(LakegateError::not_found(format!(
                        "principal id '{}'",
                        member.member_id
                    )));
                }
            }
            MemberType::Group => {
                if !Self::group_exists(&inner, &member.member_id) {
                    return Err(LakegateError::not_found(format!(
                        "group id '{}'",
                        member.member_id
                    )));
                }
                if member.member_id == member.group_id
                    || Self::contains_transitively(&inner, &member.member_id, &member.group_id)
                {
                    return Err(LakegateError::validation(format!(
                        "membership of group '{}' in group '{}' would create a cycle",
                        member.member_id, member.group_id
                    )));
                }
            }
        }

        if inner.memberships.iter().any(|m| {
            m.group_id == member.group_id
                && m.member_id == member.member_id
                && m.member_type == member.member_type
        }) {
            return Err(LakegateError::conflict("membership already exists"));
        }

        inner.memberships.push(member);
        Ok(())
    }

    /// Whether `ancestor` transitively contains `descendant` via group edges.
    fn contains_transitively(inner: &Inner, ancestor: &str, descendant: &str) -> bool {
        let mut work = vec![ancestor.to_owned()];
        let mut seen = HashSet::new();
        while let Some(group) = work.pop() {
            if !seen.insert(group.clone()) {
                continue;
            }
            for m in inner
                .memberships
                .iter()
                .filter(|m| m.group_id == group && m.member_type == MemberType::Group)
            {
                if m.member_id == descendant {
                    return true;
                }
                work.push(m.member_id.clone());
            }
        }
        false
    }

    /// Groups directly containing the given member.
    pub fn groups_containing(&self, member_type: MemberType, member_id: &str) -> Vec<String> {
        self.inner
            .read()
            .memberships
            .iter()
            .filter(|m| m.member_type == member_type && m.member_id == member_id)
            .map(|m| m.group_id.clone())
            .collect()
    }

    /// All group ids the principal transitively belongs to.
    pub fn expand_groups(&self, principal_id: &str) -> Vec<String> {
        let inner = self.inner.read();
        let mut result = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        // Work-list seeded with the principal's direct groups.
        let mut work: Vec<String> = inner
            .memberships
            .iter()
            .filter(|m| m.member_type == MemberType::User && m.member_id == principal_id)
            .map(|m| m.group_id.clone())
            .collect();

        while let Some(group) = work.pop() {
            if !seen.insert(group.clone()) {
                continue;
            }
            for m in inner
                .memberships
                .iter()
                .filter(|m| m.member_type == MemberType::Group && m.member_id == group)
            {
                work.push(m.group_id.clone());
            }
            result.push(group);
        }

        result
    }

    // ------------------------------------------------------------------
    // Grants
    // ------------------------------------------------------------------

    /// Record a grant. The grantee must exist.
    pub fn create_grant(&self, grant: PrivilegeGrant) -> LakegateResult<()> {
        let mut inner = self.inner.write();

        let grantee_ok = match grant.principal_type {
            GranteeType::User => Self::principal_exists(&inner, &grant.principal_id),
            GranteeType::Group => Self::group_exists(&inner, &grant.principal_id),
        };
        if !grantee_ok {
            return Err(LakegateError::not_found(format!(
                "grantee id '{}'",
                grant.principal_id
            )));
        }

        if inner.grants.contains(&grant) {
            return Err(LakegateError::conflict("grant already exists"));
        }
        inner.grants.push(grant);
        Ok(())
    }

    /// Remove a grant if present.
    pub fn revoke_grant(&self, grant: &PrivilegeGrant) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        let before = inner.grants.len();
        inner.grants.retain(|g| g != grant);
        if inner.grants.len() == before {
            return Err(LakegateError::not_found("grant"));
        }
        Ok(())
    }

    /// All grants held by any of the given grantees.
    pub fn grants_for(&self, grantees: &[(GranteeType, String)]) -> Vec<PrivilegeGrant> {
        self.inner
            .read()
            .grants
            .iter()
            .filter(|g| {
                grantees
                    .iter()
                    .any(|(t, id)| g.principal_type == *t && g.principal_id == *id)
            })
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Row filters
    // ------------------------------------------------------------------

    pub fn create_row_filter(&self, filter: RowFilter) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        if inner.row_filters.iter().any(|f| f.id == filter.id) {
            return Err(LakegateError::conflict(format!(
                "row filter '{}' already exists",
                filter.id
            )));
        }
        inner.row_filters.push(filter);
        Ok(())
    }

    pub fn bind_row_filter(&self, binding: RowFilterBinding) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        if !inner
            .row_filters
            .iter()
            .any(|f| f.id == binding.row_filter_id)
        {
            return Err(LakegateError::not_found(format!(
                "row filter '{}'",
                binding.row_filter_id
            )));
        }
        let grantee_ok = match binding.principal_type {
            GranteeType::User => Self::principal_exists(&inner, &binding.principal_id),
            GranteeType::Group => Self::group_exists(&inner, &binding.principal_id),
        };
        if !grantee_ok {
            return Err(LakegateError::not_found(format!(
                "grantee id '{}'",
                binding.principal_id
            )));
        }
        inner.row_filter_bindings.push(binding);
        Ok(())
    }

    /// Filters on a table, ascending by id.
    pub fn row_filters_for_table(&self, table_id: i64) -> Vec<RowFilter> {
        let mut filters: Vec<RowFilter> = self
            .inner
            .read()
            .row_filters
            .iter()
            .filter(|f| f.table_id == table_id)
            .cloned()
            .collect();
        filters.sort_by(|a, b| a.id.cmp(&b.id));
        filters
    }

    pub fn bindings_for_filter(&self, filter_id: &str) -> Vec<RowFilterBinding> {
        self.inner
            .read()
            .row_filter_bindings
            .iter()
            .filter(|b| b.row_filter_id == filter_id)
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Column masks
    // ------------------------------------------------------------------

    pub fn create_column_mask(&self, mask: ColumnMask) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        if inner.column_masks.iter().any(|m| m.id == mask.id) {
            return Err(LakegateError::conflict(format!(
                "column mask '{}' already exists",
                mask.id
            )));
        }
        inner.column_masks.push(mask);
        Ok(())
    }

    pub fn bind_column_mask(&self, binding: ColumnMaskBinding) -> LakegateResult<()> {
        let mut inner = self.inner.write();
        if !inner
            .column_masks
            .iter()
            .any(|m| m.id == binding.column_mask_id)
        {
            return Err(LakegateError::not_found(format!(
                "column mask '{}'",
                binding.column_mask_id
            )));
        }
        let grantee_ok = match binding.principal_type {
            GranteeType::User => Self::principal_exists(&inner, &binding.principal_id),
            GranteeType::Group => Self::group_exists(&inner, &binding.principal_id),
        };
        if !grantee_ok {
            return Err(LakegateError::not_found(format!(
                "grantee id '{}'",
                binding.principal_id
            )));
        }
        inner.column_mask_bindings.push(binding);
        Ok(())
    }

    /// Masks on a table, ascending by id.
    pub fn column_masks_for_table(&self, table_id: i64) -> Vec<ColumnMask> {
        let mut masks: Vec<ColumnMask> = self
            .inner
            .read()
            .column_masks
            .iter()
            .filter(|m| m.table_id == table_id)
            .cloned()
            .collect();
        masks.sort_by(|a, b| a.id.cmp(&b.id));
        masks
    }

    pub fn bindings_for_mask(&self, mask_id: &str) -> Vec<ColumnMaskBinding> {
        self.inner
            .read()
            .column_mask_bindings
            .iter()
            .filter(|b| b.column_mask_id == mask_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_with_groups() -> (AuthStore, Principal, Group, Group) {
        let store = AuthStore::new();
        let alice = Principal::new_user("alice");
        let analysts = Group::new("analysts", "");
        let staff = Group::new("staff", "");
        store.create_principal(alice.clone()).unwrap();
        store.create_group(analysts.clone()).unwrap();
        store.create_group(staff.clone()).unwrap();
        (store, alice, analysts, staff)
    }

    #[test]
    fn test_duplicate_principal_name_conflicts() {
        let store = AuthStore::new();
        store.create_principal(Principal::new_user("alice")).unwrap();
        let err = store
            .create_principal(Principal::new_user("alice"))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_transitive_group_expansion() {
        let (store, alice, analysts, staff) = store_with_groups();

        // alice -> analysts -> staff
        store
            .add_group_member(GroupMember {
                group_id: analysts.id.clone(),
                member_type: MemberType::User,
                member_id: alice.id.clone(),
            })
            .unwrap();
        store
            .add_group_member(GroupMember {
                group_id: staff.id.clone(),
                member_type: MemberType::Group,
                member_id: analysts.id.clone(),
            })
            .unwrap();

        let mut groups = store.expand_groups(&alice.id);
        groups.sort();
        let mut expected = vec![analysts.id, staff.id];
        expected.sort();
        assert_eq!(groups, expected);
    }

    #[test]
    fn test_group_cycle_rejected() {
        let (store, _alice, analysts, staff) = store_with_groups();

        store
            .add_group_member(GroupMember {
                group_id: staff.id.clone(),
                member_type: MemberType::Group,
                member_id: analysts.id.clone(),
            })
            .unwrap();

        // analysts containing staff would close the loop
        let err = store
            .add_group_member(GroupMember {
                group_id: analysts.id.clone(),
                member_type: MemberType::Group,
                member_id: staff.id.clone(),
            })
            .unwrap_err();
        assert!(err.is_validation());

        // self-membership is a cycle of length one
        let err = store
            .add_group_member(GroupMember {
                group_id: staff.id.clone(),
                member_type: MemberType::Group,
                member_id: staff.id.clone(),
            })
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_grant_requires_existing_grantee() {
        let (store, alice, _, _) = store_with_groups();
        use lakegate_core::{Privilege, SecurableType};

        let err = store
            .create_grant(PrivilegeGrant {
                principal_id: "ghost".into(),
                principal_type: GranteeType::User,
                securable_type: SecurableType::Table,
                securable_id: "1".into(),
                privilege: Privilege::Select,
            })
            .unwrap_err();
        assert!(err.is_not_found());

        store
            .create_grant(PrivilegeGrant {
                principal_id: alice.id,
                principal_type: GranteeType::User,
                securable_type: SecurableType::Table,
                securable_id: "1".into(),
                privilege: Privilege::Select,
            })
            .unwrap();
    }
}
