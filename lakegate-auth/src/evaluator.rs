//! Authorization evaluation.
//!
//! Answers the effective privilege question: group membership is expanded
//! with an iterative work-list, `ALL_PRIVILEGES` short-circuits, and table
//! checks fold in the USAGE requirement on the enclosing schema and catalog.
//! Grant paths combine with OR-semantics; a direct user grant and a group
//! grant never veto each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use lakegate_core::{
    AuthorizationService, ColumnMaskBinding, GranteeType, LakegateResult, Privilege, RowFilter,
    SecurableType, TableHandle, CATALOG_SECURABLE_ID,
};

use crate::registry::CatalogRegistry;
use crate::store::AuthStore;

/// Evaluates privileges, row filters, and column masks over the store.
pub struct AuthEvaluator {
    store: Arc<AuthStore>,
    registry: Arc<CatalogRegistry>,
}

impl AuthEvaluator {
    pub fn new(store: Arc<AuthStore>, registry: Arc<CatalogRegistry>) -> Self {
        Self { store, registry }
    }

    /// The principal plus every group transitively containing them, as
    /// grantee keys.
    fn grantee_set(&self, principal_id: &str) -> Vec<(GranteeType, String)> {
        let mut grantees = vec![(GranteeType::User, principal_id.to_owned())];
        for group_id in self.store.expand_groups(principal_id) {
            grantees.push((GranteeType::Group, group_id));
        }
        grantees
    }

    /// Whether any grantee holds `privilege` (or ALL_PRIVILEGES) on the
    /// exact securable.
    fn holds(
        &self,
        grantees: &[(GranteeType, String)],
        securable_type: SecurableType,
        securable_id: &str,
        privilege: Privilege,
    ) -> bool {
        self.store.grants_for(grantees).iter().any(|g| {
            g.securable_type == securable_type
                && g.securable_id == securable_id
                && (g.privilege == privilege || g.privilege == Privilege::AllPrivileges)
        })
    }

    /// Whether a binding list resolves to any of the grantees.
    fn binding_matches(
        grantees: &[(GranteeType, String)],
        principal_type: GranteeType,
        principal_id: &str,
    ) -> bool {
        grantees
            .iter()
            .any(|(t, id)| *t == principal_type && id == principal_id)
    }
}

#[async_trait::async_trait]
impl AuthorizationService for AuthEvaluator {
    async fn lookup_table_id(&self, name: &str) -> LakegateResult<TableHandle> {
        self.registry.lookup(name)
    }

    #[instrument(skip(self), fields(principal = %principal_name, privilege = %privilege.as_str()))]
    async fn check_privilege(
        &self,
        principal_name: &str,
        securable_type: SecurableType,
        securable_id: &str,
        privilege: Privilege,
    ) -> LakegateResult<bool> {
        let principal = self.store.principal_by_name(principal_name)?;
        if principal.is_admin {
            return Ok(true);
        }

        let grantees = self.grantee_set(&principal.id);

        if !self.holds(&grantees, securable_type, securable_id, privilege) {
            debug!(securable = securable_id, "Privilege not held");
            return Ok(false);
        }

        // Table privileges are only exercisable with USAGE up the hierarchy.
        if securable_type == SecurableType::Table {
            let schema_id = match self.registry.entry(securable_id.parse().unwrap_or(-1)) {
                Ok(entry) => entry.schema_id.to_string(),
                Err(_) => return Ok(false),
            };
            let schema_usage =
                self.holds(&grantees, SecurableType::Schema, &schema_id, Privilege::Usage);
            let catalog_usage = self.holds(
                &grantees,
                SecurableType::Catalog,
                CATALOG_SECURABLE_ID,
                Privilege::Usage,
            );
            if !schema_usage || !catalog_usage {
                debug!(securable = securable_id, "USAGE missing on enclosing scope");
                return Ok(false);
            }
        }

        Ok(true)
    }

    #[instrument(skip(self), fields(principal = %principal_name))]
    async fn effective_row_filters(
        &self,
        principal_name: &str,
        table_id: i64,
    ) -> LakegateResult<Vec<RowFilter>> {
        let principal = self.store.principal_by_name(principal_name)?;
        if principal.is_admin {
            return Ok(Vec::new());
        }

        let grantees = self.grantee_set(&principal.id);
        let filters = self
            .store
            .row_filters_for_table(table_id)
            .into_iter()
            .filter(|f| {
                self.store
                    .bindings_for_filter(&f.id)
                    .iter()
                    .any(|b| Self::binding_matches(&grantees, b.principal_type, &b.principal_id))
            })
            .collect();
        Ok(filters)
    }

    #[instrument(skip(self), fields(principal = %principal_name))]
    async fn effective_column_masks(
        &self,
        principal_name: &str,
        table_id: i64,
    ) -> LakegateResult<BTreeMap<String, String>> {
        let principal = self.store.principal_by_name(principal_name)?;
        if principal.is_admin {
            return Ok(BTreeMap::new());
        }

        let grantees = self.grantee_set(&principal.id);
        let mut result: BTreeMap<String, String> = BTreeMap::new();
        // Winner per column: user-level binding beats group-level, then
        // ascending mask id. Masks come back id-sorted already, so the first
        // candidate at the strongest level wins.
        let mut winner_level: BTreeMap<String, GranteeType> = BTreeMap::new();

        for mask in self.store.column_masks_for_table(table_id) {
            let bindings: Vec<ColumnMaskBinding> = self
                .store
                .bindings_for_mask(&mask.id)
                .into_iter()
                .filter(|b| Self::binding_matches(&grantees, b.principal_type, &b.principal_id))
                .collect();
            if bindings.is_empty() {
                continue;
            }

            // Any reachable see_original binding carves the column out
            // entirely for this principal.
            if bindings.iter().any(|b| b.see_original) {
                result.remove(&mask.column_name);
                winner_level.insert(mask.column_name.clone(), GranteeType::User);
                continue;
            }

            let level = if bindings
                .iter()
                .any(|b| b.principal_type == GranteeType::User)
            {
                GranteeType::User
            } else {
                GranteeType::Group
            };

            match winner_level.get(&mask.column_name) {
                // First mask for the column wins its slot.
                None => {
                    winner_level.insert(mask.column_name.clone(), level);
                    result.insert(mask.column_name.clone(), mask.mask_expression.clone());
                }
                // A later user-level mask displaces a group-level winner.
                Some(GranteeType::Group) if level == GranteeType::User => {
                    winner_level.insert(mask.column_name.clone(), level);
                    result.insert(mask.column_name.clone(), mask.mask_expression.clone());
                }
                _ => {}
            }
        }

        Ok(result)
    }

    async fn table_column_names(&self, table_id: i64) -> LakegateResult<Vec<String>> {
        self.registry.column_names(table_id)
    }

    async fn is_admin(&self, principal_name: &str) -> LakegateResult<bool> {
        Ok(self.store.principal_by_name(principal_name)?.is_admin)
    }
}
