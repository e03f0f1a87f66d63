use fieldsync_core::ids::{FacilityId, TenantId};
use fieldsync_storage::FacilityFilter;

use crate::error::EngineError;

/// Caller identity every read and write is gated on. Constructed by the
/// surrounding platform's auth layer; the engine only enforces it.
///
/// Rows with no facility are visible tenant-wide. A facility-scoped
/// caller additionally sees its own facility's rows; the elevated
/// cross-facility role sees everything in the tenant.
#[derive(Debug, Clone, Copy)]
pub struct CallerScope {
    tenant_id: TenantId,
    facility_id: Option<FacilityId>,
    cross_facility: bool,
}

impl CallerScope {
    /// Tenant-wide scope with the elevated cross-facility role.
    pub fn tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            facility_id: None,
            cross_facility: true,
        }
    }

    /// Scope of a caller operating at a single facility.
    pub fn facility(tenant_id: TenantId, facility_id: FacilityId) -> Self {
        Self {
            tenant_id,
            facility_id: Some(facility_id),
            cross_facility: false,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn authorize_tenant(&self, tenant_id: TenantId) -> Result<(), EngineError> {
        if tenant_id == self.tenant_id {
            Ok(())
        } else {
            Err(EngineError::Scope(format!(
                "tenant {tenant_id} is outside the caller's scope"
            )))
        }
    }

    pub fn authorize_facility(
        &self,
        facility_id: Option<FacilityId>,
    ) -> Result<(), EngineError> {
        match facility_id {
            Some(f) if !self.can_see_facility(Some(f)) => Err(EngineError::Scope(format!(
                "facility {f} is outside the caller's scope"
            ))),
            _ => Ok(()),
        }
    }

    pub fn can_see_facility(&self, facility_id: Option<FacilityId>) -> bool {
        match facility_id {
            None => true,
            Some(f) => self.cross_facility || self.facility_id == Some(f),
        }
    }

    pub fn facility_filter(&self) -> FacilityFilter {
        if self.cross_facility {
            FacilityFilter::All
        } else {
            match self.facility_id {
                Some(f) => FacilityFilter::Facility(f),
                None => FacilityFilter::All,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facility_scope_sees_shared_and_own_rows() {
        let tenant = TenantId::new();
        let own = FacilityId::new();
        let other = FacilityId::new();
        let scope = CallerScope::facility(tenant, own);

        assert!(scope.can_see_facility(None));
        assert!(scope.can_see_facility(Some(own)));
        assert!(!scope.can_see_facility(Some(other)));
        assert!(scope.authorize_facility(Some(other)).is_err());
    }

    #[test]
    fn cross_facility_scope_sees_everything() {
        let tenant = TenantId::new();
        let scope = CallerScope::tenant(tenant);
        assert!(scope.can_see_facility(Some(FacilityId::new())));
        assert_eq!(scope.facility_filter(), FacilityFilter::All);
    }

    #[test]
    fn foreign_tenant_is_rejected() {
        let scope = CallerScope::tenant(TenantId::new());
        assert!(scope.authorize_tenant(TenantId::new()).is_err());
    }
}
