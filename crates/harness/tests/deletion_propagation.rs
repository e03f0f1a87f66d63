use fieldsync_core::{
    field_value::FieldValue,
    ids::TenantId,
    operations::{EntityKey, OpKind},
    revision::Revision,
};
use fieldsync_engine::{CallerScope, OpStatus};
use fieldsync_harness::{TestDevice, TestServer};
use fieldsync_storage::SyncStore;

// ============================================================================
// Deletion propagation through tombstones
// ============================================================================

#[test]
fn delete_is_pulled_as_a_tombstone_entry() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);

    let mut device = TestDevice::new();
    device.stage_upsert("patient", "42", vec![("name", FieldValue::Text("A".into()))])?;
    server.push(&scope, &device.batch(tenant)?)?;
    server.sync_device(&scope, tenant, &mut device)?;

    device.stage_delete("patient", "42")?;
    let outcomes = server.push(&scope, &device.batch(tenant)?)?;
    assert_eq!(outcomes[0].status, OpStatus::Applied);
    assert_eq!(outcomes[0].assigned_revision, Some(Revision::new(2)));

    let entries = server.pull(&scope, tenant, Revision::ZERO, Some(10))?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].revision, Revision::new(2));
    assert_eq!(entries[1].kind, OpKind::Delete);
    assert!(entries[1].payload.is_none());

    // The primary record is gone; the tombstone is what propagates.
    let entity = EntityKey::new("patient", "42");
    assert!(server.engine.head(&scope, tenant, &entity)?.is_none());

    // A client that had already pulled the upsert drops its local copy.
    let mut late = TestDevice::new();
    server.sync_device(&scope, tenant, &mut late)?;
    assert_eq!(late.known_revision(&entity), None);

    Ok(())
}

#[test]
fn recreation_supersedes_the_tombstone() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);
    let entity = EntityKey::new("patient", "42");

    let mut device = TestDevice::new();
    device.stage_upsert("patient", "42", vec![("name", FieldValue::Text("A".into()))])?;
    server.push(&scope, &device.batch(tenant)?)?;
    server.sync_device(&scope, tenant, &mut device)?;

    device.stage_delete("patient", "42")?;
    server.push(&scope, &device.batch(tenant)?)?;
    server.sync_device(&scope, tenant, &mut device)?;

    device.stage_upsert("patient", "42", vec![("name", FieldValue::Text("A2".into()))])?;
    let outcomes = server.push(&scope, &device.batch(tenant)?)?;
    assert_eq!(outcomes[0].status, OpStatus::Applied);
    assert_eq!(outcomes[0].assigned_revision, Some(Revision::new(3)));

    // The tombstone is gone from the feed; the entity reappears as an
    // upsert at the higher revision.
    let entries = server.pull(&scope, tenant, Revision::ZERO, Some(10))?;
    let kinds: Vec<(u64, OpKind)> = entries
        .iter()
        .map(|e| (e.revision.value(), e.kind))
        .collect();
    assert_eq!(kinds, vec![(1, OpKind::Upsert), (3, OpKind::Upsert)]);

    // A client whose cursor sits past the deletion still recovers the
    // entity from the recreating upsert.
    let entries = server.pull(&scope, tenant, Revision::new(2), Some(10))?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].revision, Revision::new(3));
    assert_eq!(entries[0].kind, OpKind::Upsert);

    let head = server.engine.head(&scope, tenant, &entity)?.unwrap();
    assert_eq!(
        head.snapshot.field("name"),
        Some(&FieldValue::Text("A2".into()))
    );

    Ok(())
}

#[test]
fn repeated_deletes_keep_the_highest_revision() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);

    let mut device = TestDevice::new();
    device.stage_upsert("visit", "7", vec![("status", FieldValue::Text("open".into()))])?;
    server.push(&scope, &device.batch(tenant)?)?;
    server.sync_device(&scope, tenant, &mut device)?;

    device.stage_delete("visit", "7")?;
    server.push(&scope, &device.batch(tenant)?)?;

    // A second device deletes the same entity again; the tombstone
    // monotonically advances to the later revision.
    let mut other = TestDevice::new();
    other.stage_delete("visit", "7")?;
    let outcomes = server.push(&scope, &other.batch(tenant)?)?;
    assert_eq!(outcomes[0].status, OpStatus::Applied);
    assert_eq!(outcomes[0].assigned_revision, Some(Revision::new(3)));

    let entries = server.pull(&scope, tenant, Revision::ZERO, Some(10))?;
    let deletes: Vec<u64> = entries
        .iter()
        .filter(|e| e.kind == OpKind::Delete)
        .map(|e| e.revision.value())
        .collect();
    assert_eq!(deletes, vec![3]);

    Ok(())
}

#[test]
fn deleting_an_unknown_entity_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);

    let mut device = TestDevice::new();
    device.stage_delete("patient", "no-such")?;
    let outcomes = server.push(&scope, &device.batch(tenant)?)?;
    assert_eq!(outcomes[0].status, OpStatus::Rejected);
    assert!(
        outcomes[0]
            .reason
            .as_deref()
            .unwrap_or("")
            .contains("unknown entity")
    );
    assert_eq!(server.engine.storage().ledger_count(tenant)?, 0);

    // The rejection allocated nothing: the next accepted op takes
    // revision 1.
    device.stage_upsert("patient", "1", vec![("name", FieldValue::Text("A".into()))])?;
    let outcomes = server.push(&scope, &device.batch(tenant)?)?;
    assert_eq!(outcomes[0].assigned_revision, Some(Revision::new(1)));

    Ok(())
}
