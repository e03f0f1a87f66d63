use fieldsync_core::{
    field_value::FieldValue,
    ids::*,
    operations::{ClientOperation, EntityKey, OpKind},
    revision::Revision,
    time::unix_millis_now,
};
use fieldsync_core::operations::PushBatch;
use fieldsync_engine::{CallerScope, EngineError, OpStatus};
use fieldsync_harness::{TestDevice, TestServer};
use fieldsync_storage::SyncStore;

// ============================================================================
// Push / pull round trips
// ============================================================================

#[test]
fn first_push_assigns_revision_one() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);
    let mut device = TestDevice::new();

    let op_id = device.stage_upsert("patient", "42", vec![("name", FieldValue::Text("A".into()))])?;
    let outcomes = server.push(&scope, &device.batch(tenant)?)?;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].op_id, op_id);
    assert_eq!(outcomes[0].status, OpStatus::Applied);
    assert_eq!(outcomes[0].assigned_revision, Some(Revision::new(1)));

    let entries = server.pull(&scope, tenant, Revision::ZERO, Some(10))?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].revision, Revision::new(1));
    assert_eq!(entries[0].kind, OpKind::Upsert);
    let payload = entries[0].payload.as_ref().unwrap();
    assert_eq!(payload.field("name"), Some(&FieldValue::Text("A".into())));
    assert_eq!(server.engine.max_revision(&scope, tenant)?, Revision::new(1));

    Ok(())
}

#[test]
fn replaying_a_batch_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);
    let mut device = TestDevice::new();

    device.stage_upsert("patient", "42", vec![("name", FieldValue::Text("A".into()))])?;
    let batch = device.batch(tenant)?;

    let first = server.push(&scope, &batch)?;
    assert_eq!(first[0].status, OpStatus::Applied);
    assert_eq!(first[0].assigned_revision, Some(Revision::new(1)));

    // Same batch again: the device retried after a dropped connection.
    let second = server.push(&scope, &batch)?;
    assert_eq!(second[0].op_id, first[0].op_id);
    assert_eq!(second[0].status, OpStatus::AlreadyApplied);
    assert_eq!(second[0].assigned_revision, Some(Revision::new(1)));

    let entries = server.pull(&scope, tenant, Revision::ZERO, Some(10))?;
    assert_eq!(entries.len(), 1);
    assert_eq!(server.engine.storage().ledger_count(tenant)?, 1);

    Ok(())
}

#[test]
fn pull_never_returns_the_cursor_revision() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);
    let mut device = TestDevice::new();

    for i in 0..3 {
        device.stage_upsert(
            "patient",
            &i.to_string(),
            vec![("name", FieldValue::Text(format!("p{i}")))],
        )?;
    }
    server.push(&scope, &device.batch(tenant)?)?;

    let entries = server.pull(&scope, tenant, Revision::new(2), Some(10))?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].revision, Revision::new(3));
    assert!(entries.iter().all(|e| e.revision > Revision::new(2)));

    Ok(())
}

#[test]
fn truncated_pages_resume_from_the_highest_seen_revision()
-> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);
    let mut device = TestDevice::new();

    for i in 0..5 {
        device.stage_upsert(
            "inventory",
            &i.to_string(),
            vec![("count", FieldValue::Integer(i))],
        )?;
    }
    server.push(&scope, &device.batch(tenant)?)?;

    let mut cursor = Revision::ZERO;
    let mut seen = Vec::new();
    loop {
        let page = server.pull(&scope, tenant, cursor, Some(2))?;
        if page.is_empty() {
            break;
        }
        assert!(page.len() <= 2);
        for entry in &page {
            assert!(entry.revision > cursor);
            seen.push(entry.revision.value());
            cursor = entry.revision;
        }
    }

    assert_eq!(seen, vec![1, 2, 3, 4, 5]);

    Ok(())
}

#[test]
fn revisions_increase_across_devices() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);
    let mut alpha = TestDevice::new();
    let mut beta = TestDevice::new();

    for round in 0..3 {
        alpha.stage_upsert(
            "visit",
            &format!("a{round}"),
            vec![("round", FieldValue::Integer(round))],
        )?;
        server.push(&scope, &alpha.batch(tenant)?)?;

        beta.stage_upsert(
            "visit",
            &format!("b{round}"),
            vec![("round", FieldValue::Integer(round))],
        )?;
        server.push(&scope, &beta.batch(tenant)?)?;
    }

    let entries = server.pull(&scope, tenant, Revision::ZERO, Some(50))?;
    let revisions: Vec<u64> = entries.iter().map(|e| e.revision.value()).collect();
    assert_eq!(revisions, (1..=6).collect::<Vec<u64>>());

    Ok(())
}

// ============================================================================
// Batch integrity
// ============================================================================

#[test]
fn tampered_batch_is_refused_before_ingest() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);
    let mut device = TestDevice::new();

    device.stage_upsert("patient", "42", vec![("name", FieldValue::Text("A".into()))])?;
    let mut batch = device.batch(tenant)?;
    batch.ops[0].entity = EntityKey::new("patient", "43");

    let result = server.push(&scope, &batch);
    assert!(matches!(result, Err(EngineError::BatchRejected(_))));
    assert_eq!(server.engine.storage().ledger_count(tenant)?, 0);

    Ok(())
}

#[test]
fn rejected_op_burns_no_revision() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = TestServer::new()?;
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);
    let device = TestDevice::new();

    // An upsert with no snapshot is invalid at the domain level; the
    // valid op behind it must still be ledgered, at revision 1.
    let broken = ClientOperation {
        op_id: OpId::new(),
        device_id: device.device_id(),
        actor_id: device.actor_id,
        facility_id: None,
        entity: EntityKey::new("patient", "1"),
        kind: OpKind::Upsert,
        client_updated_at: unix_millis_now()?,
        base_revision: None,
        snapshot: None,
    };
    let valid = ClientOperation {
        op_id: OpId::new(),
        device_id: device.device_id(),
        actor_id: device.actor_id,
        facility_id: None,
        entity: EntityKey::new("patient", "2"),
        kind: OpKind::Upsert,
        client_updated_at: unix_millis_now()?,
        base_revision: None,
        snapshot: Some(fieldsync_core::Snapshot::from_pairs(
            "patient",
            vec![("name", FieldValue::Text("B".into()))],
        )),
    };
    let batch = PushBatch::new_signed(&device.identity, tenant, vec![broken, valid])?;

    let outcomes = server.push(&scope, &batch)?;
    assert_eq!(outcomes[0].status, OpStatus::Rejected);
    assert!(outcomes[0].assigned_revision.is_none());
    assert_eq!(outcomes[1].status, OpStatus::Applied);
    assert_eq!(outcomes[1].assigned_revision, Some(Revision::new(1)));

    Ok(())
}

// ============================================================================
// Durability
// ============================================================================

#[test]
fn ledger_and_counter_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("central.db");
    let path = path.to_str().unwrap();
    let tenant = TenantId::new();
    let scope = CallerScope::tenant(tenant);
    let mut device = TestDevice::new();

    {
        let mut server = TestServer::open(path)?;
        device.stage_upsert("patient", "42", vec![("name", FieldValue::Text("A".into()))])?;
        server.push(&scope, &device.batch(tenant)?)?;
    }

    let mut server = TestServer::open(path)?;
    let entries = server.pull(&scope, tenant, Revision::ZERO, Some(10))?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].revision, Revision::new(1));

    device.stage_upsert("patient", "43", vec![("name", FieldValue::Text("B".into()))])?;
    let outcomes = server.push(&scope, &device.batch(tenant)?)?;
    assert_eq!(outcomes[0].assigned_revision, Some(Revision::new(2)));

    Ok(())
}
