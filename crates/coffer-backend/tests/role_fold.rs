//! Property tests: the realm role authority against a reference model.

use std::collections::HashMap;

use proptest::prelude::*;

use coffer_backend::core::{RealmId, RealmRole, RoleGrant, UserProfile};
use coffer_backend::perms::can_update_role;
use coffer_backend::sync::Status;
use coffer_backend::RealmError;
use coffer_testkit::generators::user_name;
use coffer_testkit::{role_ops, Organization, RoleOp};

const USERS: usize = 4;

/// Outcome of one op, as the model predicts it.
fn expected_status(model: &HashMap<usize, RealmRole>, op: &RoleOp) -> Option<Status> {
    if op.granter == op.target {
        return Some(Status::NotAllowed);
    }
    let existing = model.get(&op.target).copied();
    if !can_update_role(model.get(&op.granter).copied(), existing, op.role) {
        return Some(Status::NotAllowed);
    }
    if existing == op.role {
        return Some(Status::RoleAlreadyGranted);
    }
    None
}

async fn replay(ops: Vec<RoleOp>) -> Result<(), TestCaseError> {
    let org = Organization::new();
    let mut devices = Vec::with_capacity(USERS);
    for i in 0..USERS {
        let device = org
            .bootstrap_user(&user_name(i), UserProfile::Standard)
            .await
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        devices.push(device);
    }

    let realm = org.backend.realm();
    let realm_id = RealmId::new();
    realm
        .create(RoleGrant {
            realm_id,
            user_id: devices[0].device_id.user_id().clone(),
            role: Some(RealmRole::Owner),
            granted_by: Some(devices[0].device_id.clone()),
            granted_on: org.now(),
            certificate: Vec::new(),
        })
        .await
        .map_err(|e| TestCaseError::fail(e.to_string()))?;

    let mut model = HashMap::from([(0, RealmRole::Owner)]);
    for op in ops {
        let expected = expected_status(&model, &op);
        let result = realm
            .update_roles(
                RoleGrant {
                    realm_id,
                    user_id: devices[op.target].device_id.user_id().clone(),
                    role: op.role,
                    granted_by: Some(devices[op.granter].device_id.clone()),
                    granted_on: org.now(),
                    certificate: Vec::new(),
                },
                None,
            )
            .await;
        prop_assert_eq!(
            result.as_ref().err().map(RealmError::status),
            expected,
            "{:?} gave {:?}",
            op,
            result
        );
        if expected.is_none() {
            match op.role {
                Some(role) => model.insert(op.target, role),
                None => model.remove(&op.target),
            };
        }
    }

    let roles = realm
        .get_current_roles(&realm_id)
        .await
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    let expected: HashMap<_, _> = model
        .iter()
        .map(|(i, role)| (devices[*i].device_id.user_id().clone(), *role))
        .collect();
    prop_assert_eq!(roles, expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_role_changes_follow_the_model(ops in role_ops(USERS, 24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        runtime.block_on(replay(ops))?;
    }
}
