//! Reencryption maintenance, driven by a client loader against the backend.

use std::collections::HashMap;

use coffer_backend::core::{EntryId, RealmId, RealmRole, UserId, UserProfile};
use coffer_backend::perms::{RekeyMessage, SecretKey};
use coffer_backend::sync::{BackendCmds, BlockAccess, FsError, LocalDevice, Status, WorkspaceEntry};
use coffer_backend::BackendEvent;
use coffer_testkit::Organization;

/// Alice owns a fresh workspace, bob reads it.
async fn shared_workspace(
    org: &Organization,
) -> anyhow::Result<(LocalDevice, LocalDevice, WorkspaceEntry)> {
    let alice = org.bootstrap_user("alice", UserProfile::Admin).await?;
    let bob = org.new_user(&alice, "bob", UserProfile::Standard).await?;
    let workspace = WorkspaceEntry::new(RealmId::new());

    let loader = org.loader(&alice, workspace.clone()).await?;
    loader.create_realm(&workspace.realm_id).await?;
    org.connect(&alice)
        .await?
        .realm_update_roles(
            &org.role_certificate(
                &alice,
                workspace.realm_id,
                bob.device_id.user_id(),
                Some(RealmRole::Reader),
            ),
            None,
        )
        .await?;
    Ok((alice, bob, workspace))
}

#[tokio::test]
async fn test_full_reencryption_cycle() -> anyhow::Result<()> {
    let org = Organization::new();
    let (alice, bob, workspace) = shared_workspace(&org).await?;
    let realm_id = workspace.realm_id;
    let loader = org.loader(&alice, workspace.clone()).await?;
    let bob_loader = org.loader(&bob, workspace.clone()).await?;

    let entry_id = EntryId::new();
    loader
        .upload_manifest(&entry_id, &org.manifest(&alice, entry_id, 1, b"draft"))
        .await?;
    loader
        .upload_manifest(&entry_id, &org.manifest(&alice, entry_id, 2, b"final"))
        .await?;
    let access = BlockAccess::for_data(b"block data", 0);
    loader.upload_block(&access, b"block data").await?;

    let mut events = org.backend.subscribe_events();
    let new_key = SecretKey::generate();
    let job = loader.start_reencryption(new_key.clone()).await?;

    assert_eq!(
        events.recv().await?,
        BackendEvent::RealmMaintenanceStarted {
            author: alice.device_id.clone(),
            realm_id,
            encryption_revision: 2,
        }
    );
    let mut recipients = Vec::new();
    for _ in 0..2 {
        match events.recv().await? {
            BackendEvent::MessageReceived { recipient, .. } => recipients.push(recipient),
            other => panic!("unexpected event {:?}", other),
        }
    }
    recipients.sort();
    assert_eq!(
        recipients,
        vec![alice.device_id.user_id().clone(), bob.device_id.user_id().clone()]
    );

    // Vlobs are frozen, blocks stay readable.
    assert!(matches!(
        loader.load_manifest(&entry_id, None, None, None).await,
        Err(FsError::InMaintenance(_))
    ));
    let other = BlockAccess::for_data(b"more", 0);
    assert!(matches!(
        loader.upload_block(&other, b"more").await,
        Err(FsError::InMaintenance(_))
    ));
    bob_loader.load_block(&access).await?;

    // Nothing moved yet.
    let alice_cmds = org.connect(&alice).await?;
    let err = alice_cmds
        .realm_finish_reencryption_maintenance(&realm_id, 2)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::MaintenanceError));

    let progress = job.run_to_completion(1).await?;
    assert_eq!((progress.done, progress.total), (2, 2));
    loader.finish_reencryption(&job).await?;

    let status = alice_cmds.realm_status(&realm_id).await?;
    assert!(!status.in_maintenance());
    assert_eq!(status.encryption_revision, 2);
    assert_eq!(loader.workspace_entry().await.encryption_revision, 2);

    let latest = loader.load_manifest(&entry_id, None, None, None).await?;
    assert_eq!(latest.version, 2);
    assert_eq!(latest.content, b"final".to_vec());
    let first = loader.load_manifest(&entry_id, Some(1), None, None).await?;
    assert_eq!(first.content, b"draft".to_vec());

    // Bob's loader keeps the old key until the re-key message is opened.
    assert!(matches!(
        bob_loader.load_manifest(&entry_id, None, None, None).await,
        Err(FsError::BadEncryptionRevision(_))
    ));
    let inbox = org.connect(&bob).await?.message_get(0).await?;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].sender, alice.device_id);
    let rekey = RekeyMessage::open(&inbox[0].body, &bob.private_key)?;
    assert_eq!(rekey.realm_id, realm_id);
    assert_eq!(rekey.encryption_revision, 2);
    assert_eq!(rekey.key, new_key);

    bob_loader.set_workspace_entry(workspace.rekeyed(rekey.key)).await;
    let seen_by_bob = bob_loader.load_manifest(&entry_id, None, None, None).await?;
    assert_eq!(seen_by_bob, latest);
    Ok(())
}

fn messages(users: &[&UserId]) -> HashMap<UserId, Vec<u8>> {
    users
        .iter()
        .map(|user_id| ((*user_id).clone(), b"sealed".to_vec()))
        .collect()
}

#[tokio::test]
async fn test_start_is_checked() -> anyhow::Result<()> {
    let org = Organization::new();
    let (alice, bob, workspace) = shared_workspace(&org).await?;
    let realm_id = workspace.realm_id;
    let alice_cmds = org.connect(&alice).await?;
    let bob_cmds = org.connect(&bob).await?;
    let alice_id = alice.device_id.user_id().clone();
    let bob_id = bob.device_id.user_id().clone();

    // Readers cannot start a maintenance.
    let err = bob_cmds
        .realm_start_reencryption_maintenance(&realm_id, 2, org.now(), messages(&[&alice_id, &bob_id]))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::NotAllowed));

    let err = alice_cmds
        .realm_start_reencryption_maintenance(&realm_id, 3, org.now(), messages(&[&alice_id, &bob_id]))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::BadEncryptionRevision));

    // Bob is missing.
    let err = alice_cmds
        .realm_start_reencryption_maintenance(&realm_id, 2, org.now(), messages(&[&alice_id]))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::ParticipantsMismatch));

    // Carol holds no role.
    let carol = org.new_user(&alice, "carol", UserProfile::Standard).await?;
    let carol_id = carol.device_id.user_id().clone();
    let err = alice_cmds
        .realm_start_reencryption_maintenance(
            &realm_id,
            2,
            org.now(),
            messages(&[&alice_id, &bob_id, &carol_id]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::ParticipantsMismatch));

    // Once revoked, bob is no longer a participant.
    org.revoke_user(&alice, &bob_id).await?;
    alice_cmds
        .realm_start_reencryption_maintenance(&realm_id, 2, org.now(), messages(&[&alice_id]))
        .await?;

    let err = alice_cmds
        .realm_start_reencryption_maintenance(&realm_id, 2, org.now(), messages(&[&alice_id]))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::InMaintenance));

    let err = alice_cmds
        .realm_finish_reencryption_maintenance(&realm_id, 3)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::BadEncryptionRevision));

    // An empty realm is reencrypted as soon as it starts.
    alice_cmds
        .realm_finish_reencryption_maintenance(&realm_id, 2)
        .await?;
    let err = alice_cmds
        .realm_finish_reencryption_maintenance(&realm_id, 2)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::NotInMaintenance));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_starts_admit_one() -> anyhow::Result<()> {
    let org = Organization::new();
    let alice = org.bootstrap_user("alice", UserProfile::Admin).await?;
    let alice_cmds = org.connect(&alice).await?;
    let realm_id = RealmId::new();
    alice_cmds
        .realm_create(&org.realm_root_certificate(&alice, realm_id))
        .await?;

    let sealed = messages(&[alice.device_id.user_id()]);
    let (first, second) = tokio::join!(
        alice_cmds.realm_start_reencryption_maintenance(&realm_id, 2, org.now(), sealed.clone()),
        alice_cmds.realm_start_reencryption_maintenance(&realm_id, 2, org.now(), sealed.clone()),
    );

    let statuses: Vec<_> = [first, second]
        .into_iter()
        .map(|result| result.err().and_then(|e| e.status()))
        .collect();
    assert_eq!(statuses.iter().filter(|status| status.is_none()).count(), 1);
    assert!(statuses.contains(&Some(Status::InMaintenance)));

    let inbox = alice_cmds.message_get(0).await?;
    assert_eq!(inbox.len(), 1);
    Ok(())
}
