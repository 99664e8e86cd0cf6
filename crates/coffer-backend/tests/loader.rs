//! The client loader against a real backend: what it uploads, what it
//! accepts back, and what it refuses.

use std::sync::Arc;

use coffer_backend::core::{EntryId, RealmId, RealmRole, UserProfile};
use coffer_backend::perms::RemoteManifest;
use coffer_backend::store::{MemoryStore, RealmStore, VlobAtom};
use coffer_backend::sync::{BackendCmds, BlockAccess, FsError, LocalDevice, WorkspaceEntry};
use coffer_testkit::Organization;

async fn grant(
    org: &Organization,
    owner: &LocalDevice,
    realm_id: RealmId,
    device: &LocalDevice,
    role: RealmRole,
) -> anyhow::Result<()> {
    org.connect(owner)
        .await?
        .realm_update_roles(
            &org.role_certificate(owner, realm_id, device.device_id.user_id(), Some(role)),
            None,
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_manifest_versions_and_historical_view() -> anyhow::Result<()> {
    let org = Organization::new();
    let alice = org.bootstrap_user("alice", UserProfile::Admin).await?;
    let workspace = WorkspaceEntry::new(RealmId::new());
    let loader = org.loader(&alice, workspace.clone()).await?;
    loader.create_realm(&workspace.realm_id).await?;
    // Creating twice is harmless.
    loader.create_realm(&workspace.realm_id).await?;

    let entry_id = EntryId::new();
    let v1 = org.manifest(&alice, entry_id, 1, b"one");
    loader.upload_manifest(&entry_id, &v1).await?;
    let between = org.now();
    let v2 = org.manifest(&alice, entry_id, 2, b"two");
    loader.upload_manifest(&entry_id, &v2).await?;

    assert_eq!(loader.load_manifest(&entry_id, None, None, None).await?, v2);
    assert_eq!(loader.load_manifest(&entry_id, Some(1), None, None).await?, v1);
    assert_eq!(
        loader
            .load_manifest(&entry_id, None, Some(between), None)
            .await?,
        v1
    );
    assert_eq!(
        loader
            .load_manifest(&entry_id, Some(2), None, Some(v2.timestamp))
            .await?,
        v2
    );

    let versions = loader.list_versions(&entry_id).await?;
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[&1], (v1.timestamp, alice.device_id.clone()));
    assert_eq!(versions[&2], (v2.timestamp, alice.device_id.clone()));

    assert!(matches!(
        loader.load_manifest(&entry_id, Some(3), None, None).await,
        Err(FsError::RemoteManifestNotFoundBadVersion(_))
    ));
    assert!(matches!(
        loader
            .load_manifest(&entry_id, None, Some(v1.timestamp.add_millis(-1)), None)
            .await,
        Err(FsError::RemoteManifestNotFoundBadTimestamp(_))
    ));
    assert!(matches!(
        loader.load_manifest(&EntryId::new(), None, None, None).await,
        Err(FsError::RemoteManifestNotFound(_))
    ));
    assert!(matches!(
        loader
            .load_manifest(&entry_id, Some(1), Some(between), None)
            .await,
        Err(FsError::Other(_))
    ));

    let past = loader.to_timestamped(between);
    assert_eq!(past.pinned_at(), Some(between));
    assert_eq!(past.load_manifest(&entry_id, None, None, None).await?, v1);
    let v3 = org.manifest(&alice, entry_id, 3, b"three");
    assert!(matches!(
        past.upload_manifest(&entry_id, &v3).await,
        Err(FsError::ReadOnly(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_writers_conflict() -> anyhow::Result<()> {
    let org = Organization::new();
    let alice = org.bootstrap_user("alice", UserProfile::Admin).await?;
    let alice2 = org.new_device(&alice, "dev2").await?;
    let workspace = WorkspaceEntry::new(RealmId::new());
    let loader = org.loader(&alice, workspace.clone()).await?;
    let other = org.loader(&alice2, workspace.clone()).await?;
    loader.create_realm(&workspace.realm_id).await?;

    let entry_id = EntryId::new();
    let v1 = org.manifest(&alice, entry_id, 1, b"mine");
    loader.upload_manifest(&entry_id, &v1).await?;
    // A retry of the same creation is recognized.
    loader.upload_manifest(&entry_id, &v1).await?;

    let theirs = org.manifest(&alice2, entry_id, 1, b"theirs");
    assert!(matches!(
        other.upload_manifest(&entry_id, &theirs).await,
        Err(FsError::RemoteSyncError(id)) if id == entry_id
    ));

    loader
        .upload_manifest(&entry_id, &org.manifest(&alice, entry_id, 2, b"mine again"))
        .await?;
    let stale = org.manifest(&alice2, entry_id, 2, b"theirs again");
    assert!(matches!(
        other.upload_manifest(&entry_id, &stale).await,
        Err(FsError::RemoteSyncError(_))
    ));

    // Someone else's manifest cannot be uploaded as one's own.
    let forged = org.manifest(&alice2, entry_id, 3, b"forged");
    assert!(matches!(
        loader.upload_manifest(&entry_id, &forged).await,
        Err(FsError::Other(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_reader_cannot_write() -> anyhow::Result<()> {
    let org = Organization::new();
    let alice = org.bootstrap_user("alice", UserProfile::Admin).await?;
    let bob = org.new_user(&alice, "bob", UserProfile::Standard).await?;
    let workspace = WorkspaceEntry::new(RealmId::new());
    org.loader(&alice, workspace.clone())
        .await?
        .create_realm(&workspace.realm_id)
        .await?;
    grant(&org, &alice, workspace.realm_id, &bob, RealmRole::Reader).await?;

    let bob_loader = org.loader(&bob, workspace.clone()).await?;
    let entry_id = EntryId::new();
    assert!(matches!(
        bob_loader
            .upload_manifest(&entry_id, &org.manifest(&bob, entry_id, 1, b"nope"))
            .await,
        Err(FsError::NoWriteAccess(_))
    ));
    let access = BlockAccess::for_data(b"nope", 0);
    assert!(matches!(
        bob_loader.upload_block(&access, b"nope").await,
        Err(FsError::NoWriteAccess(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_manifest_from_reader_is_rejected() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let org = Organization::with_store(store.clone());
    let alice = org.bootstrap_user("alice", UserProfile::Admin).await?;
    let bob = org.new_user(&alice, "bob", UserProfile::Standard).await?;
    let workspace = WorkspaceEntry::new(RealmId::new());
    let loader = org.loader(&alice, workspace.clone()).await?;
    loader.create_realm(&workspace.realm_id).await?;
    grant(&org, &alice, workspace.realm_id, &bob, RealmRole::Reader).await?;

    // The server stores what a reader could never have written.
    let entry_id = EntryId::new();
    let manifest = RemoteManifest {
        entry_id,
        version: 1,
        author: bob.device_id.clone(),
        timestamp: org.now(),
        content: b"sneaky".to_vec(),
    };
    store
        .insert_vlob_atom(&VlobAtom {
            realm_id: workspace.realm_id,
            entry_id,
            encryption_revision: 1,
            version: 1,
            blob: manifest.dump_sign_and_encrypt(&bob.signing_key, &workspace.key)?,
            author: bob.device_id.clone(),
            timestamp: manifest.timestamp,
        })
        .await?;

    assert!(matches!(
        loader.load_manifest(&entry_id, None, None, None).await,
        Err(FsError::InvalidData(_))
    ));

    // Promoted afterwards: still too late for that manifest.
    grant(&org, &alice, workspace.realm_id, &bob, RealmRole::Contributor).await?;
    let fresh = org.loader(&alice, workspace.clone()).await?;
    assert!(matches!(
        fresh.load_manifest(&entry_id, None, None, None).await,
        Err(FsError::InvalidData(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_manifest_signed_by_someone_else_is_rejected() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let org = Organization::with_store(store.clone());
    let alice = org.bootstrap_user("alice", UserProfile::Admin).await?;
    let mallory = org.new_user(&alice, "mallory", UserProfile::Standard).await?;
    let workspace = WorkspaceEntry::new(RealmId::new());
    let loader = org.loader(&alice, workspace.clone()).await?;
    loader.create_realm(&workspace.realm_id).await?;

    // Claims alice as author, signed by mallory.
    let entry_id = EntryId::new();
    let manifest = org.manifest(&alice, entry_id, 1, b"forged");
    store
        .insert_vlob_atom(&VlobAtom {
            realm_id: workspace.realm_id,
            entry_id,
            encryption_revision: 1,
            version: 1,
            blob: manifest.dump_sign_and_encrypt(&mallory.signing_key, &workspace.key)?,
            author: alice.device_id.clone(),
            timestamp: manifest.timestamp,
        })
        .await?;

    assert!(matches!(
        loader.load_manifest(&entry_id, None, None, None).await,
        Err(FsError::InvalidData(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_blocks() -> anyhow::Result<()> {
    let org = Organization::new();
    let alice = org.bootstrap_user("alice", UserProfile::Admin).await?;
    let bob = org.new_user(&alice, "bob", UserProfile::Standard).await?;
    let carol = org.new_user(&alice, "carol", UserProfile::Standard).await?;
    let workspace = WorkspaceEntry::new(RealmId::new());
    let loader = org.loader(&alice, workspace.clone()).await?;
    loader.create_realm(&workspace.realm_id).await?;
    grant(&org, &alice, workspace.realm_id, &bob, RealmRole::Reader).await?;

    let data = b"the quick brown fox";
    let access = BlockAccess::for_data(data, 0);
    loader.upload_block(&access, data).await?;
    // Uploading again is a no-op.
    loader.upload_block(&access, data).await?;

    let bob_loader = org.loader(&bob, workspace.clone()).await?;
    bob_loader.load_blocks(std::slice::from_ref(&access)).await?;

    let mut tampered = access.clone();
    tampered.digest = coffer_backend::core::HashDigest::hash(b"something else");
    assert!(matches!(
        bob_loader.load_block(&tampered).await,
        Err(FsError::InvalidData(_))
    ));

    let missing = BlockAccess::for_data(b"never uploaded", 0);
    assert!(matches!(
        bob_loader.load_block(&missing).await,
        Err(FsError::RemoteBlockNotFound(_))
    ));

    let carol_loader = org.loader(&carol, workspace.clone()).await?;
    assert!(matches!(
        carol_loader.load_block(&access).await,
        Err(FsError::NoReadAccess(_))
    ));

    let stats = org
        .connect(&alice)
        .await?
        .realm_stats(&workspace.realm_id)
        .await?;
    assert!(stats.blocks_size > 0);
    Ok(())
}
