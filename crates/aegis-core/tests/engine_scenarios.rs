//! End-to-end engine scenarios over an in-memory store

use aegis_blobstore::MemoryBlobStore;
use aegis_core::store::{files, rotation, shares, users, MetaStore};
use aegis_core::{
    AccessContext, CoreError, CreateShareRequest, FileEngine, IngestRequest, KeyRotationEngine,
    ShareCredential, ShareEngine,
};
use aegis_crypto::{
    derive_key, envelope, generate_salt, hash_password, EnvelopeKey, FileCipher, FileKey,
};
use bytes::Bytes;
use chrono::{Duration, Utc};
use std::sync::Arc;

// Fast KDF for tests; production minimums are enforced in config
const ITERS: u32 = 1_000;

struct Vault {
    store: MetaStore,
    files: FileEngine,
    shares: ShareEngine,
    rotation: KeyRotationEngine,
}

async fn vault() -> Vault {
    let store = MetaStore::in_memory().await.unwrap();
    let blobs = Arc::new(MemoryBlobStore::new());
    let files = FileEngine::new(store.clone(), blobs, false);
    let shares = ShareEngine::new(
        store.clone(),
        files.clone(),
        FileCipher::NaclSecretbox,
        ITERS,
        Some(EnvelopeKey::generate()),
    );
    let rotation = KeyRotationEngine::new(store.clone(), ITERS);
    Vault {
        store,
        files,
        shares,
        rotation,
    }
}

struct TestUser {
    id: i64,
    envelope: EnvelopeKey,
}

async fn create_user(store: &MetaStore, username: &str, password: &str, quota: i64) -> TestUser {
    let envelope = EnvelopeKey::generate();
    let salt = generate_salt();
    let outer = derive_key(password, &salt, ITERS);
    let wrapped = envelope::wrap_key(envelope.as_bytes(), &outer).unwrap();

    let mut conn = store.pool().acquire().await.unwrap();
    let user = users::insert(
        &mut conn,
        &users::NewUser {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: hash_password(password, ITERS),
            storage_quota: quota,
            is_admin: false,
            envelope_key_wrapped: wrapped.ciphertext,
            envelope_key_salt: salt.to_vec(),
            envelope_key_iv: wrapped.iv.to_vec(),
        },
    )
    .await
    .unwrap();
    TestUser {
        id: user.id,
        envelope,
    }
}

/// Seal plaintext under a fresh file key and wrap that key for the user,
/// the way a client prepares an upload
fn client_seal(envelope_key: &EnvelopeKey, plaintext: &[u8]) -> (Bytes, FileKey, Vec<u8>, Vec<u8>) {
    let file_key = FileKey::generate();
    let sealed = FileCipher::NaclSecretbox.seal(&file_key, plaintext).unwrap();
    let wrapped = envelope::wrap_key(file_key.as_bytes(), envelope_key).unwrap();
    (
        Bytes::from(sealed),
        file_key,
        wrapped.ciphertext,
        wrapped.iv.to_vec(),
    )
}

fn upload_request(
    filename: &str,
    ciphertext: Bytes,
    wrapped_file_key: Vec<u8>,
    file_key_iv: Vec<u8>,
) -> IngestRequest {
    IngestRequest {
        filename: filename.to_string(),
        mime_type: "application/octet-stream".to_string(),
        folder_id: None,
        ciphertext,
        wrapped_file_key,
        file_key_iv,
    }
}

fn anon_ctx(ip: &str) -> AccessContext {
    AccessContext {
        ip: ip.to_string(),
        user_agent: Some("test-agent".to_string()),
        user_id: None,
        email: None,
    }
}

async fn used_storage(store: &MetaStore, user_id: i64) -> i64 {
    let mut conn = store.pool().acquire().await.unwrap();
    users::by_id(&mut conn, user_id)
        .await
        .unwrap()
        .unwrap()
        .used_storage
}

#[tokio::test]
async fn dedup_across_users_shares_one_blob() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw-alice", 1 << 20).await;
    let bob = create_user(&v.store, "bob", "pw-bob", 1 << 20).await;

    // Both clients happen to produce the identical ciphertext (same file
    // key sealed once); each wraps the file key under their own envelope
    let file_key = FileKey::generate();
    let sealed = Bytes::from(
        FileCipher::NaclSecretbox
            .seal(&file_key, b"hello, ")
            .unwrap(),
    );
    let ct_len = sealed.len() as i64;

    let wrap_a = envelope::wrap_key(file_key.as_bytes(), &alice.envelope).unwrap();
    let wrap_b = envelope::wrap_key(file_key.as_bytes(), &bob.envelope).unwrap();
    assert_ne!(wrap_a.ciphertext, wrap_b.ciphertext);

    let file_a = v
        .files
        .ingest(
            alice.id,
            upload_request("hello.txt", sealed.clone(), wrap_a.ciphertext, wrap_a.iv.to_vec()),
        )
        .await
        .unwrap();
    assert_eq!(used_storage(&v.store, alice.id).await, ct_len);

    let file_b = v
        .files
        .ingest(
            bob.id,
            upload_request("greeting.txt", sealed, wrap_b.ciphertext, wrap_b.iv.to_vec()),
        )
        .await
        .unwrap();

    // One blob, two user files, independent quota accounting
    assert_eq!(file_a.blob_id, file_b.blob_id);
    assert_ne!(file_a.id, file_b.id);
    assert_eq!(used_storage(&v.store, alice.id).await, ct_len);
    assert_eq!(used_storage(&v.store, bob.id).await, ct_len);

    let mut conn = v.store.pool().acquire().await.unwrap();
    assert_eq!(files::blob_reference_count(&mut conn, file_a.blob_id).await.unwrap(), 2);
}

#[tokio::test]
async fn duplicate_upload_by_same_user_conflicts() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw", 1 << 20).await;
    let (sealed, _, wrapped, iv) = client_seal(&alice.envelope, b"once only");

    v.files
        .ingest(
            alice.id,
            upload_request("a.bin", sealed.clone(), wrapped.clone(), iv.clone()),
        )
        .await
        .unwrap();
    let err = v
        .files
        .ingest(alice.id, upload_request("b.bin", sealed, wrapped, iv))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn quota_enforced_on_ingest_and_restore() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw", 100).await;

    let (small, _, wk, iv) = client_seal(&alice.envelope, b"x");
    let file = v
        .files
        .ingest(alice.id, upload_request("small.bin", small, wk, iv))
        .await
        .unwrap();

    // A second upload that would push past 100 bytes is refused
    let (big, _, wk2, iv2) = client_seal(&alice.envelope, &[0u8; 80]);
    let err = v
        .files
        .ingest(alice.id, upload_request("big.bin", big.clone(), wk2.clone(), iv2.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::QuotaExceeded));

    // Trash frees the quota; the big upload then fits
    v.files.soft_delete(alice.id, file.id).await.unwrap();
    assert_eq!(used_storage(&v.store, alice.id).await, 0);
    v.files
        .ingest(alice.id, upload_request("big.bin", big, wk2, iv2))
        .await
        .unwrap();

    // Restoring the small file would exceed the quota again
    let err = v.files.restore(alice.id, file.id).await.unwrap_err();
    assert!(matches!(err, CoreError::QuotaExceeded));
}

#[tokio::test]
async fn owner_download_roundtrips_plaintext() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw", 1 << 20).await;
    let (sealed, _, wk, iv) = client_seal(&alice.envelope, b"attachment body");
    let file = v
        .files
        .ingest(alice.id, upload_request("doc.pdf", sealed, wk, iv))
        .await
        .unwrap();

    let download = v.files.download(alice.id, file.id).await.unwrap();
    // Client-side unwrap and open
    let file_key = envelope::unwrap_file_key(
        &download.wrapped_file_key,
        &download.file_key_iv,
        &alice.envelope,
    )
    .unwrap();
    let plaintext = FileCipher::NaclSecretbox
        .open(&file_key, &download.data)
        .unwrap();
    assert_eq!(plaintext, b"attachment body");
}

#[tokio::test]
async fn password_share_exhausts_after_max_downloads() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw-owner", 1 << 20).await;
    let (sealed, _, wk, iv) = client_seal(&alice.envelope, b"shared payload");
    let file = v
        .files
        .ingest(alice.id, upload_request("f.bin", sealed, wk, iv))
        .await
        .unwrap();

    let share = v
        .shares
        .create_share(
            alice.id,
            CreateShareRequest {
                user_file_id: file.id,
                account_password: "pw-owner".to_string(),
                share_password: Some("hunter2!Aaaa!".to_string()),
                expires_at: None,
                max_downloads: 2,
                allowed_emails: vec![],
                store_display_password: false,
            },
        )
        .await
        .unwrap();

    let ctx = anon_ctx("203.0.113.5");
    let grant1 = v
        .shares
        .access(&share.share_token, "hunter2!Aaaa!", &ctx)
        .await
        .unwrap();
    assert_eq!(grant1.download_count, 1);
    let grant2 = v
        .shares
        .access(&share.share_token, "hunter2!Aaaa!", &ctx)
        .await
        .unwrap();
    assert_eq!(grant2.download_count, 2);

    // Third unlock is refused; the counter stays at the cap
    let err = v
        .shares
        .access(&share.share_token, "hunter2!Aaaa!", &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Exhausted));

    let mut conn = v.store.pool().acquire().await.unwrap();
    let row = shares::by_id(&mut conn, share.id).await.unwrap().unwrap();
    assert_eq!(row.download_count, 2);
    drop(conn);

    // Claimed grants still redeem without consuming more budget
    let dl = v
        .shares
        .download(
            &share.share_token,
            ShareCredential::Grant(grant1.grant_token),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(dl.plaintext.as_ref(), b"shared payload");
}

#[tokio::test]
async fn share_unlock_yields_owner_plaintext() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw-owner", 1 << 20).await;
    let (sealed, _, wk, iv) = client_seal(&alice.envelope, b"round trip law");
    let file = v
        .files
        .ingest(alice.id, upload_request("law.txt", sealed, wk, iv))
        .await
        .unwrap();

    let share = v
        .shares
        .create_share(
            alice.id,
            CreateShareRequest {
                user_file_id: file.id,
                account_password: "pw-owner".to_string(),
                share_password: Some("s3cret".to_string()),
                expires_at: None,
                max_downloads: -1,
                allowed_emails: vec![],
                store_display_password: false,
            },
        )
        .await
        .unwrap();

    let dl = v
        .shares
        .download(
            &share.share_token,
            ShareCredential::Password("s3cret".to_string()),
            &anon_ctx("203.0.113.9"),
        )
        .await
        .unwrap();
    assert_eq!(dl.plaintext.as_ref(), b"round trip law");
    assert_eq!(dl.filename, "law.txt");
}

#[tokio::test]
async fn rate_limit_blocks_sixth_attempt_and_correct_password() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw-owner", 1 << 20).await;
    let (sealed, _, wk, iv) = client_seal(&alice.envelope, b"guarded");
    let file = v
        .files
        .ingest(alice.id, upload_request("g.bin", sealed, wk, iv))
        .await
        .unwrap();
    let share = v
        .shares
        .create_share(
            alice.id,
            CreateShareRequest {
                user_file_id: file.id,
                account_password: "pw-owner".to_string(),
                share_password: Some("right-password".to_string()),
                expires_at: None,
                max_downloads: -1,
                allowed_emails: vec![],
                store_display_password: false,
            },
        )
        .await
        .unwrap();

    let ctx = anon_ctx("198.51.100.7");
    for _ in 0..5 {
        let err = v
            .shares
            .access(&share.share_token, "wrong-password", &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Authentication));
    }

    // Sixth attempt lands inside the block
    let err = v
        .shares
        .access(&share.share_token, "wrong-password", &ctx)
        .await
        .unwrap_err();
    let CoreError::RateLimited { retry_after_secs } = err else {
        panic!("expected rate limit, got {err:?}");
    };
    assert!(retry_after_secs > 0);

    // The correct password does not bypass an active block
    let err = v
        .shares
        .access(&share.share_token, "right-password", &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::RateLimited { .. }));

    // A different address is unaffected
    v.shares
        .access(&share.share_token, "right-password", &anon_ctx("192.0.2.1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_share_is_indistinguishable_from_absent() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw-owner", 1 << 20).await;
    let (sealed, _, wk, iv) = client_seal(&alice.envelope, b"stale");
    let file = v
        .files
        .ingest(alice.id, upload_request("s.bin", sealed, wk, iv))
        .await
        .unwrap();
    let share = v
        .shares
        .create_share(
            alice.id,
            CreateShareRequest {
                user_file_id: file.id,
                account_password: "pw-owner".to_string(),
                share_password: Some("pw".to_string()),
                expires_at: Some(Utc::now() - Duration::seconds(1)),
                max_downloads: -1,
                allowed_emails: vec![],
                store_display_password: false,
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        v.shares.metadata(&share.share_token).await.unwrap_err(),
        CoreError::NotFound(_)
    ));
    assert!(matches!(
        v.shares
            .access(&share.share_token, "pw", &anon_ctx("203.0.113.2"))
            .await
            .unwrap_err(),
        CoreError::NotFound(_)
    ));
}

#[tokio::test]
async fn email_restricted_share_requires_listed_account() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw-owner", 1 << 20).await;
    let (sealed, _, wk, iv) = client_seal(&alice.envelope, b"for bob only");
    let file = v
        .files
        .ingest(alice.id, upload_request("b.bin", sealed, wk, iv))
        .await
        .unwrap();
    let share = v
        .shares
        .create_share(
            alice.id,
            CreateShareRequest {
                user_file_id: file.id,
                account_password: "pw-owner".to_string(),
                share_password: Some("pw".to_string()),
                expires_at: None,
                max_downloads: -1,
                allowed_emails: vec!["bob@example.com".to_string()],
                store_display_password: false,
            },
        )
        .await
        .unwrap();

    // Anonymous caller with the right password is still turned away
    let err = v
        .shares
        .access(&share.share_token, "pw", &anon_ctx("203.0.113.3"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Permission(_)));

    // A caller authenticated as the listed email gets through
    let bob_ctx = AccessContext {
        ip: "203.0.113.4".to_string(),
        user_agent: None,
        user_id: None,
        email: Some("Bob@Example.com".to_string()),
    };
    v.shares.access(&share.share_token, "pw", &bob_ctx).await.unwrap();
}

#[tokio::test]
async fn passwordless_share_serves_raw_key_download() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw-owner", 1 << 20).await;
    let (sealed, file_key, wk, iv) = client_seal(&alice.envelope, b"zero knowledge");
    let file = v
        .files
        .ingest(alice.id, upload_request("z.bin", sealed, wk, iv))
        .await
        .unwrap();
    let share = v
        .shares
        .create_share(
            alice.id,
            CreateShareRequest {
                user_file_id: file.id,
                account_password: "pw-owner".to_string(),
                share_password: None,
                expires_at: None,
                max_downloads: -1,
                allowed_emails: vec![],
                store_display_password: false,
            },
        )
        .await
        .unwrap();
    assert!(share.encrypted_file_key.is_none());

    let dl = v
        .shares
        .download(
            &share.share_token,
            ShareCredential::RawKey(aegis_crypto::encode_key(file_key.as_bytes())),
            &anon_ctx("203.0.113.6"),
        )
        .await
        .unwrap();
    assert_eq!(dl.plaintext.as_ref(), b"zero knowledge");

    // A wrong key fails like a wrong password would
    let err = v
        .shares
        .download(
            &share.share_token,
            ShareCredential::RawKey(aegis_crypto::encode_key(&[0u8; 32])),
            &anon_ctx("203.0.113.6"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Authentication));
}

// ---- rotation -----------------------------------------------------------

async fn upload_n_files(v: &Vault, user: &TestUser, n: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let (sealed, _, wk, iv) = client_seal(&user.envelope, format!("file #{i}").as_bytes());
        let file = v
            .files
            .ingest(user.id, upload_request(&format!("f{i}.bin"), sealed, wk, iv))
            .await
            .unwrap();
        ids.push(file.id);
    }
    ids
}

#[tokio::test]
async fn rotation_rewraps_every_file_under_new_envelope() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "old-pw", 1 << 20).await;
    let ids = upload_n_files(&v, &alice, 10).await;

    let progress = v
        .rotation
        .rotate(alice.id, "old-pw", "new-pw")
        .await
        .unwrap();
    assert_eq!(progress.status, "COMPLETED");
    assert_eq!(progress.total_files, 10);
    assert_eq!(progress.files_processed, 10);

    let mut conn = v.store.pool().acquire().await.unwrap();
    let user = users::by_id(&mut conn, alice.id).await.unwrap().unwrap();
    assert_eq!(user.envelope_key_version, 2);

    // The full client chain works with the new password
    let outer = derive_key("new-pw", &user.envelope_key_salt, ITERS);
    let new_envelope =
        envelope::unwrap_envelope_key(&user.envelope_key_wrapped, &user.envelope_key_iv, &outer)
            .unwrap();
    for id in ids {
        let file = files::any_by_id(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(file.key_version, 2);
        envelope::unwrap_file_key(&file.wrapped_file_key, &file.file_key_iv, &new_envelope)
            .unwrap();
    }

    // Backups are cleared after completion
    let backups = rotation::backups_for_rotation(&mut conn, &progress.rotation_id)
        .await
        .unwrap();
    assert!(backups.is_empty());
}

#[tokio::test]
async fn concurrent_rotation_attempt_conflicts() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "old-pw", 1 << 20).await;
    upload_n_files(&v, &alice, 2).await;

    // Plant a live rotation row, as a crashed run would leave behind
    let new_envelope = EnvelopeKey::generate();
    let salt = generate_salt();
    let outer = derive_key("new-pw", &salt, ITERS);
    let wrapped = envelope::wrap_key(new_envelope.as_bytes(), &outer).unwrap();
    let mut conn = v.store.pool().acquire().await.unwrap();
    rotation::insert(
        &mut conn,
        &rotation::NewKeyRotation {
            rotation_id: "11111111-2222-3333-4444-555555555555",
            user_id: alice.id,
            old_version: 1,
            new_version: 2,
            total_files: 2,
            new_envelope_wrapped: &wrapped.ciphertext,
            new_envelope_salt: &salt,
            new_envelope_iv: &wrapped.iv,
        },
    )
    .await
    .unwrap();
    drop(conn);

    let err = v
        .rotation
        .rotate(alice.id, "old-pw", "another-pw")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn interrupted_rotation_resumes_without_double_rewrap() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "old-pw", 1 << 20).await;
    let ids = upload_n_files(&v, &alice, 50).await;

    // Recreate the state a run killed after 23 files leaves behind:
    // a live rotation row plus 23 rewrapped files with backups
    let new_envelope = EnvelopeKey::generate();
    let new_salt = generate_salt();
    let new_outer = derive_key("new-pw", &new_salt, ITERS);
    let wrapped_new = envelope::wrap_key(new_envelope.as_bytes(), &new_outer).unwrap();
    let rotation_id = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";

    let mut conn = v.store.pool().acquire().await.unwrap();
    rotation::insert(
        &mut conn,
        &rotation::NewKeyRotation {
            rotation_id,
            user_id: alice.id,
            old_version: 1,
            new_version: 2,
            total_files: 50,
            new_envelope_wrapped: &wrapped_new.ciphertext,
            new_envelope_salt: &new_salt,
            new_envelope_iv: &wrapped_new.iv,
        },
    )
    .await
    .unwrap();

    for &id in &ids[..23] {
        let file = files::any_by_id(&mut conn, id).await.unwrap().unwrap();
        let file_key =
            envelope::unwrap_file_key(&file.wrapped_file_key, &file.file_key_iv, &alice.envelope)
                .unwrap();
        rotation::insert_backup(
            &mut conn,
            rotation_id,
            id,
            &file.wrapped_file_key,
            &file.file_key_iv,
            file.key_version,
        )
        .await
        .unwrap();
        let rewrapped = envelope::wrap_key(file_key.as_bytes(), &new_envelope).unwrap();
        files::set_wrapped_key(&mut conn, id, &rewrapped.ciphertext, &rewrapped.iv, 2)
            .await
            .unwrap();
        rotation::increment_processed(&mut conn, rotation_id).await.unwrap();
    }

    // Snapshot the wraps of the already-processed prefix
    let mut snapshot = Vec::new();
    for &id in &ids[..23] {
        let file = files::any_by_id(&mut conn, id).await.unwrap().unwrap();
        snapshot.push((file.wrapped_file_key.clone(), file.file_key_iv.clone()));
    }
    drop(conn);

    let progress = v
        .rotation
        .resume(alice.id, "old-pw", "new-pw")
        .await
        .unwrap();
    assert_eq!(progress.status, "COMPLETED");
    assert_eq!(progress.files_processed, 50);

    let mut conn = v.store.pool().acquire().await.unwrap();
    for (i, &id) in ids[..23].iter().enumerate() {
        let file = files::any_by_id(&mut conn, id).await.unwrap().unwrap();
        // Byte-equal: the resumed run never rewrapped the prefix
        assert_eq!(file.wrapped_file_key, snapshot[i].0);
        assert_eq!(file.file_key_iv, snapshot[i].1);
    }
    for &id in &ids {
        let file = files::any_by_id(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(file.key_version, 2);
        envelope::unwrap_file_key(&file.wrapped_file_key, &file.file_key_iv, &new_envelope)
            .unwrap();
    }
    let user = users::by_id(&mut conn, alice.id).await.unwrap().unwrap();
    assert_eq!(user.envelope_key_version, 2);
}

#[tokio::test]
async fn failed_rotation_rolls_back_byte_exact() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "old-pw", 1 << 20).await;
    let ids = upload_n_files(&v, &alice, 10).await;

    // Snapshot the original wraps and user envelope
    let mut conn = v.store.pool().acquire().await.unwrap();
    let mut original = Vec::new();
    for &id in &ids {
        let file = files::any_by_id(&mut conn, id).await.unwrap().unwrap();
        original.push((file.wrapped_file_key.clone(), file.file_key_iv.clone()));
    }
    let user_before = users::by_id(&mut conn, alice.id).await.unwrap().unwrap();

    // Corrupt file 7 so the rotation dies there after processing six
    sqlx::query("UPDATE user_files SET wrapped_file_key = ? WHERE id = ?")
        .bind(vec![0u8; 48])
        .bind(ids[6])
        .execute(&mut *conn)
        .await
        .unwrap();
    drop(conn);

    let err = v
        .rotation
        .rotate(alice.id, "old-pw", "new-pw")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Crypto(_)));

    let mut conn = v.store.pool().acquire().await.unwrap();
    let run = rotation::live_for_user(&mut conn, alice.id).await.unwrap();
    assert!(run.is_none(), "failed rotation must not stay live");
    let (rotation_id,): (String,) =
        sqlx::query_as("SELECT rotation_id FROM key_rotations WHERE user_id = ?")
            .bind(alice.id)
            .fetch_one(&mut *conn)
            .await
            .unwrap();
    let row = rotation::by_id(&mut conn, &rotation_id).await.unwrap().unwrap();
    assert_eq!(row.status, "FAILED");
    assert_eq!(row.files_processed, 6);
    drop(conn);

    let progress = v.rotation.rollback(alice.id, &rotation_id).await.unwrap();
    assert_eq!(progress.status, "ROLLED_BACK");

    let mut conn = v.store.pool().acquire().await.unwrap();
    for (i, &id) in ids.iter().enumerate() {
        if i == 6 {
            continue; // the corrupted row was never touched
        }
        let file = files::any_by_id(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(file.wrapped_file_key, original[i].0, "file {i} wrap restored");
        assert_eq!(file.file_key_iv, original[i].1, "file {i} iv restored");
        assert_eq!(file.key_version, 1);
    }
    let user_after = users::by_id(&mut conn, alice.id).await.unwrap().unwrap();
    assert_eq!(user_after.envelope_key_wrapped, user_before.envelope_key_wrapped);
    assert_eq!(user_after.envelope_key_version, 1);
}

// ---- trash and GC -------------------------------------------------------

#[tokio::test]
async fn purge_collects_blob_only_when_last_reference_drops() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw-a", 1 << 20).await;
    let bob = create_user(&v.store, "bob", "pw-b", 1 << 20).await;

    let file_key = FileKey::generate();
    let sealed = Bytes::from(FileCipher::NaclSecretbox.seal(&file_key, b"shared bytes").unwrap());
    let wrap_a = envelope::wrap_key(file_key.as_bytes(), &alice.envelope).unwrap();
    let wrap_b = envelope::wrap_key(file_key.as_bytes(), &bob.envelope).unwrap();

    let fa = v
        .files
        .ingest(alice.id, upload_request("a.bin", sealed.clone(), wrap_a.ciphertext, wrap_a.iv.to_vec()))
        .await
        .unwrap();
    let fb = v
        .files
        .ingest(bob.id, upload_request("b.bin", sealed, wrap_b.ciphertext, wrap_b.iv.to_vec()))
        .await
        .unwrap();
    let blob_id = fa.blob_id;

    // Alice purges; Bob still references the blob, so it survives
    v.files.soft_delete(alice.id, fa.id).await.unwrap();
    v.files.purge(alice.id, fa.id).await.unwrap();
    let mut conn = v.store.pool().acquire().await.unwrap();
    assert!(files::blob_by_id(&mut conn, blob_id).await.unwrap().is_some());
    drop(conn);

    // Bob can still download
    let dl = v.files.download(bob.id, fb.id).await.unwrap();
    let fk = envelope::unwrap_file_key(&dl.wrapped_file_key, &dl.file_key_iv, &bob.envelope).unwrap();
    assert_eq!(
        FileCipher::NaclSecretbox.open(&fk, &dl.data).unwrap(),
        b"shared bytes"
    );

    // Last reference gone: the blob is collected
    v.files.soft_delete(bob.id, fb.id).await.unwrap();
    v.files.purge(bob.id, fb.id).await.unwrap();
    let mut conn = v.store.pool().acquire().await.unwrap();
    assert!(files::blob_by_id(&mut conn, blob_id).await.unwrap().is_none());
}

#[tokio::test]
async fn reupload_after_trash_resurrects_binding() {
    let v = vault().await;
    let alice = create_user(&v.store, "alice", "pw", 1 << 20).await;
    let (sealed, _, wk, iv) = client_seal(&alice.envelope, b"come back");

    let first = v
        .files
        .ingest(alice.id, upload_request("v1.bin", sealed.clone(), wk.clone(), iv.clone()))
        .await
        .unwrap();
    v.files.soft_delete(alice.id, first.id).await.unwrap();

    let second = v
        .files
        .ingest(alice.id, upload_request("v2.bin", sealed, wk, iv))
        .await
        .unwrap();
    assert_eq!(second.id, first.id, "trashed binding is resurrected, not duplicated");
    assert_eq!(second.filename, "v2.bin");
    assert!(second.deleted_at.is_none());
}
