//! Share engine: token issuance, password-bound key wrapping, gated
//! access, and counted downloads
//!
//! A share wraps the file key under a key derived from the share
//! password; the server recovers the file key only while serving an
//! unlock, never at rest. Passwordless shares store no key material at
//! all and are served through an explicit `key=` parameter.

use crate::engine::files::FileEngine;
use crate::store::{files, shares, users, MetaStore};
use crate::{CoreError, Result};
use aegis_crypto::{
    derive_key, envelope, generate_salt, share_token, EnvelopeKey, FileCipher, FileKey,
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// How long a one-shot download grant stays valid
const GRANT_TTL_SECS: i64 = 5 * 60;

/// Request to publish a file behind a share token
pub struct CreateShareRequest {
    pub user_file_id: i64,
    /// The owner's account password, needed to unwrap the file key for
    /// this one transaction
    pub account_password: String,
    pub share_password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// −1 means unlimited
    pub max_downloads: i64,
    pub allowed_emails: Vec<String>,
    /// Opt in to storing a server-decryptable copy of the share password
    pub store_display_password: bool,
}

/// Who is knocking on a share endpoint
#[derive(Clone, Debug)]
pub struct AccessContext {
    pub ip: String,
    pub user_agent: Option<String>,
    /// Authenticated caller, when there is one
    pub user_id: Option<i64>,
    pub email: Option<String>,
}

/// Credential presented to the shared-download endpoint
pub enum ShareCredential {
    Password(String),
    /// Raw url-safe file key; only valid for passwordless shares
    RawKey(String),
    /// One-shot handle minted by a prior unlock
    Grant(String),
}

/// Public descriptor of a share; no ciphertext or key material
#[derive(Clone, Debug, serde::Serialize)]
pub struct PublicShareInfo {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub max_downloads: i64,
    pub download_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_password: bool,
}

/// Result of a successful unlock: a one-shot download handle
#[derive(Debug)]
pub struct ShareGrant {
    pub grant_token: String,
    pub download_count: i64,
}

/// Decrypted bytes ready to stream to the share recipient
#[derive(Debug)]
pub struct SharedDownload {
    pub plaintext: Bytes,
    pub filename: String,
    pub mime_type: String,
}

struct PendingGrant {
    share_token: String,
    file_key: FileKey,
    expires_at: DateTime<Utc>,
}

/// Share issuance, unlock and download dispatch
#[derive(Clone)]
pub struct ShareEngine {
    store: MetaStore,
    files: FileEngine,
    cipher: FileCipher,
    kdf_iterations: u32,
    /// Server-side key for the opt-in display-password column
    display_key: Option<EnvelopeKey>,
    /// One-shot grants live in process memory; they expire in minutes
    /// and a restart merely forces a fresh unlock
    grants: Arc<DashMap<String, PendingGrant>>,
}

impl ShareEngine {
    pub fn new(
        store: MetaStore,
        files: FileEngine,
        cipher: FileCipher,
        kdf_iterations: u32,
        display_key: Option<EnvelopeKey>,
    ) -> Self {
        Self {
            store,
            files,
            cipher,
            kdf_iterations,
            display_key,
            grants: Arc::new(DashMap::new()),
        }
    }

    /// Publish a file behind a fresh share token
    pub async fn create_share(
        &self,
        user_id: i64,
        req: CreateShareRequest,
    ) -> Result<shares::FileShare> {
        if req.max_downloads < -1 || req.max_downloads == 0 {
            return Err(CoreError::Validation(
                "max_downloads must be -1 (unlimited) or positive".into(),
            ));
        }
        if req.store_display_password && self.display_key.is_none() {
            return Err(CoreError::Validation(
                "display-password storage is not enabled on this server".into(),
            ));
        }
        if req.store_display_password && req.share_password.is_none() {
            return Err(CoreError::Validation(
                "display password requires a share password".into(),
            ));
        }

        let (user, file) = {
            let mut conn = self.store.pool().acquire().await?;
            let user = users::by_id(&mut conn, user_id)
                .await?
                .ok_or(CoreError::NotFound("user"))?;
            let file = files::live_by_id(&mut conn, req.user_file_id)
                .await?
                .ok_or(CoreError::NotFound("file"))?;
            if file.user_id != user_id {
                return Err(CoreError::Permission("not the file owner".into()));
            }
            (user, file)
        };

        // Recover the file key: password -> outer key -> envelope -> file key.
        // A failed envelope unwrap is a wrong password.
        let iterations = self.kdf_iterations;
        let account_password = req.account_password.clone();
        let salt = user.envelope_key_salt.clone();
        let outer = spawn_kdf(move || derive_key(&account_password, &salt, iterations)).await?;
        let envelope_key =
            envelope::unwrap_envelope_key(&user.envelope_key_wrapped, &user.envelope_key_iv, &outer)
                .map_err(|_| CoreError::Authentication)?;
        let file_key =
            envelope::unwrap_file_key(&file.wrapped_file_key, &file.file_key_iv, &envelope_key)?;

        // Seal the file key under the share password, when one is set
        let password_wrap = match &req.share_password {
            Some(share_password) => {
                let salt = generate_salt();
                let share_password = share_password.clone();
                let salt_vec = salt.to_vec();
                let share_key =
                    spawn_kdf(move || derive_key(&share_password, &salt_vec, iterations)).await?;
                let wrapped = envelope::wrap_key(file_key.as_bytes(), &share_key)?;
                Some((salt, wrapped))
            }
            None => None,
        };

        let display_wrap = if req.store_display_password {
            let key = self.display_key.as_ref().expect("checked above");
            let password = req.share_password.as_ref().expect("checked above");
            Some(envelope::wrap_bytes(password.as_bytes(), key)?)
        } else {
            None
        };

        let token = share_token();
        let allowed_emails = serde_json::to_string(&req.allowed_emails)
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let mut tx = self.store.begin().await?;
        let share = shares::insert(
            &mut tx,
            &shares::NewFileShare {
                user_file_id: file.id,
                share_token: &token,
                encrypted_file_key: password_wrap.as_ref().map(|(_, w)| w.ciphertext.as_slice()),
                salt: password_wrap.as_ref().map(|(salt, _)| salt.as_slice()),
                iv: password_wrap.as_ref().map(|(_, w)| w.iv.as_slice()),
                display_password_ct: display_wrap.as_ref().map(|w| w.ciphertext.as_slice()),
                display_password_iv: display_wrap.as_ref().map(|w| w.iv.as_slice()),
                max_downloads: req.max_downloads,
                expires_at: req.expires_at,
                allowed_emails: &allowed_emails,
            },
        )
        .await?;
        files::adjust_share_count(&mut tx, file.id, 1).await?;
        tx.commit().await?;

        tracing::info!(user_id, file_id = file.id, share_id = share.id, "share created");
        Ok(share)
    }

    /// Public descriptor for a share landing page
    pub async fn metadata(&self, token: &str) -> Result<PublicShareInfo> {
        let mut conn = self.store.pool().acquire().await?;
        let share = shares::by_token(&mut conn, token)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        if share.is_expired(Utc::now()) {
            return Err(CoreError::NotFound("share"));
        }
        let file = files::live_by_id(&mut conn, share.user_file_id)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        let blob = files::blob_by_id(&mut conn, file.blob_id)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        Ok(PublicShareInfo {
            filename: file.filename,
            mime_type: file.mime_type,
            size_bytes: blob.size_bytes,
            max_downloads: share.max_downloads,
            download_count: share.download_count,
            expires_at: share.expires_at,
            has_password: share.has_password(),
        })
    }

    /// Validate a share password and hand out a one-shot download grant.
    /// A successful unlock claims one download from the budget.
    pub async fn access(
        &self,
        token: &str,
        password: &str,
        ctx: &AccessContext,
    ) -> Result<ShareGrant> {
        let (share, _file, file_key) = self.unlock(token, password, ctx).await?;

        // Expired grants that were never redeemed die here
        let now = Utc::now();
        self.grants.retain(|_, grant| grant.expires_at > now);

        let mut conn = self.store.pool().acquire().await?;
        let download_count = shares::try_claim_download(&mut conn, share.id)
            .await?
            .ok_or(CoreError::Exhausted)?;
        drop(conn);

        let grant_token = share_token();
        self.grants.insert(
            grant_token.clone(),
            PendingGrant {
                share_token: token.to_string(),
                file_key,
                expires_at: Utc::now() + Duration::seconds(GRANT_TTL_SECS),
            },
        );
        Ok(ShareGrant {
            grant_token,
            download_count,
        })
    }

    /// Serve a shared download, decrypting server-side
    pub async fn download(
        &self,
        token: &str,
        credential: ShareCredential,
        ctx: &AccessContext,
    ) -> Result<SharedDownload> {
        match credential {
            ShareCredential::Grant(grant_token) => self.download_with_grant(token, &grant_token).await,
            ShareCredential::Password(password) => {
                let (share, file, file_key) = self.unlock(token, &password, ctx).await?;
                let mut conn = self.store.pool().acquire().await?;
                shares::try_claim_download(&mut conn, share.id)
                    .await?
                    .ok_or(CoreError::Exhausted)?;
                drop(conn);
                self.decrypt_for(&file, &file_key).await
            }
            ShareCredential::RawKey(encoded) => self.download_with_raw_key(token, &encoded, ctx).await,
        }
    }

    async fn download_with_grant(&self, token: &str, grant_token: &str) -> Result<SharedDownload> {
        let (_, grant) = self
            .grants
            .remove(grant_token)
            .ok_or(CoreError::NotFound("download grant"))?;
        if grant.share_token != token || grant.expires_at <= Utc::now() {
            return Err(CoreError::NotFound("download grant"));
        }
        let mut conn = self.store.pool().acquire().await?;
        let share = shares::by_token(&mut conn, token)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        let file = files::live_by_id(&mut conn, share.user_file_id)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        drop(conn);
        self.decrypt_for(&file, &grant.file_key).await
    }

    /// The raw-key path for passwordless shares. The key rides in a query
    /// parameter, which leaks into logs and referrers; kept for
    /// compatibility, warned about at every use.
    async fn download_with_raw_key(
        &self,
        token: &str,
        encoded: &str,
        ctx: &AccessContext,
    ) -> Result<SharedDownload> {
        tracing::warn!("shared download with raw key in query parameter");

        let mut conn = self.store.pool().acquire().await?;
        let share = shares::by_token(&mut conn, token)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        if share.is_expired(Utc::now()) {
            return Err(CoreError::NotFound("share"));
        }
        if share.has_password() {
            // Password shares never accept the raw-key shortcut
            return Err(CoreError::Authentication);
        }
        let file = files::live_by_id(&mut conn, share.user_file_id)
            .await?
            .ok_or(CoreError::NotFound("share"))?;

        self.check_email_acl(&mut conn, &share, ctx).await?;
        drop(conn);

        let key_bytes = aegis_crypto::decode_key(encoded)
            .map_err(|_| CoreError::Authentication)?;
        let file_key = FileKey::from_bytes(&key_bytes).map_err(|_| CoreError::Authentication)?;

        // Decrypt first: a wrong key must neither spend budget nor log
        // a successful access
        let download = self.decrypt_for(&file, &file_key).await?;

        let mut conn = self.store.pool().acquire().await?;
        shares::try_claim_download(&mut conn, share.id)
            .await?
            .ok_or(CoreError::Exhausted)?;
        shares::log_access(
            &mut conn,
            share.id,
            &ctx.ip,
            ctx.user_agent.as_deref(),
            true,
            None,
        )
        .await?;
        shares::record_shared_access(&mut conn, ctx.user_id, share.id).await?;

        Ok(download)
    }

    /// Steps 1-5 of the unlock protocol: rate limit, expiry, exhaustion,
    /// password, ACL, audit
    async fn unlock(
        &self,
        token: &str,
        password: &str,
        ctx: &AccessContext,
    ) -> Result<(shares::FileShare, files::UserFile, FileKey)> {
        let identifier = format!("{}:{}", ctx.ip, token);
        let now = Utc::now();

        let mut conn = self.store.pool().acquire().await?;
        if let Some(state) = shares::rate_limit_state(&mut conn, &identifier).await? {
            if let Some(until) = state.blocked_until {
                if until > now {
                    return Err(CoreError::RateLimited {
                        retry_after_secs: (until - now).num_seconds().max(1),
                    });
                }
            }
        }

        let share = shares::by_token(&mut conn, token)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        if share.is_expired(now) {
            return Err(CoreError::NotFound("share"));
        }
        if share.is_exhausted() {
            return Err(CoreError::Exhausted);
        }
        let file = files::live_by_id(&mut conn, share.user_file_id)
            .await?
            .ok_or(CoreError::NotFound("share"))?;

        let (Some(encrypted_file_key), Some(salt), Some(iv)) =
            (&share.encrypted_file_key, &share.salt, &share.iv)
        else {
            return Err(CoreError::Validation(
                "share is passwordless; use the key parameter".into(),
            ));
        };

        let iterations = self.kdf_iterations;
        let password_owned = password.to_string();
        let salt_owned = salt.clone();
        let share_key =
            spawn_kdf(move || derive_key(&password_owned, &salt_owned, iterations)).await?;

        let file_key = match envelope::unwrap_file_key(encrypted_file_key, iv, &share_key) {
            Ok(key) => key,
            Err(_) => {
                // Wrong password and tampered ciphertext look identical
                shares::log_access(
                    &mut conn,
                    share.id,
                    &ctx.ip,
                    ctx.user_agent.as_deref(),
                    false,
                    Some("invalid_password"),
                )
                .await?;
                let state = shares::rate_limit_record_failure(&mut conn, &identifier).await?;
                tracing::info!(
                    share_id = share.id,
                    attempts = state.attempt_count,
                    blocked = state.blocked_until.is_some(),
                    "share unlock failed"
                );
                return Err(CoreError::Authentication);
            }
        };

        self.check_email_acl(&mut conn, &share, ctx).await?;

        shares::log_access(
            &mut conn,
            share.id,
            &ctx.ip,
            ctx.user_agent.as_deref(),
            true,
            None,
        )
        .await?;
        shares::rate_limit_reset(&mut conn, &identifier).await?;
        shares::record_shared_access(&mut conn, ctx.user_id, share.id).await?;

        Ok((share, file, file_key))
    }

    async fn check_email_acl(
        &self,
        conn: &mut sqlx::SqliteConnection,
        share: &shares::FileShare,
        ctx: &AccessContext,
    ) -> Result<()> {
        let allowed = share.allowed_email_list();
        if allowed.is_empty() {
            return Ok(());
        }
        let permitted = ctx
            .email
            .as_deref()
            .is_some_and(|email| allowed.iter().any(|a| a.eq_ignore_ascii_case(email)));
        if !permitted {
            shares::log_access(
                conn,
                share.id,
                &ctx.ip,
                ctx.user_agent.as_deref(),
                false,
                Some("email_not_allowed"),
            )
            .await?;
            return Err(CoreError::Permission(
                "share is restricted to specific accounts".into(),
            ));
        }
        Ok(())
    }

    async fn decrypt_for(
        &self,
        file: &files::UserFile,
        file_key: &FileKey,
    ) -> Result<SharedDownload> {
        let mut conn = self.store.pool().acquire().await?;
        let blob = files::blob_by_id(&mut conn, file.blob_id)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        drop(conn);

        let sealed = self.files.blob_bytes(&blob).await?;
        let plaintext = self
            .cipher
            .open(file_key, &sealed)
            .map_err(|_| CoreError::Authentication)?;

        Ok(SharedDownload {
            plaintext: Bytes::from(plaintext),
            filename: file.filename.clone(),
            mime_type: file.mime_type.clone(),
        })
    }

    /// Tear a share down and release the file's share bookkeeping
    pub async fn revoke(&self, user_id: i64, share_id: i64) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let share = shares::by_id(&mut tx, share_id)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        let file = files::any_by_id(&mut tx, share.user_file_id)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        if file.user_id != user_id {
            return Err(CoreError::Permission("not the share owner".into()));
        }
        shares::delete(&mut tx, share_id).await?;
        files::adjust_share_count(&mut tx, file.id, -1).await?;
        tx.commit().await?;
        Ok(())
    }

    /// The owner's shares
    pub async fn list_for_owner(&self, user_id: i64) -> Result<Vec<shares::FileShare>> {
        let mut conn = self.store.pool().acquire().await?;
        shares::list_for_user(&mut conn, user_id).await
    }

    /// Shares the caller has successfully accessed
    pub async fn list_accessed(&self, user_id: i64) -> Result<Vec<shares::AccessedShare>> {
        let mut conn = self.store.pool().acquire().await?;
        shares::list_accessed_by_user(&mut conn, user_id).await
    }

    /// Reveal the stored display password to the share's owner
    pub async fn reveal_display_password(
        &self,
        user_id: i64,
        share_id: i64,
    ) -> Result<Option<String>> {
        let key = self
            .display_key
            .as_ref()
            .ok_or_else(|| {
                CoreError::Validation("display-password storage is not enabled".into())
            })?;

        let mut conn = self.store.pool().acquire().await?;
        let share = shares::by_id(&mut conn, share_id)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        let file = files::any_by_id(&mut conn, share.user_file_id)
            .await?
            .ok_or(CoreError::NotFound("share"))?;
        if file.user_id != user_id {
            return Err(CoreError::Permission("not the share owner".into()));
        }

        let (Some(ct), Some(iv)) = (&share.display_password_ct, &share.display_password_iv) else {
            return Ok(None);
        };
        let bytes = envelope::unwrap_bytes(ct, iv, key)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| CoreError::Internal(e.to_string()))
    }
}

/// Run a PBKDF2 derivation on the blocking pool
async fn spawn_kdf<F>(f: F) -> Result<EnvelopeKey>
where
    F: FnOnce() -> EnvelopeKey + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))
}
