use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Result;
use base64::Engine;
use hmac::Mac;
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

type HmacSha256 = hmac::Hmac<sha2::Sha256>;

/// Integration providers with secrets in the vault.
pub const PROVIDERS: &[&str] = &["datadog", "github", "slack"];

/// Per-tenant secret store. Values are encrypted at rest; rows are keyed
/// `{org_id}_{provider}_{secret_type}` (e.g. `org1_datadog_api_key`).
pub struct SecretsVault {
    db: Arc<Mutex<Connection>>,
    cipher: Aes256Gcm,
}

/// Derive a 256-bit encryption key from machine-specific identifiers.
/// Uses HMAC-SHA256(hostname + username, "opswatch-vault-v1") so the key is
/// stable across restarts but tied to the local machine/user.
fn derive_key() -> [u8; 32] {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();
    let input = format!("{}{}", hostname, username);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"opswatch-vault-v1")
        .expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    let result = mac.finalize();
    let bytes = result.into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    key
}

fn secret_key(org_id: &str, provider: &str, secret_type: &str) -> String {
    format!("{}_{}_{}", org_id, provider, secret_type)
}

impl SecretsVault {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        let key = derive_key();
        let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key is valid for AES-256");
        Self { db, cipher }
    }

    pub async fn initialize(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS secrets_vault (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Encrypt a plaintext value. Returns base64(nonce || ciphertext).
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a base64(nonce || ciphertext) value. Returns plaintext.
    fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("Base64 decode failed: {}", e))?;

        if combined.len() < 13 {
            return Err(anyhow::anyhow!("Encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("UTF-8 decode failed: {}", e))
    }

    pub async fn store_secret(
        &self,
        org_id: &str,
        provider: &str,
        secret_type: &str,
        value: &str,
    ) -> Result<()> {
        let encrypted = self.encrypt(value)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO secrets_vault (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            (secret_key(org_id, provider, secret_type), &encrypted),
        )?;
        Ok(())
    }

    pub async fn get_secret(
        &self,
        org_id: &str,
        provider: &str,
        secret_type: &str,
    ) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT value FROM secrets_vault WHERE key = ?1")?;
        let mut rows = stmt.query([secret_key(org_id, provider, secret_type)])?;

        if let Some(row) = rows.next()? {
            let stored: String = row.get(0)?;
            Ok(Some(self.decrypt(&stored)?))
        } else {
            Ok(None)
        }
    }

    pub async fn delete_secret(
        &self,
        org_id: &str,
        provider: &str,
        secret_type: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "DELETE FROM secrets_vault WHERE key = ?1",
            [secret_key(org_id, provider, secret_type)],
        )?;
        Ok(())
    }

    /// Which secret types exist for a tenant/provider pair. Names only,
    /// never values.
    pub async fn list_secret_types(&self, org_id: &str, provider: &str) -> Result<Vec<String>> {
        let prefix = format!("{}_{}_", org_id, provider);
        let db = self.db.lock().await;
        // substr comparison instead of LIKE: the keys themselves contain
        // underscores, which LIKE treats as wildcards.
        let mut stmt = db.prepare(
            "SELECT key FROM secrets_vault WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map([&prefix], |row| row.get::<_, String>(0))?;

        let mut types = Vec::new();
        for key in rows {
            let key = key?;
            types.push(key[prefix.len()..].to_string());
        }
        Ok(types)
    }

    /// Remove every secret for a tenant/provider pair. Returns the number of
    /// rows deleted.
    pub async fn delete_provider(&self, org_id: &str, provider: &str) -> Result<usize> {
        let prefix = format!("{}_{}_", org_id, provider);
        let db = self.db.lock().await;
        let deleted = db.execute(
            "DELETE FROM secrets_vault WHERE substr(key, 1, length(?1)) = ?1",
            [&prefix],
        )?;
        Ok(deleted)
    }
}
