use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::{error::AppError, utils::config::AppConfig};

/// Issues and checks time-limited download links for Blob Store objects.
#[derive(Clone, Debug)]
pub struct UrlSigner {
    secret: String,
    ttl_secs: u64,
    base_url: String,
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>, ttl_secs: u64, base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.signing_secret.clone(),
            config.signed_url_ttl_secs,
            config.public_base_url.clone(),
        )
    }

    fn signature(&self, path: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b":");
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(expires.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Download URL for `path`, valid for the configured TTL.
    pub fn sign(&self, path: &str) -> String {
        let expires = Utc::now().timestamp() + i64::try_from(self.ttl_secs).unwrap_or(i64::MAX / 2);
        self.sign_with_expiry(path, expires)
    }

    pub fn sign_with_expiry(&self, path: &str, expires: i64) -> String {
        format!(
            "{}/api/v1/files/{}?expires={}&signature={}",
            self.base_url,
            path.trim_start_matches('/'),
            expires,
            self.signature(path.trim_start_matches('/'), expires)
        )
    }

    pub fn verify(&self, path: &str, expires: i64, signature: &str) -> Result<(), AppError> {
        if expires < Utc::now().timestamp() {
            return Err(AppError::Auth("Signed URL has expired".to_string()));
        }
        if self.signature(path.trim_start_matches('/'), expires) != signature {
            return Err(AppError::Auth("Invalid signature".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_param<'a>(url: &'a str, key: &str) -> &'a str {
        url.split(['?', '&'])
            .find_map(|pair| pair.strip_prefix(&format!("{key}=")))
            .expect("param present")
    }

    #[test]
    fn signed_urls_verify_until_they_expire() {
        let signer = UrlSigner::new("secret", 60, "https://docs.example.com/");
        let url = signer.sign("user-1/col-1/1700000000000-report.pdf");

        assert!(url.starts_with(
            "https://docs.example.com/api/v1/files/user-1/col-1/1700000000000-report.pdf?expires="
        ));

        let expires: i64 = query_param(&url, "expires").parse().expect("expires");
        let signature = query_param(&url, "signature");
        signer
            .verify("user-1/col-1/1700000000000-report.pdf", expires, signature)
            .expect("valid signature");

        assert!(matches!(
            signer.verify("user-1/col-1/other.pdf", expires, signature),
            Err(AppError::Auth(_))
        ));
        assert!(matches!(
            UrlSigner::new("other", 60, "").verify(
                "user-1/col-1/1700000000000-report.pdf",
                expires,
                signature
            ),
            Err(AppError::Auth(_))
        ));
    }

    #[test]
    fn expired_links_are_rejected() {
        let signer = UrlSigner::new("secret", 60, "");
        let expires = Utc::now().timestamp() - 1;
        let url = signer.sign_with_expiry("a/b.txt", expires);
        assert!(url.starts_with("/api/v1/files/a/b.txt?"));

        let signature = query_param(&url, "signature");
        assert!(matches!(
            signer.verify("a/b.txt", expires, signature),
            Err(AppError::Auth(_))
        ));
    }
}
