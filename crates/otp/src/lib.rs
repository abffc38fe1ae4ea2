//! Time-windowed one-time codes.
//!
//! Secrets are base32 (RFC 4648, unpadded) strings, the format authenticator
//! apps expect. Codes use SHA1 over `step_secs` windows; `skew` adjacent
//! windows on either side of the current one are also accepted.

use std::time::{SystemTime, UNIX_EPOCH};

use {
    parley_config::OtpConfig,
    rand::Rng,
    secrecy::{ExposeSecret, SecretString},
    totp_rs::{Algorithm, Secret, TOTP},
    tracing::{debug, warn},
};

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("invalid secret: {0}")]
    InvalidSecret(String),
    #[error("failed to build provisioning uri: {0}")]
    Provisioning(String),
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Generates secrets, provisioning descriptors and codes; verifies codes.
#[derive(Debug, Clone)]
pub struct OtpEngine {
    digits: usize,
    step: u64,
    skew: u8,
    secret_bytes: usize,
    issuer_prefix: String,
}

impl Default for OtpEngine {
    fn default() -> Self {
        Self::new(&OtpConfig::default())
    }
}

/// Code lengths authenticator apps accept.
const DIGITS_RANGE: std::ops::RangeInclusive<usize> = 6..=8;

/// Shortest secret, in bytes, that `otpauth` provisioning accepts (128 bits).
const MIN_SECRET_BYTES: usize = 16;

impl OtpEngine {
    /// Build an engine, pulling out-of-range settings back to the nearest
    /// value a provisioning URI can carry.
    pub fn new(config: &OtpConfig) -> Self {
        let digits = config
            .digits
            .clamp(*DIGITS_RANGE.start(), *DIGITS_RANGE.end());
        if digits != config.digits {
            warn!(configured = config.digits, using = digits, "otp.digits out of range");
        }
        let secret_bytes = config.secret_bytes.max(MIN_SECRET_BYTES);
        if secret_bytes != config.secret_bytes {
            warn!(
                configured = config.secret_bytes,
                using = secret_bytes,
                "otp.secret_bytes too short"
            );
        }
        Self {
            digits,
            step: config.step_secs.max(1),
            skew: config.skew,
            secret_bytes,
            issuer_prefix: config.issuer_prefix.clone(),
        }
    }

    /// A fresh random base32 secret.
    pub fn generate_secret(&self) -> SecretString {
        let mut bytes = vec![0u8; self.secret_bytes];
        rand::rng().fill(bytes.as_mut_slice());
        SecretString::new(Secret::Raw(bytes).to_encoded().to_string())
    }

    /// Build the `otpauth://` enrollment string for a client.
    ///
    /// The issuer is `<issuer_prefix>-<alias>`. Colons are not allowed in
    /// either label and are replaced.
    pub fn provisioning_uri(
        &self,
        secret: &SecretString,
        client_id: &str,
        alias: &str,
    ) -> Result<String, OtpError> {
        let issuer = sanitize_label(&format!("{}-{alias}", self.issuer_prefix));
        let totp = TOTP::new(
            Algorithm::SHA1,
            self.digits,
            self.skew,
            self.step,
            decode_secret(secret)?,
            Some(issuer),
            sanitize_label(client_id),
        )
        .map_err(|e| OtpError::Provisioning(e.to_string()))?;
        Ok(totp.get_url())
    }

    /// The code for the window containing `timestamp`.
    pub fn code_at(&self, secret: &SecretString, timestamp: u64) -> Result<String, OtpError> {
        Ok(self.totp(decode_secret(secret)?).generate(timestamp))
    }

    /// Check `code` against `secret` for the window containing `timestamp`.
    ///
    /// Malformed codes and undecodable secrets verify as false.
    pub fn verify(&self, secret: &SecretString, code: &str, timestamp: u64) -> bool {
        if code.len() != self.digits || !code.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        match decode_secret(secret) {
            Ok(bytes) => self.totp(bytes).check(code, timestamp),
            Err(e) => {
                debug!(error = %e, "cannot verify code against undecodable secret");
                false
            },
        }
    }

    // Labels only matter for provisioning, so verification skips the
    // secret-length and label checks `TOTP::new` enforces.
    fn totp(&self, secret: Vec<u8>) -> TOTP {
        TOTP::new_unchecked(
            Algorithm::SHA1,
            self.digits,
            self.skew,
            self.step,
            secret,
            None,
            String::new(),
        )
    }
}

fn decode_secret(secret: &SecretString) -> Result<Vec<u8>, OtpError> {
    Secret::Encoded(secret.expose_secret().trim().to_uppercase())
        .to_bytes()
        .map_err(|e| OtpError::InvalidSecret(e.to_string()))
}

fn sanitize_label(label: &str) -> String {
    label.replace(':', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 1_700_000_000;

    fn secret() -> SecretString {
        SecretString::new("JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP".into())
    }

    #[test]
    fn generated_secret_is_base32() {
        let engine = OtpEngine::default();
        let s = engine.generate_secret();
        // 20 raw bytes encode to 32 base32 characters.
        assert_eq!(s.expose_secret().len(), 32);
        assert!(decode_secret(&s).is_ok());
    }

    #[test]
    fn code_verifies_within_its_window() {
        let engine = OtpEngine::default();
        let code = engine.code_at(&secret(), T).unwrap();
        assert_eq!(code.len(), 6);
        assert!(engine.verify(&secret(), &code, T));
        assert!(engine.verify(&secret(), &code, T + 29));
    }

    #[test]
    fn adjacent_window_is_tolerated() {
        let engine = OtpEngine::default();
        let code = engine.code_at(&secret(), T).unwrap();
        assert!(engine.verify(&secret(), &code, T + 30));
    }

    #[test]
    fn expired_code_is_rejected() {
        let engine = OtpEngine::default();
        let code = engine.code_at(&secret(), T).unwrap();
        assert!(!engine.verify(&secret(), &code, T + 301));
    }

    #[test]
    fn out_of_range_config_still_provisions() {
        let engine = OtpEngine::new(&OtpConfig {
            digits: 4,
            secret_bytes: 8,
            ..Default::default()
        });
        let fresh = engine.generate_secret();
        assert!(engine.provisioning_uri(&fresh, "carol", "Carol").is_ok());
        let code = engine.code_at(&fresh, T).unwrap();
        assert_eq!(code.len(), 6);
        assert!(engine.verify(&fresh, &code, T));

        let long = OtpEngine::new(&OtpConfig {
            digits: 12,
            ..Default::default()
        });
        assert_eq!(long.code_at(&secret(), T).unwrap().len(), 8);
    }

    #[test]
    fn known_answer_for_fixed_secret() {
        let engine = OtpEngine::default();
        assert_eq!(engine.code_at(&secret(), T).unwrap(), "406058");
        assert_eq!(engine.code_at(&secret(), T + 30).unwrap(), "661763");
    }

    #[test]
    fn code_for_other_secret_is_rejected() {
        let engine = OtpEngine::default();
        let other = SecretString::new("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ".into());
        let code = engine.code_at(&other, T).unwrap();
        assert_eq!(code, "921300");
        assert!(!engine.verify(&secret(), &code, T));
    }

    #[test]
    fn malformed_codes_are_rejected() {
        let engine = OtpEngine::default();
        assert!(!engine.verify(&secret(), "12345", T));
        assert!(!engine.verify(&secret(), "1234567", T));
        assert!(!engine.verify(&secret(), "abcdef", T));
        assert!(!engine.verify(&secret(), "", T));
    }

    #[test]
    fn undecodable_secret_never_verifies() {
        let engine = OtpEngine::default();
        let bad = SecretString::new("not base32 !!".into());
        assert!(!engine.verify(&bad, "123456", T));
        assert!(engine.code_at(&bad, T).is_err());
    }

    #[test]
    fn provisioning_uri_names_issuer_and_account() {
        let engine = OtpEngine::default();
        let uri = engine.provisioning_uri(&secret(), "bob", "Bobby").unwrap();
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("direct_message-Bobby"));
        assert!(uri.contains("bob"));
        assert!(uri.contains("secret=JBSWY3DPEHPK3PXP"));
    }

    #[test]
    fn provisioning_uri_tolerates_colons() {
        let engine = OtpEngine::default();
        assert!(engine.provisioning_uri(&secret(), "team:bob", "a:b").is_ok());
    }
}
