//! Configuration for the signing engine.

use crate::signatures::StampOptions;
use serde::Deserialize;

/// Signing engine configuration.
///
/// Deserializable so hosts can load it from JSON; missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SigningConfig {
    /// Validity of per-signature certificates, in years.
    pub certificate_validity_years: u32,

    /// Base URL of the web frontend (signing and verification links).
    pub frontend_base_url: String,

    /// What the visual stamp shows.
    pub stamp: StampOptions,

    /// Compare-and-swap attempts before a sign gives up.
    pub max_sign_attempts: u32,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SigningConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            certificate_validity_years: crate::signatures::DEFAULT_VALIDITY_YEARS,
            frontend_base_url: "http://localhost:3000".to_string(),
            stamp: StampOptions::default(),
            max_sign_attempts: 3,
        }
    }

    /// Set certificate validity in years.
    pub fn with_certificate_validity_years(mut self, years: u32) -> Self {
        self.certificate_validity_years = years;
        self
    }

    /// Set the frontend base URL.
    pub fn with_frontend_base_url(mut self, url: impl Into<String>) -> Self {
        self.frontend_base_url = url.into();
        self
    }

    /// Draw a QR code in the stamp.
    pub fn with_qr(mut self, enable: bool) -> Self {
        self.stamp.include_qr = enable;
        self
    }

    /// Show the organization name in the stamp.
    pub fn with_org_name(mut self, enable: bool) -> Self {
        self.stamp.include_org_name = enable;
        self
    }

    /// Set the number of compare-and-swap attempts per sign.
    pub fn with_max_sign_attempts(mut self, attempts: u32) -> Self {
        self.max_sign_attempts = attempts.max(1);
        self
    }

    /// `{frontend}/documents/{document}/sign/{signer}`.
    pub fn sign_link(&self, document_id: &str, signer_id: &str) -> String {
        format!(
            "{}/documents/{}/sign/{}",
            self.frontend_base_url.trim_end_matches('/'),
            document_id,
            signer_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SigningConfig::default();
        assert_eq!(config.certificate_validity_years, 5);
        assert!(config.stamp.include_qr);
        assert!(config.stamp.include_org_name);
    }

    #[test]
    fn test_builders() {
        let config = SigningConfig::new()
            .with_certificate_validity_years(2)
            .with_frontend_base_url("https://app.example.com/")
            .with_qr(false)
            .with_max_sign_attempts(0);
        assert_eq!(config.certificate_validity_years, 2);
        assert!(!config.stamp.include_qr);
        assert_eq!(config.max_sign_attempts, 1);
        assert_eq!(config.sign_link("d1", "e1"), "https://app.example.com/documents/d1/sign/e1");
    }

    #[test]
    fn test_partial_json() {
        let config: SigningConfig =
            serde_json::from_str(r#"{"certificateValidityYears": 10, "stamp": {"includeQr": false}}"#).unwrap();
        assert_eq!(config.certificate_validity_years, 10);
        assert!(!config.stamp.include_qr);
        assert!(config.stamp.include_org_name);
        assert_eq!(config.max_sign_attempts, 3);
    }
}
