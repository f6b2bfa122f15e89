//! Per-event key pairs and self-signed certificates.
//!
//! Every signing event gets a fresh Ed25519 key pair and a self-signed X.509
//! certificate naming the signer and their organization. The private key
//! lives only inside [`IssuedCertificate`] and is consumed by
//! [`IssuedCertificate::sign_once`]; nothing is ever persisted.

use super::types::{CertificateInfo, CertificateValidity};
use crate::error::{Error, Result};
use crate::workflow::model::SignerIdentity;
use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};
use ed25519_dalek::pkcs8::{EncodePrivateKey, KeypairBytes};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};

/// Default certificate validity.
pub const DEFAULT_VALIDITY_YEARS: u32 = 5;

/// OID of the Ed25519 public key algorithm.
const ED25519_OID: &str = "1.3.101.112";

/// A freshly issued key pair and certificate for one signing event.
pub struct IssuedCertificate {
    signing_key: SigningKey,
    certificate_der: Vec<u8>,
    info: CertificateInfo,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("subject", &self.info.subject)
            .field("serial_number", &self.info.serial_number)
            .finish_non_exhaustive()
    }
}

impl IssuedCertificate {
    /// Public half of the key pair.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// DER-encoded certificate.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// Certificate facts for the evidence metadata.
    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    /// Sign `message` and drop the private key.
    pub fn sign_once(self, message: &[u8]) -> (Signature, Vec<u8>) {
        let signature = self.signing_key.sign(message);
        (signature, self.certificate_der)
    }
}

/// Issues [`IssuedCertificate`]s.
#[derive(Debug, Clone, Copy)]
pub struct KeyCertificateProvider {
    validity_years: u32,
}

impl Default for KeyCertificateProvider {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDITY_YEARS)
    }
}

impl KeyCertificateProvider {
    /// Provider issuing certificates valid for `validity_years` (at least 1).
    pub fn new(validity_years: u32) -> Self {
        Self {
            validity_years: validity_years.max(1),
        }
    }

    /// Configured validity in years.
    pub fn validity_years(&self) -> u32 {
        self.validity_years
    }

    /// Issue a key pair and certificate for `signer`, valid from today.
    pub fn issue(&self, signer: &SignerIdentity) -> Result<IssuedCertificate> {
        self.issue_at(signer, Utc::now())
    }

    /// Issue a key pair and certificate valid from the day of `now`.
    pub fn issue_at(&self, signer: &SignerIdentity, now: DateTime<Utc>) -> Result<IssuedCertificate> {
        let signing_key = SigningKey::generate(&mut OsRng);

        // rcgen only needs the key to self-sign; hand it over as PKCS#8 v1.
        let pkcs8 = KeypairBytes {
            secret_key: signing_key.to_bytes(),
            public_key: None,
        }
        .to_pkcs8_der()
        .map_err(|e| Error::Certificate(format!("failed to encode signing key: {}", e)))?;
        let key_pair = KeyPair::try_from(pkcs8.as_bytes())
            .map_err(|e| Error::Certificate(format!("failed to load signing key: {}", e)))?;

        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, signer.display_name.as_str());
        if !signer.organization_name.is_empty() {
            name.push(DnType::OrganizationName, signer.organization_name.as_str());
        }

        let today = now.date_naive();
        let expiry = add_years(today, self.validity_years);

        let mut params = CertificateParams::default();
        params.distinguished_name = name;
        params.not_before = rcgen::date_time_ymd(today.year(), today.month() as u8, today.day() as u8);
        params.not_after = rcgen::date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);
        params.serial_number = Some(random_serial());

        let certificate = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Certificate(format!("failed to self-sign certificate: {}", e)))?;
        let certificate_der = certificate.der().to_vec();
        let info = parse_certificate_info(&certificate_der)?;

        log::debug!(
            "issued certificate {} for {} valid until {}",
            info.serial_number,
            info.subject,
            info.validity.not_after
        );
        Ok(IssuedCertificate {
            signing_key,
            certificate_der,
            info,
        })
    }
}

/// Same day `years` later; 29 February maps to 28 February.
fn add_years(date: NaiveDate, years: u32) -> NaiveDate {
    let year = date.year() + years as i32;
    NaiveDate::from_ymd_opt(year, date.month(), date.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, date.month(), 28))
        .unwrap_or(date)
}

/// Positive 128-bit serial from a v4 UUID.
fn random_serial() -> SerialNumber {
    let mut bytes = *uuid::Uuid::new_v4().as_bytes();
    bytes[0] &= 0x7F;
    SerialNumber::from_slice(&bytes)
}

fn parse_der(der: &[u8]) -> Result<x509_parser::certificate::X509Certificate<'_>> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| Error::Certificate(format!("invalid certificate: {}", e)))?;
    Ok(cert)
}

fn format_asn1_time(time: &x509_parser::time::ASN1Time) -> String {
    DateTime::<Utc>::from_timestamp(time.timestamp(), 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| time.to_string())
}

/// Extract subject, issuer, validity and serial from a DER certificate.
pub fn parse_certificate_info(der: &[u8]) -> Result<CertificateInfo> {
    let cert = parse_der(der)?;
    let validity = cert.validity();
    Ok(CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        validity: CertificateValidity {
            not_before: format_asn1_time(&validity.not_before),
            not_after: format_asn1_time(&validity.not_after),
        },
        serial_number: cert.raw_serial_as_string(),
    })
}

/// Ed25519 public key carried by a DER certificate.
pub fn certificate_public_key(der: &[u8]) -> Result<VerifyingKey> {
    let cert = parse_der(der)?;
    let spki = cert.public_key();
    let algorithm = spki.algorithm.algorithm.to_id_string();
    if algorithm != ED25519_OID {
        return Err(Error::Certificate(format!(
            "unsupported public key algorithm {}",
            algorithm
        )));
    }
    let raw: [u8; 32] = spki
        .subject_public_key
        .data
        .as_ref()
        .try_into()
        .map_err(|_| Error::Certificate("Ed25519 public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&raw).map_err(|e| Error::Certificate(format!("invalid public key: {}", e)))
}

/// Check an Ed25519 `signature` over `message` against the key in a certificate.
pub fn verify_with_certificate(certificate_der: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    let key = certificate_public_key(certificate_der)?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| Error::Certificate(format!("malformed signature: {}", e)))?;
    key.verify(message, &signature)
        .map_err(|e| Error::Certificate(format!("signature does not verify: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Role;
    use chrono::TimeZone;

    fn signer() -> SignerIdentity {
        SignerIdentity {
            employee_id: "emp-1".into(),
            role: Role::Employee,
            organization_id: "org-1".into(),
            organization_name: "Acme Corp".into(),
            display_name: "Ada Lovelace".into(),
            email: "ada@acme.test".into(),
        }
    }

    #[test]
    fn test_issue_binds_identity() {
        let issued = KeyCertificateProvider::default().issue(&signer()).unwrap();
        let info = issued.info();
        assert!(info.subject.contains("CN=Ada Lovelace"));
        assert!(info.subject.contains("O=Acme Corp"));
        assert_eq!(info.subject, info.issuer);
        assert!(!info.serial_number.is_empty());
    }

    #[test]
    fn test_validity_window() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 30, 0).unwrap();
        let issued = KeyCertificateProvider::new(3).issue_at(&signer(), now).unwrap();
        assert!(issued.info().validity.not_before.starts_with("2026-03-10"));
        assert!(issued.info().validity.not_after.starts_with("2029-03-10"));
    }

    #[test]
    fn test_leap_day_expiry() {
        let leap = NaiveDate::from_ymd_opt(2028, 2, 29).unwrap();
        assert_eq!(add_years(leap, 5), NaiveDate::from_ymd_opt(2033, 2, 28).unwrap());
    }

    #[test]
    fn test_fresh_key_per_event() {
        let provider = KeyCertificateProvider::default();
        let a = provider.issue(&signer()).unwrap();
        let b = provider.issue(&signer()).unwrap();
        assert_ne!(a.verifying_key(), b.verifying_key());
        assert_ne!(a.info().serial_number, b.info().serial_number);
    }

    #[test]
    fn test_certificate_carries_signing_key() {
        let issued = KeyCertificateProvider::default().issue(&signer()).unwrap();
        let expected = issued.verifying_key();
        assert_eq!(certificate_public_key(issued.certificate_der()).unwrap(), expected);

        let (signature, der) = issued.sign_once(b"payload");
        verify_with_certificate(&der, b"payload", &signature.to_bytes()).unwrap();
        assert!(verify_with_certificate(&der, b"tampered", &signature.to_bytes()).is_err());
    }

    #[test]
    fn test_garbage_certificate_rejected() {
        assert!(matches!(parse_certificate_info(b"not a certificate"), Err(Error::Certificate(_))));
    }
}
