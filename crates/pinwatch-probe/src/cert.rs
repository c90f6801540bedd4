//! Leaf certificate parsing.

use chrono::{DateTime, Utc};
use pinwatch_core::CertificateInfo;
use std::net::IpAddr;
use x509_parser::extensions::GeneralName;

use crate::error::{ProbeError, ProbeResult};
use crate::hash::fingerprint;

/// The parts of a server certificate the trust checks look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCertificate {
    /// First subject CN, if any
    pub common_name: Option<String>,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
    /// IP subject alternative names
    pub ip_addresses: Vec<IpAddr>,
    /// End of validity
    pub not_after: DateTime<Utc>,
    /// Base64 SHA-256 of the DER bytes
    pub fingerprint: String,
}

impl LeafCertificate {
    /// Parse a DER-encoded X.509 certificate.
    pub fn from_der(der: &[u8]) -> ProbeResult<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| ProbeError::Certificate(e.to_string()))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        // A malformed SAN extension is treated as absent.
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push((*dns).to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            common_name,
            dns_names,
            ip_addresses,
            not_after: asn1_to_utc(cert.validity().not_after),
            fingerprint: fingerprint(der),
        })
    }

    /// Fields recorded on the check result
    #[must_use]
    pub fn info(&self) -> CertificateInfo {
        CertificateInfo {
            common_name: self.common_name.clone(),
            not_after: self.not_after,
            fingerprint: self.fingerprint.clone(),
        }
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

/// Convert an ASN.1 `GeneralizedTime` / `UTCTime` to `DateTime<Utc>`.
///
/// Out-of-range times collapse to the earliest instant, so they read as expired.
fn asn1_to_utc(t: x509_parser::time::ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
