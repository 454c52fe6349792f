// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

//! Credential model for the device provisioning client.
//!
//! A [`SecurityProvider`] holds the device identity used to enroll with the
//! provisioning service. There is one variant per credential kind; the
//! registration task selects its authentication path by matching on it once.

use std::io::{Error, ErrorKind};
use std::sync::Arc;

/// Transport security context established for one registration attempt and
/// reused by every service call within it.
pub type TlsConnector = hyper_openssl::HttpsConnector<hyper::client::HttpConnector>;

pub enum SecurityProvider {
    /// Certificate-based identity: the device authenticates with its identity
    /// cert at the TLS layer.
    X509(X509Security),

    /// Symmetric-key or TPM identity: the device authenticates with a SAS
    /// token countersigned by the secure module.
    Tpm(TpmSecurity),
}

impl SecurityProvider {
    pub fn registration_id(&self) -> &str {
        match self {
            SecurityProvider::X509(x509) => &x509.registration_id,
            SecurityProvider::Tpm(tpm) => &tpm.registration_id,
        }
    }

    pub fn is_certificate_based(&self) -> bool {
        matches!(self, SecurityProvider::X509(_))
    }

    /// Builds the TLS context for this identity.
    ///
    /// Failure here is a configuration problem with the device identity, not
    /// a transient fault.
    pub fn tls_connector(&self) -> Result<TlsConnector, Error> {
        match self {
            SecurityProvider::X509(x509) => x509.tls_connector(),

            SecurityProvider::Tpm(_) => {
                let connector = hyper_openssl::HttpsConnector::new()?;

                Ok(connector)
            }
        }
    }
}

pub struct X509Security {
    registration_id: String,

    identity_cert_pem: Vec<u8>,
    identity_pk_pem: Vec<u8>,
}

impl X509Security {
    pub fn new(
        registration_id: impl Into<String>,
        identity_cert_pem: Vec<u8>,
        identity_pk_pem: Vec<u8>,
    ) -> Self {
        X509Security {
            registration_id: registration_id.into(),
            identity_cert_pem,
            identity_pk_pem,
        }
    }

    fn tls_connector(&self) -> Result<TlsConnector, Error> {
        let mut tls_connector = openssl::ssl::SslConnector::builder(openssl::ssl::SslMethod::tls())?;

        let private_key = openssl::pkey::PKey::private_key_from_pem(&self.identity_pk_pem)?;
        tls_connector.set_private_key(&private_key)?;

        let mut identity_certs =
            openssl::x509::X509::stack_from_pem(&self.identity_cert_pem)?.into_iter();

        let client_cert = identity_certs.next().ok_or_else(|| {
            Error::new(ErrorKind::InvalidInput, "device identity cert not found")
        })?;
        tls_connector.set_certificate(&client_cert)?;

        for cert in identity_certs {
            tls_connector.add_extra_chain_cert(cert)?;
        }

        let mut http_connector = hyper::client::HttpConnector::new();
        http_connector.enforce_http(false);

        let tls_connector =
            hyper_openssl::HttpsConnector::with_connector(http_connector, tls_connector)?;

        Ok(tls_connector)
    }
}

pub struct TpmSecurity {
    registration_id: String,

    attestation: Arc<dyn TpmAttestation>,
}

impl TpmSecurity {
    pub fn new(registration_id: impl Into<String>, attestation: Arc<dyn TpmAttestation>) -> Self {
        TpmSecurity {
            registration_id: registration_id.into(),
            attestation,
        }
    }

    pub fn attestation(&self) -> &dyn TpmAttestation {
        &*self.attestation
    }
}

/// Capabilities of the secure module holding the device's key material.
///
/// Raw private keys never cross this interface; the module signs and imports
/// on the caller's behalf.
#[async_trait::async_trait]
pub trait TpmAttestation: Send + Sync {
    async fn endorsement_key(&self) -> Result<Vec<u8>, Error>;

    async fn storage_root_key(&self) -> Result<Vec<u8>, Error>;

    /// Signs `data` with the module's current identity key.
    async fn sign_with_identity(&self, data: &[u8]) -> Result<Vec<u8>, Error>;

    /// Imports a service-issued authentication key into the module, replacing
    /// the key used by subsequent [`sign_with_identity`](Self::sign_with_identity) calls.
    async fn activate_identity_key(&self, key: &[u8]) -> Result<(), Error>;
}

/// In-memory attestation for symmetric-key enrollments.
///
/// Signs with HMAC-SHA256 over a stored key. Hardware TPMs plug in behind the
/// same trait; this impl backs shared-key enrollments and tests.
pub struct SymmetricKeyAttestation {
    endorsement_key: Vec<u8>,
    storage_root_key: Vec<u8>,

    key: std::sync::Mutex<Vec<u8>>,
}

impl SymmetricKeyAttestation {
    pub fn new(endorsement_key: Vec<u8>, storage_root_key: Vec<u8>, key: Vec<u8>) -> Self {
        SymmetricKeyAttestation {
            endorsement_key,
            storage_root_key,
            key: std::sync::Mutex::new(key),
        }
    }
}

#[async_trait::async_trait]
impl TpmAttestation for SymmetricKeyAttestation {
    async fn endorsement_key(&self) -> Result<Vec<u8>, Error> {
        Ok(self.endorsement_key.clone())
    }

    async fn storage_root_key(&self) -> Result<Vec<u8>, Error> {
        Ok(self.storage_root_key.clone())
    }

    async fn sign_with_identity(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let key = self.key.lock().expect("symmetric key mutex poisoned").clone();

        let key = openssl::pkey::PKey::hmac(&key)?;

        let mut signer = openssl::sign::Signer::new(openssl::hash::MessageDigest::sha256(), &key)?;
        signer.update(data)?;
        let signature = signer.sign_to_vec()?;

        Ok(signature)
    }

    async fn activate_identity_key(&self, key: &[u8]) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "authentication key cannot be empty",
            ));
        }

        *self.key.lock().expect("symmetric key mutex poisoned") = key.to_vec();

        Ok(())
    }
}
