// Copyright (c) Microsoft. All rights reserved.

use std::io::{Error as IoError, ErrorKind};

use aziot_dps_security::{TlsConnector, TpmAttestation};

use crate::error::Error;

pub(crate) const DEFAULT_TOKEN_EXPIRY: std::time::Duration =
    std::time::Duration::from_secs(3600);

/// Credentials produced while registering and consumed while polling.
///
/// The register task writes, the status task reads. The orchestrator
/// schedules the two strictly sequentially, so the `&mut`/`&` borrows it
/// hands out can never overlap.
#[derive(Default)]
pub(crate) struct Authorization {
    tls: Option<TlsConnector>,
    sas_token: Option<String>,
}

impl Authorization {
    pub fn set_tls(&mut self, tls: TlsConnector) {
        self.tls = Some(tls);
    }

    pub fn tls(&self) -> Option<&TlsConnector> {
        self.tls.as_ref()
    }

    pub fn set_sas_token(&mut self, token: String) {
        self.sas_token = Some(token);
    }

    pub fn sas_token(&self) -> Option<&str> {
        self.sas_token.as_deref()
    }
}

/// Builds the shared-access-signature token that authenticates the
/// symmetric-key/TPM registration call.
///
/// The token scope is `{id_scope}/registrations/{registration_id}`; the
/// secure module countersigns `{scope}\n{expiry}`.
pub(crate) async fn generate_sas_token(
    id_scope: &str,
    registration_id: &str,
    attestation: &dyn TpmAttestation,
    expiry: std::time::Duration,
) -> Result<String, Error> {
    let audience = format!("{}/registrations/{}", id_scope, registration_id);

    let expiry = chrono::Utc::now()
        + chrono::Duration::from_std(expiry)
            .map_err(|_| Error::Configuration("token expiry out of range"))?;
    let expiry = expiry.timestamp().to_string();

    let resource_uri =
        percent_encoding::percent_encode(audience.to_lowercase().as_bytes(), crate::DPS_ENCODE_SET)
            .to_string();
    let sig_data = format!("{}\n{}", resource_uri, expiry);

    let signature = attestation
        .sign_with_identity(sig_data.as_bytes())
        .await
        .map_err(Error::Security)?;
    if signature.is_empty() {
        return Err(Error::Security(IoError::new(
            ErrorKind::InvalidData,
            "security provider could not sign the token scope",
        )));
    }
    let signature = base64::encode(&signature);

    let token = {
        let mut token = url::form_urlencoded::Serializer::new(format!("sr={}", resource_uri));

        token
            .append_pair("sig", &signature)
            .append_pair("se", &expiry)
            .append_pair("skn", "registration");

        token.finish()
    };

    Ok(format!("SharedAccessSignature {}", token))
}
