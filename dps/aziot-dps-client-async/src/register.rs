// Copyright (c) Microsoft. All rights reserved.

use std::io::{Error as IoError, ErrorKind};

use aziot_dps_security::{SecurityProvider, TpmSecurity};

use crate::auth::{self, Authorization};
use crate::contract::{ProvisioningContract, RequestData, ResponseData};
use crate::error::Error;
use crate::schema;

/// Performs the single registration submission of an attempt.
///
/// Selects the authentication path from the security provider once, stores
/// the credentials it establishes in [`Authorization`], and returns the
/// service's operation-status payload. Never retries: it produces exactly one
/// payload or exactly one error.
pub(crate) struct RegisterTask<'a> {
    id_scope: &'a str,
    security: &'a SecurityProvider,
    contract: &'a dyn ProvisioningContract,
    authorization: &'a mut Authorization,
    timeout: std::time::Duration,
}

impl<'a> RegisterTask<'a> {
    pub fn new(
        id_scope: &'a str,
        security: &'a SecurityProvider,
        contract: &'a dyn ProvisioningContract,
        authorization: &'a mut Authorization,
        timeout: std::time::Duration,
    ) -> Self {
        RegisterTask {
            id_scope,
            security,
            contract,
            authorization,
            timeout,
        }
    }

    pub async fn run(
        mut self,
    ) -> Result<schema::response::RegistrationOperationStatus, Error> {
        let security = self.security;

        let registration_id = security.registration_id();
        if registration_id.is_empty() {
            // A misconfigured device identity, not a transient fault.
            return Err(Error::Configuration("registration id cannot be empty"));
        }

        match security {
            SecurityProvider::X509(_) => self.authenticate_x509(registration_id).await,
            SecurityProvider::Tpm(tpm) => self.authenticate_tpm(registration_id, tpm).await,
        }
    }

    async fn authenticate_x509(
        &mut self,
        registration_id: &str,
    ) -> Result<schema::response::RegistrationOperationStatus, Error> {
        // A certificate identity with no usable TLS material is unrecoverable.
        let tls = self.security.tls_connector().map_err(Error::Security)?;
        self.authorization.set_tls(tls.clone());

        let request = RequestData::x509(registration_id, tls);

        let body = self
            .submit("registration", self.contract.register(&request))
            .await?;

        schema::response::RegistrationOperationStatus::parse(&body)
    }

    async fn authenticate_tpm(
        &mut self,
        registration_id: &str,
        tpm: &'a TpmSecurity,
    ) -> Result<schema::response::RegistrationOperationStatus, Error> {
        let attestation = tpm.attestation();

        let endorsement_key = attestation
            .endorsement_key()
            .await
            .map_err(Error::Security)?;
        if endorsement_key.is_empty() {
            return Err(Error::Security(IoError::new(
                ErrorKind::InvalidData,
                "endorsement key cannot be empty",
            )));
        }

        let storage_root_key = attestation
            .storage_root_key()
            .await
            .map_err(Error::Security)?;
        if storage_root_key.is_empty() {
            return Err(Error::Security(IoError::new(
                ErrorKind::InvalidData,
                "storage root key cannot be empty",
            )));
        }

        let tls = self.security.tls_connector().map_err(Error::Security)?;
        self.authorization.set_tls(tls.clone());

        let mut request =
            RequestData::tpm(registration_id, endorsement_key, storage_root_key, tls);

        // Nonce handshake: the service answers with an encrypted key that the
        // secure module must import before it can countersign the SAS token.
        let nonce_body = self
            .submit("nonce", self.contract.request_nonce(&request))
            .await?;

        let auth_key: schema::response::TpmAuthKey = serde_json::from_slice(&nonce_body)
            .map_err(|_| Error::Protocol("malformed nonce response".into()))?;
        if auth_key.authentication_key.is_empty() {
            return Err(Error::Protocol(
                "service did not send an authentication key".into(),
            ));
        }

        let auth_key = base64::decode(auth_key.authentication_key)
            .map_err(|_| Error::Protocol("authentication key is not valid base64".into()))?;

        attestation
            .activate_identity_key(&auth_key)
            .await
            .map_err(Error::Security)?;

        let sas_token = auth::generate_sas_token(
            self.id_scope,
            registration_id,
            attestation,
            auth::DEFAULT_TOKEN_EXPIRY,
        )
        .await?;
        request.set_sas_token(sas_token.clone());

        let body = self
            .submit("registration", self.contract.register(&request))
            .await?;

        // The token becomes attempt state once the service has accepted it.
        self.authorization.set_sas_token(sas_token);

        schema::response::RegistrationOperationStatus::parse(&body)
    }

    /// Blocks on a contract call for at most the registration timeout;
    /// expiry is recorded as an `Unknown` contract outcome.
    async fn submit(
        &self,
        operation: &'static str,
        call: impl std::future::Future<Output = Result<ResponseData, Error>>,
    ) -> Result<hyper::body::Bytes, Error> {
        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(response) => response?,
            Err(_) => ResponseData::unknown(),
        };

        response.into_body(operation)
    }
}
