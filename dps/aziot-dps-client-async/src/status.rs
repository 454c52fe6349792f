// Copyright (c) Microsoft. All rights reserved.

use aziot_dps_security::SecurityProvider;

use crate::auth::Authorization;
use crate::contract::{ProvisioningContract, RequestData, ResponseData};
use crate::error::Error;
use crate::schema;

/// Performs a single status poll for a pending registration operation.
///
/// Never retries and never interprets the returned status string; both are
/// the orchestrator's responsibility.
pub(crate) struct StatusTask<'a> {
    security: &'a SecurityProvider,
    contract: &'a dyn ProvisioningContract,
    operation_id: &'a str,
    authorization: &'a Authorization,
    timeout: std::time::Duration,
}

impl<'a> StatusTask<'a> {
    pub fn new(
        security: &'a SecurityProvider,
        contract: &'a dyn ProvisioningContract,
        operation_id: &'a str,
        authorization: &'a Authorization,
        timeout: std::time::Duration,
    ) -> Self {
        StatusTask {
            security,
            contract,
            operation_id,
            authorization,
            timeout,
        }
    }

    pub async fn run(self) -> Result<schema::response::RegistrationOperationStatus, Error> {
        let registration_id = self.security.registration_id();
        if registration_id.is_empty() {
            return Err(Error::Configuration("registration id cannot be empty"));
        }

        // The register task stores the TLS context before any poll runs;
        // its absence here is an invariant violation, not a transient fault.
        let tls = self.authorization.tls().ok_or(Error::Configuration(
            "transport security context not established",
        ))?;

        let request = RequestData::status(
            registration_id,
            self.operation_id,
            tls.clone(),
            self.authorization.sas_token().map(str::to_string),
        );

        let response = match tokio::time::timeout(
            self.timeout,
            self.contract.operation_status(&request),
        )
        .await
        {
            Ok(response) => response?,
            Err(_) => ResponseData::unknown(),
        };

        let body = response.into_body("status")?;

        schema::response::RegistrationOperationStatus::parse(&body)
    }
}

#[cfg(test)]
mod tests {
    use aziot_dps_security::{SecurityProvider, SymmetricKeyAttestation, TpmSecurity};

    use super::StatusTask;
    use crate::auth::Authorization;
    use crate::contract::{ProvisioningContract, RequestData, ResponseData};
    use crate::error::Error;

    struct NoContract;

    #[async_trait::async_trait]
    impl ProvisioningContract for NoContract {
        async fn register(&self, _request: &RequestData) -> Result<ResponseData, Error> {
            panic!("unexpected register call")
        }

        async fn request_nonce(&self, _request: &RequestData) -> Result<ResponseData, Error> {
            panic!("unexpected nonce call")
        }

        async fn operation_status(&self, _request: &RequestData) -> Result<ResponseData, Error> {
            panic!("unexpected status call")
        }
    }

    fn tpm_provider(registration_id: &str) -> SecurityProvider {
        let attestation = SymmetricKeyAttestation::new(
            b"ek".to_vec(),
            b"srk".to_vec(),
            b"device-key".to_vec(),
        );

        SecurityProvider::Tpm(TpmSecurity::new(
            registration_id,
            std::sync::Arc::new(attestation),
        ))
    }

    #[tokio::test]
    async fn missing_tls_context_fails_before_any_call() {
        let security = tpm_provider("device-1");
        let authorization = Authorization::default();

        let task = StatusTask::new(
            &security,
            &NoContract,
            "op-1",
            &authorization,
            std::time::Duration::from_secs(1),
        );

        let err = task.run().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn empty_registration_id_fails_before_any_call() {
        let security = tpm_provider("");
        let authorization = Authorization::default();

        let task = StatusTask::new(
            &security,
            &NoContract,
            "op-1",
            &authorization,
            std::time::Duration::from_secs(1),
        );

        let err = task.run().await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
