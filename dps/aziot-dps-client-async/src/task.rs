// Copyright (c) Microsoft. All rights reserved.

use aziot_dps_security::SecurityProvider;

use crate::auth::Authorization;
use crate::contract::ProvisioningContract;
use crate::error::Error;
use crate::register::RegisterTask;
use crate::schema;
use crate::status::StatusTask;

/// The default global provisioning service endpoint.
pub const DEFAULT_GLOBAL_ENDPOINT: &str = "https://global.azure-devices-provisioning.net";

const DEFAULT_REGISTRATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(90);
const DEFAULT_STATUS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const DEFAULT_POLL_PERIOD: std::time::Duration = std::time::Duration::from_secs(5);

/// Terminal outcome of a registration attempt as reported to the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProvisioningDeviceStatus {
    Assigned,
    Failed,
    Disabled,
    Error,
}

/// The payload delivered to the registration callback.
#[derive(Debug)]
pub struct RegistrationResult {
    status: ProvisioningDeviceStatus,
    assigned_hub: Option<String>,
    device_id: Option<String>,
}

impl RegistrationResult {
    fn assigned(assigned_hub: String, device_id: String) -> Self {
        RegistrationResult {
            status: ProvisioningDeviceStatus::Assigned,
            assigned_hub: Some(assigned_hub),
            device_id: Some(device_id),
        }
    }

    fn terminal(status: ProvisioningDeviceStatus) -> Self {
        RegistrationResult {
            status,
            assigned_hub: None,
            device_id: None,
        }
    }

    pub fn status(&self) -> ProvisioningDeviceStatus {
        self.status
    }

    pub fn assigned_hub(&self) -> Option<&str> {
        self.assigned_hub.as_deref()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }
}

/// Invoked exactly once per registration attempt with the terminal outcome.
pub type RegistrationCallback = Box<dyn FnOnce(RegistrationResult, Option<Error>) + Send>;

/// Configuration of one provisioning client: the enrollment's id scope, the
/// device's security provider, and the callback the outcome is delivered to.
pub struct ProvisioningClientConfig {
    id_scope: String,
    endpoint: url::Url,
    security: SecurityProvider,
    callback: RegistrationCallback,

    registration_timeout: std::time::Duration,
    status_timeout: std::time::Duration,
    poll_period: std::time::Duration,
}

impl std::fmt::Debug for ProvisioningClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningClientConfig")
            .field("id_scope", &self.id_scope)
            .field("endpoint", &self.endpoint)
            .field("registration_timeout", &self.registration_timeout)
            .field("status_timeout", &self.status_timeout)
            .field("poll_period", &self.poll_period)
            .finish_non_exhaustive()
    }
}

impl ProvisioningClientConfig {
    pub fn new(
        id_scope: impl Into<String>,
        security: SecurityProvider,
        callback: RegistrationCallback,
    ) -> Result<Self, Error> {
        let id_scope = id_scope.into();
        if id_scope.is_empty() {
            return Err(Error::Configuration("id scope cannot be empty"));
        }

        let endpoint =
            url::Url::parse(DEFAULT_GLOBAL_ENDPOINT).expect("hardcoded uri should parse");

        Ok(ProvisioningClientConfig {
            id_scope,
            endpoint,
            security,
            callback,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            status_timeout: DEFAULT_STATUS_TIMEOUT,
            poll_period: DEFAULT_POLL_PERIOD,
        })
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: url::Url) -> Self {
        self.endpoint = endpoint;

        self
    }

    #[must_use]
    pub fn with_registration_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.registration_timeout = timeout;

        self
    }

    #[must_use]
    pub fn with_status_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.status_timeout = timeout;

        self
    }

    #[must_use]
    pub fn with_poll_period(mut self, period: std::time::Duration) -> Self {
        self.poll_period = period;

        self
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    pub fn id_scope(&self) -> &str {
        &self.id_scope
    }
}

/// Service registration status, mapped from the raw wire string.
///
/// Anything the service returns outside this set — including a missing
/// status — collapses into the orchestrator's ERROR branch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ProvisioningStatus {
    Unassigned,
    Assigning,
    Assigned,
    Failed,
    Disabled,
}

impl ProvisioningStatus {
    fn parse(status: &str) -> Option<Self> {
        match status {
            "unassigned" => Some(ProvisioningStatus::Unassigned),
            "assigning" => Some(ProvisioningStatus::Assigning),
            "assigned" => Some(ProvisioningStatus::Assigned),
            "failed" => Some(ProvisioningStatus::Failed),
            "disabled" => Some(ProvisioningStatus::Disabled),
            _ => None,
        }
    }
}

/// Drives one device registration attempt to its terminal state.
///
/// Runs the register task once, then polls the operation status until the
/// service reports `assigned`, `failed` or `disabled`, or until a fatal error
/// or timeout ends the attempt. Whatever happens, the registration callback
/// fires exactly once.
pub struct ProvisioningTask {
    id_scope: String,
    security: SecurityProvider,
    contract: Box<dyn ProvisioningContract>,
    callback: Option<RegistrationCallback>,
    authorization: Authorization,

    registration_timeout: std::time::Duration,
    status_timeout: std::time::Duration,
    poll_period: std::time::Duration,
}

impl std::fmt::Debug for ProvisioningTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningTask")
            .field("id_scope", &self.id_scope)
            .field("registration_timeout", &self.registration_timeout)
            .field("status_timeout", &self.status_timeout)
            .field("poll_period", &self.poll_period)
            .finish_non_exhaustive()
    }
}

impl ProvisioningTask {
    pub fn new(
        config: ProvisioningClientConfig,
        contract: Box<dyn ProvisioningContract>,
    ) -> Result<Self, Error> {
        if config.security.registration_id().is_empty() {
            return Err(Error::Configuration("registration id cannot be empty"));
        }

        let ProvisioningClientConfig {
            id_scope,
            endpoint: _,
            security,
            callback,
            registration_timeout,
            status_timeout,
            poll_period,
        } = config;

        Ok(ProvisioningTask {
            id_scope,
            security,
            contract,
            callback: Some(callback),
            authorization: Authorization::default(),
            registration_timeout,
            status_timeout,
            poll_period,
        })
    }

    /// Runs the attempt to completion.
    ///
    /// The substantive outcome is always delivered through the registration
    /// callback; the returned `Result` only signals scheduling failures, such
    /// as running the same attempt twice.
    pub async fn run(&mut self) -> Result<(), Error> {
        let callback = self
            .callback
            .take()
            .ok_or(Error::Configuration("registration attempt already ran"))?;

        let (result, error) = match self.run_state_machine().await {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("Registration attempt failed: {}", err);

                (
                    RegistrationResult::terminal(ProvisioningDeviceStatus::Error),
                    Some(err),
                )
            }
        };

        callback(result, error);

        Ok(())
    }

    /// Releases the transport contract. Safe to call after `run` completed.
    pub fn close(self) {
        drop(self.contract);
    }

    async fn run_state_machine(
        &mut self,
    ) -> Result<(RegistrationResult, Option<Error>), Error> {
        log::info!(
            "Starting registration of {} with scope {}.",
            self.security.registration_id(),
            self.id_scope
        );

        let register_task = RegisterTask::new(
            &self.id_scope,
            &self.security,
            &*self.contract,
            &mut self.authorization,
            self.registration_timeout,
        );
        let mut current = register_task.run().await?;

        // The operation id is assigned once, by the registration response.
        let operation_id = current.operation_id.clone().filter(|id| !id.is_empty());

        let mut polled = false;
        loop {
            let status = match current.status.as_deref().and_then(ProvisioningStatus::parse) {
                Some(status) => status,
                None => {
                    log::warn!(
                        "Service returned unrecognized registration status {:?}.",
                        current.status
                    );

                    return Err(Error::Protocol(
                        "did not receive a valid registration status".into(),
                    ));
                }
            };

            match status {
                ProvisioningStatus::Unassigned | ProvisioningStatus::Assigning => {
                    let operation_id = operation_id.as_deref().ok_or_else(|| {
                        Error::Protocol("registration response carried no operation id".into())
                    })?;

                    if polled {
                        tokio::time::sleep(self.poll_period).await;
                    }
                    polled = true;

                    log::info!("Registration is still in progress.");
                    let status_task = StatusTask::new(
                        &self.security,
                        &*self.contract,
                        operation_id,
                        &self.authorization,
                        self.status_timeout,
                    );
                    current = status_task.run().await?;
                }

                ProvisioningStatus::Assigned => {
                    let state = current.registration_state.take().ok_or_else(|| {
                        Error::Protocol("assigned response carried no registration state".into())
                    })?;

                    let assigned_hub = state
                        .assigned_hub
                        .clone()
                        .filter(|hub| !hub.is_empty())
                        .ok_or_else(|| {
                            Error::Protocol("assigned response carried no hub".into())
                        })?;
                    let device_id = state
                        .device_id
                        .clone()
                        .filter(|id| !id.is_empty())
                        .ok_or_else(|| {
                            Error::Protocol("assigned response carried no device id".into())
                        })?;

                    self.activate_assigned_key(&state).await?;

                    log::info!("Device {} assigned to {}.", device_id, assigned_hub);

                    return Ok((RegistrationResult::assigned(assigned_hub, device_id), None));
                }

                ProvisioningStatus::Failed => {
                    let message =
                        error_message(current.registration_state.as_ref(), "registration failed");
                    log::warn!("Service reported registration as failed: {}", message);

                    return Ok((
                        RegistrationResult::terminal(ProvisioningDeviceStatus::Failed),
                        Some(Error::Service(message)),
                    ));
                }

                ProvisioningStatus::Disabled => {
                    let message =
                        error_message(current.registration_state.as_ref(), "device is disabled");
                    log::warn!("Service reported the device as disabled: {}", message);

                    return Ok((
                        RegistrationResult::terminal(ProvisioningDeviceStatus::Disabled),
                        Some(Error::Service(message)),
                    ));
                }
            }
        }
    }

    /// For TPM-style identities the assigned result carries the hub
    /// authentication key, which must land in the secure module before the
    /// attempt can be reported as successful.
    async fn activate_assigned_key(
        &self,
        state: &schema::response::DeviceRegistrationResult,
    ) -> Result<(), Error> {
        let tpm = match &self.security {
            SecurityProvider::Tpm(tpm) => tpm,
            SecurityProvider::X509(_) => return Ok(()),
        };

        let auth_key = state
            .tpm
            .as_ref()
            .map(|tpm| tpm.authentication_key.as_str())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::Protocol("assigned response carried no authentication key".into())
            })?;

        let auth_key = base64::decode(auth_key)
            .map_err(|_| Error::Protocol("authentication key is not valid base64".into()))?;

        tpm.attestation()
            .activate_identity_key(&auth_key)
            .await
            .map_err(Error::Security)?;

        log::info!("Imported authentication key into the security module.");

        Ok(())
    }
}

fn error_message(
    state: Option<&schema::response::DeviceRegistrationResult>,
    fallback: &str,
) -> String {
    state
        .and_then(|state| state.error_message.clone())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use aziot_dps_security::{
        SecurityProvider, TpmAttestation, TpmSecurity, X509Security,
    };

    use super::{
        ProvisioningClientConfig, ProvisioningDeviceStatus, ProvisioningTask,
        RegistrationCallback, RegistrationResult,
    };
    use crate::contract::{ProvisioningContract, RequestData, ResponseData};
    use crate::error::Error;

    #[derive(Clone)]
    enum Scripted {
        Body(String),
        Fail(String),
        Hang,
    }

    #[derive(Default)]
    struct MockContract {
        register: Option<Scripted>,
        nonce: Option<Scripted>,
        status: Mutex<std::collections::VecDeque<Scripted>>,
        events: Mutex<Vec<&'static str>>,
    }

    impl MockContract {
        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }

        async fn respond(
            &self,
            event: &'static str,
            script: Option<Scripted>,
        ) -> Result<ResponseData, Error> {
            self.events.lock().unwrap().push(event);

            match script {
                Some(Scripted::Body(body)) => {
                    Ok(ResponseData::received(hyper::body::Bytes::from(body)))
                }
                Some(Scripted::Fail(body)) => {
                    Ok(ResponseData::failed(Some(hyper::body::Bytes::from(body))))
                }
                Some(Scripted::Hang) => {
                    std::future::pending::<Result<ResponseData, Error>>().await
                }
                None => panic!("unexpected {} call", event),
            }
        }
    }

    #[async_trait::async_trait]
    impl ProvisioningContract for Arc<MockContract> {
        async fn register(&self, _request: &RequestData) -> Result<ResponseData, Error> {
            self.respond("register", self.register.clone()).await
        }

        async fn request_nonce(&self, _request: &RequestData) -> Result<ResponseData, Error> {
            self.respond("nonce", self.nonce.clone()).await
        }

        async fn operation_status(&self, _request: &RequestData) -> Result<ResponseData, Error> {
            let script = self.status.lock().unwrap().pop_front();

            self.respond("status", script).await
        }
    }

    fn contract(
        register: Option<Scripted>,
        nonce: Option<Scripted>,
        status: Vec<Scripted>,
    ) -> Arc<MockContract> {
        Arc::new(MockContract {
            register,
            nonce,
            status: Mutex::new(status.into()),
            events: Mutex::new(Vec::new()),
        })
    }

    struct MockAttestation {
        fail_activation: bool,
        activated: Mutex<Vec<Vec<u8>>>,
    }

    impl MockAttestation {
        fn new() -> Arc<Self> {
            Arc::new(MockAttestation {
                fail_activation: false,
                activated: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(MockAttestation {
                fail_activation: true,
                activated: Mutex::new(Vec::new()),
            })
        }

        fn activated(&self) -> Vec<Vec<u8>> {
            self.activated.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl TpmAttestation for MockAttestation {
        async fn endorsement_key(&self) -> Result<Vec<u8>, std::io::Error> {
            Ok(b"ek".to_vec())
        }

        async fn storage_root_key(&self) -> Result<Vec<u8>, std::io::Error> {
            Ok(b"srk".to_vec())
        }

        async fn sign_with_identity(&self, _data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
            Ok(b"signed".to_vec())
        }

        async fn activate_identity_key(&self, key: &[u8]) -> Result<(), std::io::Error> {
            if self.fail_activation {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "secure module rejected the key",
                ));
            }

            self.activated.lock().unwrap().push(key.to_vec());

            Ok(())
        }
    }

    fn tpm_provider(
        registration_id: &str,
        attestation: Arc<MockAttestation>,
    ) -> SecurityProvider {
        SecurityProvider::Tpm(TpmSecurity::new(registration_id, attestation))
    }

    fn x509_provider(registration_id: &str) -> SecurityProvider {
        let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
        let private_key = openssl::pkey::PKey::from_rsa(rsa).unwrap();

        let public_key = private_key.public_key_to_pem().unwrap();
        let public_key = openssl::pkey::PKey::public_key_from_pem(&public_key).unwrap();

        let mut cert = openssl::x509::X509::builder().unwrap();
        cert.set_version(2).unwrap();

        let mut name = openssl::x509::X509Name::builder().unwrap();
        name.append_entry_by_nid(openssl::nid::Nid::COMMONNAME, registration_id)
            .unwrap();
        let name = name.build();

        cert.set_subject_name(&name).unwrap();
        cert.set_issuer_name(&name).unwrap();

        let not_before = openssl::asn1::Asn1Time::days_from_now(0).unwrap();
        cert.set_not_before(&not_before).unwrap();
        let not_after = openssl::asn1::Asn1Time::days_from_now(30).unwrap();
        cert.set_not_after(&not_after).unwrap();

        cert.set_pubkey(&public_key).unwrap();
        cert.sign(&private_key, openssl::hash::MessageDigest::sha256())
            .unwrap();
        let cert = cert.build();

        SecurityProvider::X509(X509Security::new(
            registration_id,
            cert.to_pem().unwrap(),
            private_key.private_key_to_pem_pkcs8().unwrap(),
        ))
    }

    fn registration_outcome() -> (
        RegistrationCallback,
        std::sync::mpsc::Receiver<(RegistrationResult, Option<Error>)>,
    ) {
        let (sender, receiver) = std::sync::mpsc::channel();

        let callback = Box::new(move |result, error| {
            sender
                .send((result, error))
                .expect("outcome receiver dropped");
        });

        (callback, receiver)
    }

    fn config(
        security: SecurityProvider,
        callback: RegistrationCallback,
    ) -> ProvisioningClientConfig {
        ProvisioningClientConfig::new("scope-1", security, callback)
            .unwrap()
            .with_registration_timeout(std::time::Duration::from_millis(100))
            .with_status_timeout(std::time::Duration::from_millis(100))
            .with_poll_period(std::time::Duration::from_millis(10))
    }

    fn status_body(operation_id: &str, status: &str) -> Scripted {
        Scripted::Body(
            serde_json::json!({ "operationId": operation_id, "status": status }).to_string(),
        )
    }

    fn assigned_body(hub: &str, device_id: &str, tpm_key: Option<&str>) -> Scripted {
        let mut state = serde_json::json!({ "assignedHub": hub, "deviceId": device_id });
        if let Some(key) = tpm_key {
            state["tpm"] = serde_json::json!({ "authenticationKey": key });
        }

        Scripted::Body(
            serde_json::json!({
                "operationId": "op-1",
                "status": "assigned",
                "registrationState": state,
            })
            .to_string(),
        )
    }

    fn nonce_body(key: &[u8]) -> Scripted {
        Scripted::Body(
            serde_json::json!({ "authenticationKey": base64::encode(key) }).to_string(),
        )
    }

    #[tokio::test]
    async fn certificate_registration_assigned_on_first_call() {
        let contract = contract(
            Some(assigned_body("hub-1.example.test", "device-1", None)),
            None,
            Vec::new(),
        );
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(x509_provider("device-1"), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Assigned, result.status());
        assert_eq!(Some("hub-1.example.test"), result.assigned_hub());
        assert_eq!(Some("device-1"), result.device_id());
        assert!(error.is_none());

        assert_eq!(vec!["register"], contract.events());
    }

    #[tokio::test]
    async fn key_registration_polls_until_assigned() {
        let attestation = MockAttestation::new();
        let result_key = base64::encode(b"hub-auth-key");

        let contract = contract(
            Some(status_body("op-7", "assigning")),
            Some(nonce_body(b"nonce-key")),
            vec![
                status_body("op-7", "assigning"),
                assigned_body("hub-1.example.test", "device-1", Some(&result_key)),
            ],
        );
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(tpm_provider("device-1", attestation.clone()), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Assigned, result.status());
        assert_eq!(Some("hub-1.example.test"), result.assigned_hub());
        assert!(error.is_none());

        // Registration completes before the first poll; polling stops at the
        // terminal status.
        assert_eq!(vec!["nonce", "register", "status", "status"], contract.events());

        // The nonce key lands during registration, the hub key at assignment.
        assert_eq!(
            vec![b"nonce-key".to_vec(), b"hub-auth-key".to_vec()],
            attestation.activated()
        );
    }

    #[tokio::test]
    async fn disabled_device_surfaces_the_service_message() {
        let disabled = Scripted::Body(
            serde_json::json!({
                "operationId": "op-2",
                "status": "disabled",
                "registrationState": { "errorMessage": "device disabled by operator" },
            })
            .to_string(),
        );

        let contract = contract(
            Some(status_body("op-2", "unassigned")),
            None,
            vec![disabled],
        );
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(x509_provider("device-1"), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Disabled, result.status());
        match error {
            Some(Error::Service(message)) => {
                assert!(message.contains("device disabled by operator"));
            }
            error => panic!("expected service error, got {:?}", error),
        }

        assert_eq!(vec!["register", "status"], contract.events());
    }

    #[tokio::test]
    async fn failed_registration_surfaces_the_service_message() {
        let failed = Scripted::Body(
            serde_json::json!({
                "operationId": "op-2",
                "status": "failed",
                "registrationState": { "errorMessage": "enrollment not found" },
            })
            .to_string(),
        );

        let contract = contract(Some(failed), None, Vec::new());
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(x509_provider("device-1"), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Failed, result.status());
        assert!(matches!(error, Some(Error::Service(_))));

        assert_eq!(vec!["register"], contract.events());
    }

    #[tokio::test]
    async fn status_timeout_ends_the_attempt() {
        let contract = contract(
            Some(status_body("op-3", "assigning")),
            None,
            vec![Scripted::Hang],
        );
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(x509_provider("device-1"), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Error, result.status());
        assert!(matches!(error, Some(Error::Timeout("status"))));

        assert_eq!(vec!["register", "status"], contract.events());
    }

    #[tokio::test]
    async fn registration_timeout_ends_the_attempt() {
        let contract = contract(Some(Scripted::Hang), None, Vec::new());
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(x509_provider("device-1"), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Error, result.status());
        assert!(matches!(error, Some(Error::Timeout("registration"))));
    }

    #[tokio::test]
    async fn key_activation_failure_ends_the_attempt() {
        let attestation = MockAttestation::failing();

        let contract = contract(None, Some(nonce_body(b"nonce-key")), Vec::new());
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(tpm_provider("device-1", attestation.clone()), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Error, result.status());
        assert!(matches!(error, Some(Error::Security(_))));

        // The register call is never reached.
        assert_eq!(vec!["nonce"], contract.events());
        assert!(attestation.activated().is_empty());
    }

    #[tokio::test]
    async fn empty_nonce_key_is_fatal() {
        let attestation = MockAttestation::new();

        let nonce = Scripted::Body(
            serde_json::json!({ "authenticationKey": "" }).to_string(),
        );
        let contract = contract(None, Some(nonce), Vec::new());
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(tpm_provider("device-1", attestation.clone()), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Error, result.status());
        assert!(matches!(error, Some(Error::Protocol(_))));

        assert!(attestation.activated().is_empty());
    }

    #[tokio::test]
    async fn assigned_without_authentication_key_is_fatal_for_tpm() {
        let attestation = MockAttestation::new();

        let contract = contract(
            Some(assigned_body("hub-1.example.test", "device-1", None)),
            Some(nonce_body(b"nonce-key")),
            Vec::new(),
        );
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(tpm_provider("device-1", attestation.clone()), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Error, result.status());
        assert!(matches!(error, Some(Error::Protocol(_))));

        // Only the nonce key was imported; assignment never activated a key.
        assert_eq!(vec![b"nonce-key".to_vec()], attestation.activated());
    }

    #[tokio::test]
    async fn missing_operation_id_is_fatal() {
        let body = Scripted::Body(serde_json::json!({ "status": "assigning" }).to_string());

        let contract = contract(Some(body), None, Vec::new());
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(x509_provider("device-1"), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Error, result.status());
        assert!(matches!(error, Some(Error::Protocol(_))));

        // No poll is ever issued without an operation id.
        assert_eq!(vec!["register"], contract.events());
    }

    #[tokio::test]
    async fn unrecognized_status_is_fatal() {
        let contract = contract(Some(status_body("op-4", "migrating")), None, Vec::new());
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(x509_provider("device-1"), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Error, result.status());
        assert!(matches!(error, Some(Error::Protocol(_))));

        assert_eq!(vec!["register"], contract.events());
    }

    #[tokio::test]
    async fn register_rejection_surfaces_the_service_error() {
        let rejection = Scripted::Fail(
            serde_json::json!({ "errorCode": 401_002, "message": "Unauthorized" }).to_string(),
        );

        let contract = contract(Some(rejection), None, Vec::new());
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(x509_provider("device-1"), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());

        let (result, error) = &received[0];
        assert_eq!(ProvisioningDeviceStatus::Error, result.status());
        match error {
            Some(Error::Service(message)) => assert!(message.contains("Unauthorized")),
            error => panic!("expected service error, got {:?}", error),
        }
    }

    #[tokio::test]
    async fn second_run_is_rejected_without_a_second_callback() {
        let contract = contract(
            Some(assigned_body("hub-1.example.test", "device-1", None)),
            None,
            Vec::new(),
        );
        let (callback, outcomes) = registration_outcome();

        let mut task = ProvisioningTask::new(
            config(x509_provider("device-1"), callback),
            Box::new(contract.clone()),
        )
        .unwrap();
        task.run().await.unwrap();
        task.run().await.unwrap_err();

        let received: Vec<_> = outcomes.try_iter().collect();
        assert_eq!(1, received.len());
    }

    #[test]
    fn empty_id_scope_is_rejected() {
        let (callback, _outcomes) = registration_outcome();

        let err = ProvisioningClientConfig::new(
            "",
            tpm_provider("device-1", MockAttestation::new()),
            callback,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn empty_registration_id_is_rejected() {
        let (callback, _outcomes) = registration_outcome();

        let config = ProvisioningClientConfig::new(
            "scope-1",
            tpm_provider("", MockAttestation::new()),
            callback,
        )
        .unwrap();

        let contract = contract(None, None, Vec::new());
        let err = ProvisioningTask::new(config, Box::new(contract)).unwrap_err();

        assert!(matches!(err, Error::Configuration(_)));
    }
}
