// Copyright (c) Microsoft. All rights reserved.

//! The boundary between the registration tasks and the transport.
//!
//! [`RequestData`] and [`ResponseData`] are the value carriers that cross it;
//! [`ProvisioningContract`] is the capability the tasks consume. The HTTP
//! rendering lives in [`http`]; other protocol renderings would implement the
//! same trait.

pub mod http;

use aziot_dps_security::TlsConnector;

use crate::error::Error;

/// Transport-contract outcome of one service call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContractState {
    /// The service answered the call.
    Received,

    /// The service rejected the call and may have returned an error body.
    Failed,

    /// No response arrived inside the allowed wait. Synthesized by the
    /// waiting task, never by the transport.
    Unknown,
}

/// Inputs of one service call. Unused fields are absent, never placeholders.
pub struct RequestData {
    registration_id: String,
    operation_id: Option<String>,
    endorsement_key: Option<Vec<u8>>,
    storage_root_key: Option<Vec<u8>>,
    sas_token: Option<String>,
    tls: TlsConnector,
    certificate_based: bool,
}

impl RequestData {
    /// Registration call for a certificate-based identity.
    pub fn x509(registration_id: impl Into<String>, tls: TlsConnector) -> Self {
        RequestData {
            registration_id: registration_id.into(),
            operation_id: None,
            endorsement_key: None,
            storage_root_key: None,
            sas_token: None,
            tls,
            certificate_based: true,
        }
    }

    /// Nonce and registration calls for a symmetric-key/TPM identity.
    pub fn tpm(
        registration_id: impl Into<String>,
        endorsement_key: Vec<u8>,
        storage_root_key: Vec<u8>,
        tls: TlsConnector,
    ) -> Self {
        RequestData {
            registration_id: registration_id.into(),
            operation_id: None,
            endorsement_key: Some(endorsement_key),
            storage_root_key: Some(storage_root_key),
            sas_token: None,
            tls,
            certificate_based: false,
        }
    }

    /// Status poll for a pending operation.
    pub fn status(
        registration_id: impl Into<String>,
        operation_id: impl Into<String>,
        tls: TlsConnector,
        sas_token: Option<String>,
    ) -> Self {
        RequestData {
            registration_id: registration_id.into(),
            operation_id: Some(operation_id.into()),
            endorsement_key: None,
            storage_root_key: None,
            sas_token,
            tls,
            certificate_based: false,
        }
    }

    pub fn set_sas_token(&mut self, token: String) {
        self.sas_token = Some(token);
    }

    pub fn registration_id(&self) -> &str {
        &self.registration_id
    }

    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    pub fn endorsement_key(&self) -> Option<&[u8]> {
        self.endorsement_key.as_deref()
    }

    pub fn storage_root_key(&self) -> Option<&[u8]> {
        self.storage_root_key.as_deref()
    }

    pub fn sas_token(&self) -> Option<&str> {
        self.sas_token.as_deref()
    }

    pub fn tls(&self) -> &TlsConnector {
        &self.tls
    }

    pub fn is_certificate_based(&self) -> bool {
        self.certificate_based
    }
}

/// Outcome of one service call as seen by the waiting task.
#[derive(Debug)]
pub struct ResponseData {
    body: Option<hyper::body::Bytes>,
    state: ContractState,
}

impl ResponseData {
    pub fn received(body: hyper::body::Bytes) -> Self {
        ResponseData {
            body: Some(body),
            state: ContractState::Received,
        }
    }

    pub fn failed(body: Option<hyper::body::Bytes>) -> Self {
        ResponseData {
            body,
            state: ContractState::Failed,
        }
    }

    pub fn unknown() -> Self {
        ResponseData {
            body: None,
            state: ContractState::Unknown,
        }
    }

    pub fn state(&self) -> ContractState {
        self.state
    }

    /// Converts the contract outcome into the response body, or the fatal
    /// error this attempt ends with. `operation` names the call for timeout
    /// reporting.
    pub(crate) fn into_body(
        self,
        operation: &'static str,
    ) -> Result<hyper::body::Bytes, Error> {
        match (self.state, self.body) {
            (ContractState::Received, Some(body)) if !body.is_empty() => Ok(body),

            (ContractState::Received, _) => {
                Err(Error::Protocol("response carried no body".into()))
            }

            (ContractState::Failed, Some(body)) => Err(service_error(&body)),

            (ContractState::Failed, None) => Err(Error::Protocol(
                "service rejected the request without details".into(),
            )),

            (ContractState::Unknown, _) => Err(Error::Timeout(operation)),
        }
    }
}

fn service_error(body: &[u8]) -> Error {
    match serde_json::from_slice::<crate::schema::response::ServiceError>(body) {
        Ok(err) => err.into(),
        Err(_) => Error::Protocol(String::from_utf8_lossy(body).into_owned().into()),
    }
}

/// One service call per method; implementations never retry and never
/// interpret the payload beyond framing it.
#[async_trait::async_trait]
pub trait ProvisioningContract: Send + Sync {
    /// Submits the device registration.
    async fn register(&self, request: &RequestData) -> Result<ResponseData, Error>;

    /// Requests the TPM nonce that precedes a symmetric-key/TPM registration.
    async fn request_nonce(&self, request: &RequestData) -> Result<ResponseData, Error>;

    /// Polls the status of a pending registration operation.
    async fn operation_status(&self, request: &RequestData) -> Result<ResponseData, Error>;
}

#[cfg(test)]
mod tests {
    use super::{ContractState, ResponseData};
    use crate::error::Error;

    #[test]
    fn received_body_passes_through() {
        let response = ResponseData::received(hyper::body::Bytes::from_static(b"{}"));

        assert_eq!(ContractState::Received, response.state());
        assert_eq!(b"{}".as_slice(), &*response.into_body("registration").unwrap());
    }

    #[test]
    fn received_empty_body_is_a_protocol_error() {
        let response = ResponseData::received(hyper::body::Bytes::new());

        let err = response.into_body("registration").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn unknown_becomes_a_timeout() {
        let err = ResponseData::unknown().into_body("status").unwrap_err();

        assert!(matches!(err, Error::Timeout("status")));
    }

    #[test]
    fn failed_with_error_body_is_a_service_error() {
        let body = hyper::body::Bytes::from_static(
            br#"{"errorCode":404201,"message":"Device is not found"}"#,
        );

        let err = ResponseData::failed(Some(body)).into_body("status").unwrap_err();

        match err {
            Error::Service(message) => assert!(message.contains("Device is not found")),
            err => panic!("expected service error, got {:?}", err),
        }
    }

    #[test]
    fn failed_with_opaque_body_is_a_protocol_error() {
        let body = hyper::body::Bytes::from_static(b"<html>502</html>");

        let err = ResponseData::failed(Some(body)).into_body("status").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
