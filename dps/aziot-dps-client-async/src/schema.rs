// Copyright (c) Microsoft. All rights reserved.

//! Wire payloads of the registration exchange.
//!
//! `status` is carried as the raw service string: values outside the modeled
//! set must flow to the orchestrator, which collapses them into its ERROR
//! branch rather than failing deserialization.

pub mod request {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DeviceRegistration {
        pub registration_id: String,
    }

    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TpmRegistration {
        pub registration_id: String,
        pub tpm: super::TpmAttestation,
    }
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TpmAttestation {
    pub endorsement_key: String,
    pub storage_root_key: String,
}

impl TpmAttestation {
    pub fn new(endorsement_key: &[u8], storage_root_key: &[u8]) -> Self {
        TpmAttestation {
            endorsement_key: base64::encode(endorsement_key),
            storage_root_key: base64::encode(storage_root_key),
        }
    }
}

pub mod response {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct TpmAuthKey {
        pub authentication_key: String,
    }

    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ServiceError {
        #[serde(alias = "errorCode")]
        pub code: i32,
        #[serde(alias = "errorMessage", alias = "Message")]
        pub message: String,
    }

    impl std::fmt::Display for ServiceError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{} (code {})", self.message, self.code)
        }
    }

    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RegistrationOperationStatus {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub operation_id: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub status: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub registration_state: Option<DeviceRegistrationResult>,
    }

    impl RegistrationOperationStatus {
        /// Decodes an operation-status body. A body that is valid JSON but
        /// carries a service error instead is surfaced as
        /// [`Error::Service`](crate::error::Error::Service).
        pub(crate) fn parse(body: &[u8]) -> Result<Self, crate::error::Error> {
            if let Ok(status) = serde_json::from_slice::<RegistrationOperationStatus>(body) {
                // Every field is optional, so any JSON object decodes; only
                // accept bodies that carry at least one operation field.
                if status.operation_id.is_some() || status.status.is_some() {
                    return Ok(status);
                }
            }

            match serde_json::from_slice::<ServiceError>(body) {
                Ok(err) => Err(err.into()),
                Err(_) => Err(crate::error::Error::Protocol(
                    "malformed operation-status response".into(),
                )),
            }
        }
    }

    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DeviceRegistrationResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub assigned_hub: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub device_id: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub error_message: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        pub tpm: Option<TpmAuthKey>,
    }
}

#[cfg(test)]
mod tests {
    use super::response::RegistrationOperationStatus;

    #[test]
    fn parses_assigning_status() {
        let body = br#"{"operationId":"4.d0b...","status":"assigning"}"#;

        let status = RegistrationOperationStatus::parse(body).unwrap();

        assert_eq!(Some("4.d0b..."), status.operation_id.as_deref());
        assert_eq!(Some("assigning"), status.status.as_deref());
        assert!(status.registration_state.is_none());
    }

    #[test]
    fn parses_assigned_status_with_tpm_key() {
        let body = br#"{
            "operationId": "op-1",
            "status": "assigned",
            "registrationState": {
                "assignedHub": "hub.example.test",
                "deviceId": "device-1",
                "tpm": { "authenticationKey": "a2V5" }
            }
        }"#;

        let status = RegistrationOperationStatus::parse(body).unwrap();

        let state = status.registration_state.unwrap();
        assert_eq!(Some("hub.example.test"), state.assigned_hub.as_deref());
        assert_eq!(Some("device-1"), state.device_id.as_deref());
        assert_eq!("a2V5", state.tpm.unwrap().authentication_key);
    }

    #[test]
    fn unmodeled_status_is_preserved() {
        let body = br#"{"operationId":"op-1","status":"migrating"}"#;

        let status = RegistrationOperationStatus::parse(body).unwrap();

        assert_eq!(Some("migrating"), status.status.as_deref());
    }

    #[test]
    fn service_error_body_is_surfaced() {
        let body = br#"{"errorCode":401002,"message":"CA not configured"}"#;

        let err = RegistrationOperationStatus::parse(body).unwrap_err();

        assert!(matches!(err, crate::error::Error::Service(_)));
    }

    #[test]
    fn garbage_body_is_a_protocol_error() {
        let err = RegistrationOperationStatus::parse(b"not json").unwrap_err();

        assert!(matches!(err, crate::error::Error::Protocol(_)));
    }
}
