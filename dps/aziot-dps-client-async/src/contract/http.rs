// Copyright (c) Microsoft. All rights reserved.

use crate::contract::{ProvisioningContract, RequestData, ResponseData};
use crate::error::Error;
use crate::http::HttpRequest;
use crate::schema;

/// HTTP rendering of the provisioning contract.
///
/// Registration and nonce requests `PUT` to the register endpoint; status
/// polls `GET` the operation endpoint. The nonce handshake expects the
/// service to answer `401 Unauthorized` with the encrypted authentication
/// key in the body.
#[derive(Debug)]
pub struct ContractHttp {
    endpoint: url::Url,
    id_scope: String,
}

impl ContractHttp {
    pub fn new(endpoint: url::Url, id_scope: impl Into<String>) -> Result<Self, Error> {
        let id_scope = id_scope.into();
        if id_scope.is_empty() {
            return Err(Error::Configuration("id scope cannot be empty"));
        }

        Ok(ContractHttp { endpoint, id_scope })
    }

    fn register_uri(&self, registration_id: &str) -> url::Url {
        let mut uri = self.endpoint.clone();
        uri.set_path(&format!(
            "{}/registrations/{}/register",
            self.id_scope, registration_id
        ));
        uri.set_query(Some(crate::API_VERSION));

        uri
    }

    fn operation_uri(&self, registration_id: &str, operation_id: &str) -> url::Url {
        let mut uri = self.endpoint.clone();
        uri.set_path(&format!(
            "{}/registrations/{}/operations/{}",
            self.id_scope, registration_id, operation_id
        ));
        uri.set_query(Some(crate::API_VERSION));

        uri
    }
}

fn register_body(request: &RequestData) -> Result<serde_json::Value, Error> {
    let body = if request.is_certificate_based() {
        serde_json::to_value(schema::request::DeviceRegistration {
            registration_id: request.registration_id().to_string(),
        })
    } else {
        let endorsement_key = request
            .endorsement_key()
            .ok_or(Error::Configuration("registration requires an endorsement key"))?;
        let storage_root_key = request
            .storage_root_key()
            .ok_or(Error::Configuration("registration requires a storage root key"))?;

        serde_json::to_value(schema::request::TpmRegistration {
            registration_id: request.registration_id().to_string(),
            tpm: schema::TpmAttestation::new(endorsement_key, storage_root_key),
        })
    };

    Ok(body.expect("cannot fail to serialize request body"))
}

#[async_trait::async_trait]
impl ProvisioningContract for ContractHttp {
    async fn register(&self, request: &RequestData) -> Result<ResponseData, Error> {
        let uri = self.register_uri(request.registration_id());
        let body = register_body(request)?;

        let mut http_request = HttpRequest::put(request.tls().clone(), uri.as_str(), body);
        if let Some(token) = request.sas_token() {
            http_request
                .add_header(hyper::header::AUTHORIZATION, token)
                .map_err(Error::Transport)?;
        }

        log::info!("Sending registration request.");
        let response = http_request.json_response().await.map_err(Error::Transport)?;

        Ok(match response.status() {
            hyper::StatusCode::OK | hyper::StatusCode::ACCEPTED => {
                ResponseData::received(response.into_body())
            }
            _ => ResponseData::failed(Some(response.into_body())),
        })
    }

    async fn request_nonce(&self, request: &RequestData) -> Result<ResponseData, Error> {
        let uri = self.register_uri(request.registration_id());
        let body = register_body(request)?;

        let http_request = HttpRequest::put(request.tls().clone(), uri.as_str(), body);

        log::info!("Requesting registration nonce.");
        let response = http_request.json_response().await.map_err(Error::Transport)?;

        // The service presents the encrypted nonce with 401 Unauthorized.
        Ok(match response.status() {
            hyper::StatusCode::UNAUTHORIZED => ResponseData::received(response.into_body()),
            _ => ResponseData::failed(Some(response.into_body())),
        })
    }

    async fn operation_status(&self, request: &RequestData) -> Result<ResponseData, Error> {
        let operation_id = request
            .operation_id()
            .ok_or(Error::Configuration("status poll requires an operation id"))?;

        let uri = self.operation_uri(request.registration_id(), operation_id);

        let mut http_request: HttpRequest<()> = HttpRequest::get(request.tls().clone(), uri.as_str());
        if let Some(token) = request.sas_token() {
            http_request
                .add_header(hyper::header::AUTHORIZATION, token)
                .map_err(Error::Transport)?;
        }

        let response = http_request.json_response().await.map_err(Error::Transport)?;

        Ok(match response.status() {
            hyper::StatusCode::OK | hyper::StatusCode::ACCEPTED => {
                ResponseData::received(response.into_body())
            }
            _ => ResponseData::failed(Some(response.into_body())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ContractHttp;

    #[test]
    fn uris_follow_the_service_layout() {
        let contract = ContractHttp::new(
            url::Url::parse("https://global.azure-devices-provisioning.net").unwrap(),
            "0ne00AA",
        )
        .unwrap();

        assert_eq!(
            "https://global.azure-devices-provisioning.net/0ne00AA/registrations/device-1/register?api-version=2018-11-01",
            contract.register_uri("device-1").as_str()
        );

        assert_eq!(
            "https://global.azure-devices-provisioning.net/0ne00AA/registrations/device-1/operations/op-1?api-version=2018-11-01",
            contract.operation_uri("device-1", "op-1").as_str()
        );
    }

    #[test]
    fn empty_id_scope_is_rejected() {
        let err = ContractHttp::new(
            url::Url::parse("https://global.azure-devices-provisioning.net").unwrap(),
            "",
        )
        .unwrap_err();

        assert!(matches!(err, crate::error::Error::Configuration(_)));
    }
}
