// Copyright (c) Microsoft. All rights reserved.

//! Minimal HTTP plumbing for the registration exchange.
//!
//! Deliberately not a general-purpose client: one request, one JSON response,
//! no retries. Retry-free behavior is part of the registration contract, and
//! the timeout is enforced by the task that issues the request.

use std::io::{Error, ErrorKind};

use aziot_dps_security::TlsConnector;

const CONTENT_TYPE_JSON: &str = "application/json";

pub(crate) struct HttpRequest<TBody>
where
    TBody: serde::Serialize,
{
    connector: TlsConnector,
    method: hyper::Method,
    uri: String,
    headers: http::HeaderMap<http::HeaderValue>,
    body: Option<TBody>,
}

impl<TBody> HttpRequest<TBody>
where
    TBody: serde::Serialize,
{
    pub fn get(connector: TlsConnector, uri: &str) -> Self {
        HttpRequest {
            connector,
            method: hyper::Method::GET,
            uri: uri.to_string(),
            headers: http::HeaderMap::default(),
            body: None,
        }
    }

    pub fn put(connector: TlsConnector, uri: &str, body: TBody) -> Self {
        HttpRequest {
            connector,
            method: hyper::Method::PUT,
            uri: uri.to_string(),
            headers: http::HeaderMap::default(),
            body: Some(body),
        }
    }

    pub fn add_header(
        &mut self,
        name: hyper::header::HeaderName,
        value: &str,
    ) -> Result<(), Error> {
        let value = http::HeaderValue::from_str(value)
            .map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;

        self.headers.insert(name, value);

        Ok(())
    }

    pub async fn json_response(self) -> Result<HttpResponse, Error> {
        let client: hyper::Client<_, hyper::Body> = hyper::Client::builder().build(self.connector);

        let mut request = hyper::Request::builder()
            .method(&self.method)
            .uri(&self.uri);

        let request_body = if let Some(body) = &self.body {
            request = request.header(hyper::header::CONTENT_TYPE, CONTENT_TYPE_JSON);

            serde_json::to_vec(body)
                .expect("cannot fail to serialize request")
                .into()
        } else {
            hyper::Body::default()
        };

        for (header_name, header_value) in &self.headers {
            request = request.header(header_name, header_value);
        }

        let request = request
            .body(request_body)
            .expect("cannot fail to create request");

        let response = client.request(request).await.map_err(|err| {
            if err.is_connect() {
                // Network error.
                Error::new(ErrorKind::NotConnected, err)
            } else {
                Error::new(ErrorKind::Other, err)
            }
        })?;

        let (
            http::response::Parts {
                status: response_status,
                headers: response_headers,
                ..
            },
            response_body,
        ) = response.into_parts();

        let is_json_response =
            if let Some(content_type) = response_headers.get(hyper::header::CONTENT_TYPE) {
                let content_type = content_type
                    .to_str()
                    .map_err(|err| Error::new(ErrorKind::InvalidData, err))?;

                content_type.contains(CONTENT_TYPE_JSON)
            } else {
                false
            };

        if !is_json_response {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "invalid Content-Type; expected JSON",
            ));
        }

        let response_body = hyper::body::to_bytes(response_body)
            .await
            .map_err(|err| Error::new(ErrorKind::Other, err))?;

        Ok(HttpResponse {
            status: response_status,
            body: response_body,
        })
    }
}

pub(crate) struct HttpResponse {
    status: hyper::StatusCode,
    body: hyper::body::Bytes,
}

impl HttpResponse {
    pub fn status(&self) -> hyper::StatusCode {
        self.status
    }

    pub fn into_body(self) -> hyper::body::Bytes {
        self.body
    }
}
