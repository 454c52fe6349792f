// Copyright (c) Microsoft. All rights reserved.

use std::sync::{Arc, Mutex};

pub(crate) struct ParsedRequest {
    pub method: hyper::Method,
    pub uri: String,
    pub headers: std::collections::HashMap<String, String>,
    pub body: Option<String>,
}

impl ParsedRequest {
    async fn from_http(req: hyper::Request<hyper::Body>) -> Result<Self, Response> {
        let method = req.method().clone();
        let uri = req.uri().to_string();
        log::debug!("> {} {} {:?}", method, uri, req.version());

        let mut headers = std::collections::HashMap::with_capacity(req.headers().len());
        for (key, value) in req.headers() {
            let key = key.to_string();
            let value = value
                .to_str()
                .map_err(|_| Response::bad_request("bad header value"))?
                .to_string();

            log::debug!("> {}: {}", key, value);
            headers.insert(key, value);
        }

        let body = hyper::body::to_bytes(req.into_body())
            .await
            .map_err(|_| Response::bad_request("unable to get body"))?
            .to_vec();

        let body = if body.is_empty() {
            None
        } else {
            let body = std::str::from_utf8(&body)
                .map_err(|_| Response::bad_request("unable to parse body"))?
                .to_string();

            log::debug!("> {}", body);

            Some(body)
        };

        Ok(ParsedRequest {
            method,
            uri,
            headers,
            body,
        })
    }
}

pub(crate) enum Response {
    Error {
        status: hyper::StatusCode,
        message: String,
    },

    Json {
        status: hyper::StatusCode,
        body: String,
    },
}

impl Response {
    pub fn bad_request(message: impl std::fmt::Display) -> Self {
        Response::Error {
            status: hyper::StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    pub fn not_found(message: impl std::fmt::Display) -> Self {
        Response::Error {
            status: hyper::StatusCode::NOT_FOUND,
            message: message.to_string(),
        }
    }

    pub fn method_not_allowed(method: &hyper::Method) -> Self {
        Response::Error {
            status: hyper::StatusCode::METHOD_NOT_ALLOWED,
            message: format!("{} not allowed", method),
        }
    }

    pub fn json(status: hyper::StatusCode, body: impl serde::Serialize) -> Self {
        let body = serde_json::to_string(&body).expect("cannot fail to serialize response");

        Response::Json { status, body }
    }

    pub fn to_http(self) -> hyper::Response<hyper::Body> {
        // Error responses carry a JSON error body so clients can decode the
        // rejection the same way the real service reports it.
        let (status, body) = match self {
            Response::Error { status, message } => {
                log::debug!("< {} {}", status, message);

                #[derive(serde::Serialize)]
                struct ErrorBody {
                    #[serde(rename = "errorCode")]
                    code: u16,
                    message: String,
                }

                let body = serde_json::to_string(&ErrorBody {
                    code: status.as_u16(),
                    message,
                })
                .expect("cannot fail to serialize response");

                (status, body)
            }

            Response::Json { status, body } => {
                log::debug!("< {} {}", status, body);

                (status, body)
            }
        };

        hyper::Response::builder()
            .status(status)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(hyper::Body::from(body))
            .expect("cannot fail to create response")
    }
}

pub struct ContextInner {
    /// Polls each operation reports `assigning` for before it is assigned.
    pub assigning_polls: u32,

    pub(crate) in_progress_operations: std::collections::BTreeMap<String, crate::request::Operation>,
}

impl ContextInner {
    pub fn new(assigning_polls: u32) -> Self {
        ContextInner {
            assigning_polls,
            in_progress_operations: std::collections::BTreeMap::new(),
        }
    }
}

pub type Context = Arc<Mutex<ContextInner>>;

pub fn new_context(assigning_polls: u32) -> Context {
    Arc::new(Mutex::new(ContextInner::new(assigning_polls)))
}

async fn serve_request(
    context: Context,
    req: hyper::Request<hyper::Body>,
) -> Result<hyper::Response<hyper::Body>, std::convert::Infallible> {
    let req = match ParsedRequest::from_http(req).await {
        Ok(req) => req,
        Err(response) => return Ok(response.to_http()),
    };

    Ok(crate::request::process_dps_request(&req, &context).to_http())
}

/// Serves the mock provisioning service on `listener` until the task is
/// dropped.
pub async fn serve(
    listener: tokio::net::TcpListener,
    context: Context,
) -> Result<(), hyper::Error> {
    let incoming = hyper::server::conn::AddrIncoming::from_listener(listener)?;

    hyper::Server::builder(incoming)
        .serve(hyper::service::make_service_fn(move |_| {
            let context = context.clone();

            let service = hyper::service::service_fn(move |req| {
                serve_request(context.clone(), req)
            });

            async move { Ok::<_, std::convert::Infallible>(service) }
        }))
        .await
}
