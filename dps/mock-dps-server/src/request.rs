// Copyright (c) Microsoft. All rights reserved.

use aziot_dps_client_async::schema;

use crate::server::{Context, ParsedRequest, Response};

/// Key the service "encrypts" into the nonce response.
const NONCE_AUTH_KEY: &[u8] = b"mock-dps-nonce-key";

/// Hub authentication key returned with TPM assignments.
const HUB_AUTH_KEY: &[u8] = b"mock-dps-tpm-key";

pub(crate) struct Operation {
    registration_id: String,
    tpm: bool,
    remaining_polls: u32,
}

fn register(registration_id: &str, req: &ParsedRequest, context: &Context) -> Response {
    let body = if let Some(body) = &req.body {
        let body: serde_json::Value = match serde_json::from_str(body) {
            Ok(body) => body,
            Err(_) => return Response::bad_request("failed to parse register body"),
        };

        if body["registrationId"] != registration_id {
            return Response::bad_request("registration IDs in URI and request mismatch");
        }

        body
    } else {
        return Response::bad_request("missing required body for register");
    };

    let tpm = body["tpm"] != serde_json::Value::Null;

    // TPM enrollments complete the nonce handshake before the authenticated
    // registration call: the first unauthenticated PUT is answered with 401
    // and the encrypted authentication key.
    if tpm && !req.headers.contains_key("authorization") {
        return Response::json(
            hyper::StatusCode::UNAUTHORIZED,
            schema::response::TpmAuthKey {
                authentication_key: base64::encode(NONCE_AUTH_KEY),
            },
        );
    }

    let operation_id = uuid::Uuid::new_v4().to_hyphenated().to_string();

    let mut context = context.lock().unwrap();

    let operation = Operation {
        registration_id: registration_id.to_string(),
        tpm,
        remaining_polls: context.assigning_polls,
    };
    context
        .in_progress_operations
        .insert(operation_id.clone(), operation);

    Response::json(
        hyper::StatusCode::ACCEPTED,
        schema::response::RegistrationOperationStatus {
            operation_id: Some(operation_id),
            status: Some("assigning".to_string()),
            registration_state: None,
        },
    )
}

fn operation_status(operation_id: &str, context: &Context) -> Response {
    let mut context = context.lock().unwrap();

    let operation = match context.in_progress_operations.get_mut(operation_id) {
        Some(operation) => operation,
        None => return Response::not_found(format!("operation {} not found", operation_id)),
    };

    if operation.remaining_polls > 0 {
        operation.remaining_polls -= 1;

        return Response::json(
            hyper::StatusCode::OK,
            schema::response::RegistrationOperationStatus {
                operation_id: Some(operation_id.to_string()),
                status: Some("assigning".to_string()),
                registration_state: None,
            },
        );
    }

    let operation = context
        .in_progress_operations
        .remove(operation_id)
        .expect("operation was just looked up");

    let tpm = if operation.tpm {
        Some(schema::response::TpmAuthKey {
            authentication_key: base64::encode(HUB_AUTH_KEY),
        })
    } else {
        None
    };

    Response::json(
        hyper::StatusCode::OK,
        schema::response::RegistrationOperationStatus {
            operation_id: Some(operation_id.to_string()),
            status: Some("assigned".to_string()),
            registration_state: Some(schema::response::DeviceRegistrationResult {
                // Keep provisioned devices pointed at this process.
                assigned_hub: Some("localhost".to_string()),
                device_id: Some(operation.registration_id),
                error_message: None,
                tpm,
            }),
        },
    )
}

fn get_param(captures: &regex::Captures<'_>, name: &str) -> Result<String, Response> {
    let value = &captures[name];

    let value = percent_encoding::percent_decode_str(value)
        .decode_utf8()
        .map_err(|_| Response::bad_request(format!("bad {}", name)))?
        .to_string();

    Ok(value)
}

pub(crate) fn process_dps_request(req: &ParsedRequest, context: &Context) -> Response {
    lazy_static::lazy_static! {
        static ref DPS_REGEX: regex::Regex = regex::Regex::new(
            "/(?P<scopeId>[^/]+)/registrations/(?P<registrationId>[^/]+)/(?P<action>.+)\\?api-version=\\d{4}-\\d{2}-\\d{2}$"
        ).unwrap();

        static ref OPERATION_STATUS_REGEX: regex::Regex = regex::Regex::new(
            "operations/(?P<operationId>[^/]+)$"
        ).unwrap();
    }

    let captures = match DPS_REGEX.captures(&req.uri) {
        Some(captures) => captures,
        None => return Response::not_found(format!("{} not found", req.uri)),
    };

    let registration_id = match get_param(&captures, "registrationId") {
        Ok(registration_id) => registration_id,
        Err(response) => return response,
    };

    let action = match get_param(&captures, "action") {
        Ok(action) => action,
        Err(response) => return response,
    };

    if OPERATION_STATUS_REGEX.is_match(&action) {
        if req.method != hyper::Method::GET {
            return Response::method_not_allowed(&req.method);
        }

        let captures = OPERATION_STATUS_REGEX
            .captures(&action)
            .expect("action was just matched");
        let operation_id = match get_param(&captures, "operationId") {
            Ok(operation_id) => operation_id,
            Err(response) => return response,
        };

        operation_status(&operation_id, context)
    } else if action == "register" {
        if req.method != hyper::Method::PUT {
            return Response::method_not_allowed(&req.method);
        }

        register(&registration_id, req, context)
    } else {
        Response::not_found(format!("{} not found", req.uri))
    }
}
