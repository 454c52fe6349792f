// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::let_and_return,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

//! Device registration client for the provisioning service.
//!
//! One [`ProvisioningTask`] drives one registration attempt: it submits the
//! device's registration, polls the operation status until the service reports
//! a terminal outcome, and delivers that outcome through the registration
//! callback exactly once.

mod auth;
mod http;
mod register;
mod status;

pub mod contract;
pub mod error;
pub mod schema;
pub mod task;

pub use contract::http::ContractHttp;
pub use contract::{ContractState, ProvisioningContract, RequestData, ResponseData};
pub use error::Error;
pub use task::{
    ProvisioningClientConfig, ProvisioningDeviceStatus, ProvisioningTask, RegistrationCallback,
    RegistrationResult,
};

pub(crate) const API_VERSION: &str = "api-version=2018-11-01";

/// Ref <https://url.spec.whatwg.org/#path-percent-encode-set>
const PATH_SEGMENT_ENCODE_SET: &percent_encoding::AsciiSet = &percent_encoding::CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}');

pub(crate) const DPS_ENCODE_SET: &percent_encoding::AsciiSet =
    &PATH_SEGMENT_ENCODE_SET.add(b'=');
