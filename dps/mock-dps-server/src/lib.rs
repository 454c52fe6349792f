// Copyright (c) Microsoft. All rights reserved.

#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

//! Mock provisioning service for client tests.
//!
//! Serves the registration protocol over plain HTTP: `PUT .../register`
//! (including the TPM nonce handshake) and `GET .../operations/{id}`. Every
//! registration is reported as `assigning` for a configurable number of polls
//! and then assigned to the `localhost` hub.

mod request;
mod server;

pub use server::{new_context, serve, Context, ContextInner};
