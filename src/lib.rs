//! Chat conversation gateway: conversations, messages and uploaded files
//! behind a small HTTP API, stored in a key-value store and an object store.

// Strict lints; warnings stay warnings so new toolchains do not break the build.
#![deny(unsafe_code)] // No unsafe code
#![warn(missing_docs)] // Public items must be documented
#![deny(non_camel_case_types)]
#![deny(unused_must_use)] // Results and futures must be handled
#![deny(non_snake_case)]
#![deny(non_upper_case_globals)]
#![deny(nonstandard_style)]
#![forbid(unsafe_op_in_unsafe_fn)]
// Clippy
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))] // No unwrap() outside tests
#![cfg_attr(not(test), deny(clippy::expect_used))] // No expect() outside tests
#![deny(clippy::panic)]
#![deny(clippy::print_stdout)] // Use tracing, not println!()
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::module_inception)]
#![deny(clippy::redundant_clone)]
#![deny(overflowing_literals)]

/// Conversation data-access layer: keys, records, gateway and configuration.
pub mod conversation;
/// HTTP server and API routes.
#[allow(clippy::missing_errors_doc, clippy::unused_async)]
pub mod server;
/// Entry helpers to start the chat gateway.
pub mod start_chat_gateway;
/// Key-value and object store abstractions with their backends.
pub mod storage;
