//! # Rust Framer Core Library
//!
//! Turns an arbitrarily fragmented byte stream into discrete frames, verifies
//! them, and hands each payload to a user-supplied, sandboxed script that
//! returns a list of dataset values. The command-line frontend (`main.rs`) is a
//! thin driver over this library.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered settings (`config::Settings`) loaded with figment from
//!   defaults, a TOML file and `RUST_FRAMER_` environment variables.
//! - **`data`**: The fixed-capacity `CircularBuffer` that accumulates incoming bytes.
//! - **`error`**: The crate-level `FramerError` enum and `AppResult` alias.
//! - **`events`**: Subscriber registry and the notifications raised by readers and
//!   transformers.
//! - **`logging`**: tracing-subscriber initialization.
//! - **`parsing`**: Checksums, payload decoders, the `Frame` record and the
//!   `FrameReader` state machine.
//! - **`scripting`**: The Rhai sandbox, `FrameTransformer` and starter templates.

pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod logging;
pub mod parsing;
pub mod scripting;

pub use error::{AppResult, FramerError};
