//! User scripts that turn frames into dataset values.
//!
//! Frames are handed to a script-defined `parse(frame)` function running inside
//! an embedded Rhai engine. The engine is sandboxed: no filesystem, process or
//! network access, a wall-clock limit per call, and memory and depth ceilings.
//!
//! # Architecture
//!
//! ```text
//! FrameTransformer
//!     ├── Sandbox (engine, limits, json/regex/time/console modules)
//!     └── CompiledScript (AST + persistent scope)
//!
//! ScriptTemplate
//!     └── csv, json, fixed-width starter scripts
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use rust_framer::scripting::{FrameTransformer, ScriptEngineConfig, ScriptTemplate};
//!
//! let mut transformer = FrameTransformer::new(ScriptEngineConfig::default());
//! transformer.load_script(ScriptTemplate::Json.source())?;
//!
//! let result = transformer.parse(r#"{"temp":25.5,"hum":60.2}"#);
//! assert!(result.success);
//! ```

pub mod error;
pub mod sandbox;
pub mod templates;
pub mod transformer;

pub use error::ScriptError;
pub use sandbox::{Sandbox, ScriptEngineConfig, ValueLimits};
pub use templates::{ScriptTemplate, DEFAULT_SCRIPT};
pub use transformer::{
    default_script, FrameTransformer, ParseResult, ScriptConfigUpdate, TransformerStats,
};
