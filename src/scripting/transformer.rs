//! Reloadable user script that turns frame payloads into dataset values.
//!
//! A [`FrameTransformer`] holds one compiled script defining `parse(frame)`. The
//! function receives the frame as a string (or, through
//! [`parse_binary`](FrameTransformer::parse_binary), as an array of byte values)
//! and must return an array; every element is converted to a string.
//!
//! ```rust,ignore
//! use rust_framer::scripting::{FrameTransformer, ScriptEngineConfig};
//!
//! let mut transformer = FrameTransformer::new(ScriptEngineConfig::default());
//! transformer.load_script("fn parse(frame) { frame.split(\";\") }")?;
//!
//! let result = transformer.parse("1;2;3");
//! assert_eq!(result.datasets, vec!["1", "2", "3"]);
//! ```
//!
//! Failures never escape `parse`: syntax errors, thrown values, timeouts and
//! non-array returns all come back as a [`ParseResult`] with `success == false`.

use crate::events::{Listeners, TransformerEvent};
use crate::parsing::decoder::{self, DecoderMethod};
use crate::parsing::frame::Frame;
use crate::scripting::error::ScriptError;
use crate::scripting::sandbox::{parse_signatures, Sandbox, ScriptEngineConfig};
use crate::scripting::templates::DEFAULT_SCRIPT;
use rhai::{Array, Dynamic, Scope, AST, INT};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Time limit for the disposable sandbox used by `validate_syntax`.
const VALIDATION_TIMEOUT_MS: u64 = 1000;

/// Outcome of one `parse` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseResult {
    /// Values returned by the script, in order
    pub datasets: Vec<String>,
    /// Whether the script ran and returned an array
    pub success: bool,
    /// Failure description when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent in the call
    pub execution_time: Duration,
}

impl ParseResult {
    fn succeeded(datasets: Vec<String>, execution_time: Duration) -> Self {
        Self {
            datasets,
            success: true,
            error: None,
            execution_time,
        }
    }

    fn failed(error: String, execution_time: Duration) -> Self {
        Self {
            datasets: Vec::new(),
            success: false,
            error: Some(error),
            execution_time,
        }
    }
}

/// Partial update applied by [`FrameTransformer::update_config`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptConfigUpdate {
    /// New timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// New memory ceiling in bytes
    pub memory_limit: Option<usize>,
    /// Enable or disable the console shim
    pub enable_console: Option<bool>,
}

/// Snapshot of transformer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransformerStats {
    /// Active timeout in milliseconds
    pub timeout_ms: u64,
    /// Active memory ceiling in bytes
    pub memory_limit: usize,
    /// Whether a compiled `parse` function is active
    pub ready: bool,
    /// Number of `parse`/`parse_binary` calls
    pub parse_calls: u64,
    /// Number of those calls that failed
    pub parse_failures: u64,
}

struct CompiledScript {
    ast: AST,
    scope: Scope<'static>,
    source: String,
}

/// Runs a user-supplied `parse` function over frame payloads.
pub struct FrameTransformer {
    config: ScriptEngineConfig,
    /// `None` after `destroy` until the next load
    sandbox: Option<Sandbox>,
    script: Option<CompiledScript>,
    listeners: Listeners<TransformerEvent>,
    parse_calls: u64,
    parse_failures: u64,
}

impl FrameTransformer {
    /// Build a sandbox with `config` and load the default script.
    pub fn new(config: ScriptEngineConfig) -> Self {
        let listeners = Listeners::new();
        let sandbox = Sandbox::new(config, listeners.clone());
        let script = match compile_script(&sandbox, DEFAULT_SCRIPT) {
            Ok(script) => Some(script),
            Err(e) => {
                warn!(error = %e, "Default script failed to load");
                None
            }
        };
        Self {
            config,
            sandbox: Some(sandbox),
            script,
            listeners,
            parse_calls: 0,
            parse_failures: 0,
        }
    }

    /// Receive console, parsed, error, warning and script-loaded events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransformerEvent> {
        self.listeners.subscribe()
    }

    /// Compile, check and activate `source`.
    ///
    /// On failure the previously active script stays in place and an error
    /// event (or a warning event for the legacy two-parameter signature) is
    /// emitted.
    pub fn load_script(&mut self, source: &str) -> Result<(), ScriptError> {
        match compile_script(self.sandbox(), source) {
            Ok(script) => {
                self.script = Some(script);
                info!("Frame script loaded");
                self.listeners.emit(TransformerEvent::ScriptLoaded);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Frame script rejected");
                let event = match e {
                    ScriptError::LegacySignature { .. } => TransformerEvent::Warning(e.to_string()),
                    _ => TransformerEvent::Error(e.to_string()),
                };
                self.listeners.emit(event);
                Err(e)
            }
        }
    }

    /// Run `parse` on a text frame.
    pub fn parse(&mut self, frame: &str) -> ParseResult {
        self.invoke(Dynamic::from(frame.to_string()))
    }

    /// Run `parse` on a binary frame, passed as an array of byte values.
    pub fn parse_binary(&mut self, frame: &[u8]) -> ParseResult {
        let bytes: Array = frame.iter().map(|&b| Dynamic::from(INT::from(b))).collect();
        self.invoke(Dynamic::from_array(bytes))
    }

    /// Decode a frame's payload with `method`, then run `parse` on the text.
    pub fn parse_frame(&mut self, frame: &Frame, method: DecoderMethod) -> ParseResult {
        let text = decoder::decode(&frame.data, method);
        self.parse(&text)
    }

    fn invoke(&mut self, arg: Dynamic) -> ParseResult {
        let started = Instant::now();
        self.parse_calls += 1;

        let outcome = match (&self.sandbox, self.script.as_mut()) {
            (Some(sandbox), Some(script)) => sandbox
                .call_parse(&mut script.scope, &script.ast, arg)
                .and_then(into_datasets),
            _ => Err(ScriptError::NotLoaded),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(datasets) => {
                let result = ParseResult::succeeded(datasets, elapsed);
                self.listeners.emit(TransformerEvent::Parsed(result.clone()));
                result
            }
            Err(e) => {
                self.parse_failures += 1;
                let message = e.to_string();
                debug!(error = %message, "Frame script failed");
                self.listeners.emit(TransformerEvent::Error(message.clone()));
                ParseResult::failed(message, elapsed)
            }
        }
    }

    /// Parse `frames` on tokio's blocking pool and hand the transformer back.
    ///
    /// Script calls can run for up to the configured timeout each, so async
    /// callers use this instead of calling [`parse_frame`](Self::parse_frame)
    /// on a runtime worker.
    pub async fn parse_frames_blocking(
        mut self,
        frames: Vec<Frame>,
        method: DecoderMethod,
    ) -> Result<(Self, Vec<ParseResult>), ScriptError> {
        tokio::task::spawn_blocking(move || {
            let results: Vec<ParseResult> = frames
                .iter()
                .map(|frame| self.parse_frame(frame, method))
                .collect();
            (self, results)
        })
        .await
        .map_err(|e| ScriptError::RuntimeError {
            message: format!("parse task failed: {}", e),
            backtrace: None,
        })
    }

    /// Check `source` in a disposable sandbox, leaving the active script alone.
    pub fn validate_syntax(&self, source: &str) -> Result<(), ScriptError> {
        let config = ScriptEngineConfig {
            timeout_ms: VALIDATION_TIMEOUT_MS.min(self.config.timeout_ms),
            enable_console: false,
            ..self.config
        };
        let scratch = Sandbox::new(config, Listeners::new());
        compile_script(&scratch, source).map(|_| ())
    }

    /// Active limits.
    pub fn config(&self) -> &ScriptEngineConfig {
        &self.config
    }

    fn sandbox(&mut self) -> &Sandbox {
        self.sandbox
            .get_or_insert_with(|| Sandbox::new(self.config, self.listeners.clone()))
    }

    /// Replace the limits. Any change rebuilds the sandbox and reloads the
    /// active script under the new limits; if the reload fails no script is
    /// active afterwards.
    pub fn set_config(&mut self, config: ScriptEngineConfig) {
        if config == self.config {
            return;
        }
        self.config = config;
        self.sandbox = Some(Sandbox::new(config, self.listeners.clone()));
        debug!(?config, "Script sandbox rebuilt");

        let Some(previous) = self.script.take() else {
            return;
        };
        match compile_script(self.sandbox(), &previous.source) {
            Ok(script) => self.script = Some(script),
            Err(e) => {
                warn!(error = %e, "Active script failed to reload under new limits");
                self.listeners.emit(TransformerEvent::Error(e.to_string()));
            }
        }
    }

    /// Change some limits, keeping the rest.
    pub fn update_config(&mut self, update: ScriptConfigUpdate) {
        let current = self.config;
        self.set_config(ScriptEngineConfig {
            timeout_ms: update.timeout_ms.unwrap_or(current.timeout_ms),
            memory_limit: update.memory_limit.unwrap_or(current.memory_limit),
            enable_console: update.enable_console.unwrap_or(current.enable_console),
        });
    }

    /// Source of the active script.
    pub fn source(&self) -> Option<&str> {
        self.script.as_ref().map(|s| s.source.as_str())
    }

    /// True when the active script differs from the default one.
    pub fn is_modified(&self) -> bool {
        self.source() != Some(DEFAULT_SCRIPT)
    }

    /// True when a compiled `parse` function is active.
    pub fn is_ready(&self) -> bool {
        self.script.is_some()
    }

    /// Current limits, readiness and call counters.
    pub fn stats(&self) -> TransformerStats {
        let config = &self.config;
        TransformerStats {
            timeout_ms: config.timeout_ms,
            memory_limit: config.memory_limit,
            ready: self.is_ready(),
            parse_calls: self.parse_calls,
            parse_failures: self.parse_failures,
        }
    }

    /// Go back to the default script.
    pub fn reset(&mut self) -> Result<(), ScriptError> {
        self.load_script(DEFAULT_SCRIPT)
    }

    /// Release the script and the interpreter, and disconnect every
    /// subscriber. A later `load_script` or `reset` builds a fresh sandbox.
    pub fn destroy(&mut self) {
        self.script = None;
        self.sandbox = None;
        self.listeners.clear();
    }
}

impl Default for FrameTransformer {
    fn default() -> Self {
        Self::new(ScriptEngineConfig::default())
    }
}

/// The script every new transformer starts with.
pub fn default_script() -> &'static str {
    DEFAULT_SCRIPT
}

fn compile_script(sandbox: &Sandbox, source: &str) -> Result<CompiledScript, ScriptError> {
    let ast = sandbox.compile(source)?;
    check_signature(&ast)?;

    let mut scope = Scope::new();
    sandbox.run(&mut scope, &ast)?;

    Ok(CompiledScript {
        ast,
        scope,
        source: source.to_string(),
    })
}

fn check_signature(ast: &AST) -> Result<(), ScriptError> {
    let signatures = parse_signatures(ast);
    if signatures.iter().any(|params| params.len() == 1) {
        return Ok(());
    }
    match signatures.first() {
        None => Err(ScriptError::MissingParseFunction),
        Some(params) if params.len() == 2 => Err(ScriptError::LegacySignature {
            first: params[0].clone(),
            second: params[1].clone(),
        }),
        Some(params) => Err(ScriptError::InvalidSignature {
            params: params.len(),
        }),
    }
}

fn into_datasets(value: Dynamic) -> Result<Vec<String>, ScriptError> {
    if !value.is_array() {
        return Err(ScriptError::TypeConversionError {
            expected: "array".to_string(),
            found: value.type_name().to_string(),
        });
    }
    let items = value
        .into_array()
        .map_err(|found| ScriptError::TypeConversionError {
            expected: "array".to_string(),
            found: found.to_string(),
        })?;
    Ok(items.iter().map(ToString::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> FrameTransformer {
        FrameTransformer::new(ScriptEngineConfig::default())
    }

    #[test]
    fn test_default_script_splits_on_commas() {
        let mut t = transformer();
        assert!(t.is_ready());
        assert!(!t.is_modified());
        assert_eq!(t.parse("a,b,c").datasets, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_elements_coerced_to_strings() {
        let mut t = transformer();
        t.load_script("fn parse(frame) { [1, 2.5, true, frame.len()] }")
            .unwrap();
        assert_eq!(t.parse("abcd").datasets, vec!["1", "2.5", "true", "4"]);
    }

    #[test]
    fn test_parse_binary_receives_byte_values() {
        let mut t = transformer();
        t.load_script("fn parse(frame) { [frame.len(), frame[0] + frame[1]] }")
            .unwrap();
        assert_eq!(t.parse_binary(&[10, 20, 30]).datasets, vec!["3", "30"]);
    }

    #[test]
    fn test_missing_parse_function() {
        let mut t = transformer();
        let err = t.load_script("fn transform(frame) { [frame] }").unwrap_err();
        assert_eq!(err, ScriptError::MissingParseFunction);
        // Previous script stays active
        assert!(!t.is_modified());
        assert_eq!(t.parse("x,y").datasets, vec!["x", "y"]);
    }

    #[test]
    fn test_legacy_signature_emits_warning() {
        let mut t = transformer();
        let mut rx = t.subscribe();
        let err = t
            .load_script("fn parse(frame, separator) { frame.split(separator) }")
            .unwrap_err();
        assert_eq!(
            err,
            ScriptError::LegacySignature {
                first: "frame".to_string(),
                second: "separator".to_string()
            }
        );
        match rx.try_recv().unwrap() {
            TransformerEvent::Warning(text) => {
                assert!(text.contains("frame") && text.contains("separator"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_thrown_value_becomes_failed_result() {
        let mut t = transformer();
        t.load_script(r#"fn parse(frame) { throw "bad frame: " + frame; }"#)
            .unwrap();
        let result = t.parse("zz");
        assert!(!result.success);
        assert!(result.datasets.is_empty());
        assert!(result.error.unwrap().contains("bad frame: zz"));
        assert_eq!(t.stats().parse_failures, 1);
    }

    #[test]
    fn test_non_array_return_rejected() {
        let mut t = transformer();
        t.load_script("fn parse(frame) { frame }").unwrap();
        let result = t.parse("abc");
        assert!(!result.success);
        assert!(result.error.unwrap().contains("expected array"));
    }

    #[test]
    fn test_validate_syntax_leaves_active_script() {
        let t = transformer();
        assert!(t.validate_syntax("fn parse(frame) { [frame] }").is_ok());
        assert!(matches!(
            t.validate_syntax("fn parse(frame) { [frame }"),
            Err(ScriptError::SyntaxError { .. })
        ));
        assert!(!t.is_modified());
    }

    #[test]
    fn test_set_config_reloads_active_script() {
        let mut t = transformer();
        t.load_script("fn parse(frame) { [frame, frame] }").unwrap();
        t.update_config(ScriptConfigUpdate {
            timeout_ms: Some(250),
            ..Default::default()
        });
        assert_eq!(t.stats().timeout_ms, 250);
        assert!(t.is_ready());
        assert_eq!(t.parse("q").datasets, vec!["q", "q"]);
    }

    #[test]
    fn test_destroy_and_reset() {
        let mut t = transformer();
        t.load_script("fn parse(frame) { [] }").unwrap();
        let mut rx = t.subscribe();
        t.destroy();
        assert!(t.sandbox.is_none());
        assert!(!t.is_ready());
        assert!(rx.try_recv().is_err());
        assert_eq!(t.config(), &ScriptEngineConfig::default());
        assert_eq!(
            t.parse("a").error.as_deref(),
            Some("No parse function loaded")
        );

        t.reset().unwrap();
        assert!(t.sandbox.is_some());
        assert_eq!(t.source(), Some(default_script()));
        assert_eq!(t.parse("x,y").datasets, vec!["x", "y"]);
    }
}
