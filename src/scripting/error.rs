//! Script failure taxonomy.
//!
//! Every failure inside the sandbox (syntax, signature, runtime fault, timeout,
//! resource ceiling, wrong return type) maps onto [`ScriptError`]. The frame
//! transformer never lets one escape as a panic: it is either returned from a
//! strict call such as `load_script` or folded into a failed `ParseResult`.

use rhai::{Dynamic, EvalAltResult, Position};

/// Error type for script loading and execution failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// Script compilation/syntax error
    ///
    /// The source could not be parsed, or it uses a disabled symbol such as
    /// `eval`.
    #[error("Syntax error: {message}")]
    SyntaxError {
        /// Human-readable description of the syntax error
        message: String,
    },

    /// Runtime error during script execution
    ///
    /// Raised by a `throw`, a type mismatch, a failed registered call, or an
    /// import the sandbox refuses to resolve.
    #[error("Runtime error: {message}{}", .backtrace.as_ref().map(|b| format!("\n{}", b)).unwrap_or_default())]
    RuntimeError {
        /// Human-readable description of the runtime error
        message: String,
        /// Chain of script function calls leading to the error
        backtrace: Option<String>,
    },

    /// The script defines no `parse` function
    #[error("Script must define a function named 'parse'")]
    MissingParseFunction,

    /// `parse` takes a parameter count other than one
    #[error("Function 'parse' must take exactly one parameter (the frame), found {params}")]
    InvalidSignature {
        /// Number of parameters declared
        params: usize,
    },

    /// `parse` uses the retired two-parameter form
    #[error("Legacy signature parse({first}, {second}) is no longer supported; use parse({first}) and split inside the function")]
    LegacySignature {
        /// First parameter identifier
        first: String,
        /// Second parameter identifier
        second: String,
    },

    /// Execution ran past the configured wall-clock limit
    #[error("Script execution timed out after {timeout_ms} ms")]
    Timeout {
        /// Configured limit in milliseconds
        timeout_ms: u64,
    },

    /// Execution hit the memory, stack or depth ceiling
    #[error("Resource limit exceeded: {message}")]
    ResourceLimit {
        /// Which ceiling was hit
        message: String,
    },

    /// Type conversion error between script and host values
    ///
    /// Raised when `parse` returns something other than an array.
    #[error("Type conversion error: expected {expected}, found {found}")]
    TypeConversionError {
        /// Expected type name
        expected: String,
        /// Actual type found
        found: String,
    },

    /// No compiled script is active
    #[error("No parse function loaded")]
    NotLoaded,
}

impl ScriptError {
    /// Convert a Rhai error, unwrapping nested function-call frames into a
    /// backtrace. `timeout_ms` is reported if the run was terminated.
    #[allow(clippy::boxed_local)] // Box is required as this is how Rhai returns errors
    pub fn from_rhai(err: Box<EvalAltResult>, timeout_ms: u64) -> Self {
        let mut frames = Vec::new();
        let mut current = *err;
        while let EvalAltResult::ErrorInFunctionCall(name, _, inner, pos) = current {
            frames.push(format!("  in call to function '{}'{}", name, at(pos)));
            current = *inner;
        }
        let backtrace = (!frames.is_empty()).then(|| frames.join("\n"));

        match current {
            EvalAltResult::ErrorTerminated(_, _) => ScriptError::Timeout { timeout_ms },
            EvalAltResult::ErrorParsing(parse_error, pos) => ScriptError::SyntaxError {
                message: format!("{}{}", parse_error, at(pos)),
            },
            EvalAltResult::ErrorDataTooLarge(what, pos) => ScriptError::ResourceLimit {
                message: format!("{} exceeds the memory limit{}", what, at(pos)),
            },
            EvalAltResult::ErrorStackOverflow(pos) => ScriptError::ResourceLimit {
                message: format!("call stack overflow{}", at(pos)),
            },
            EvalAltResult::ErrorTooManyOperations(pos) => ScriptError::ResourceLimit {
                message: format!("too many operations{}", at(pos)),
            },
            EvalAltResult::ErrorRuntime(value, pos) => ScriptError::RuntimeError {
                message: format!("{}{}", describe(&value), at(pos)),
                backtrace,
            },
            other => ScriptError::RuntimeError {
                message: other.to_string(),
                backtrace,
            },
        }
    }
}

/// Text for a thrown value of any type.
fn describe(value: &Dynamic) -> String {
    if value.is_unit() {
        "script threw an empty value".to_string()
    } else {
        value.to_string()
    }
}

fn at(pos: Position) -> String {
    if pos.is_none() {
        String::new()
    } else {
        format!(" ({})", pos)
    }
}
