//! Restricted Rhai engine used to run frame scripts.
//!
//! The sandbox exposes Rhai's standard package (numbers, math, strings, arrays,
//! object maps, timestamps) plus a small registered API:
//!
//! | Module    | Functions                                                   |
//! |-----------|-------------------------------------------------------------|
//! | `json`    | `decode(text)`, `encode(value)`                             |
//! | `regex`   | `is_match(text, re)`, `find_all(text, re)`,                 |
//! |           | `captures(text, re)`, `replace_all(text, re, replacement)`  |
//! | `time`    | `now_ms()`, `now_iso()`                                     |
//! | `console` | `log(v)`, `info(v)`, `warn(v)`, `error(v)` (when enabled)   |
//!
//! Nothing reaches the filesystem, processes or the network: `eval` is disabled
//! and `import` goes through a resolver that resolves nothing. `print` and
//! `debug` never write to host output; with the console enabled they become
//! [`TransformerEvent::Console`] events, otherwise they are discarded.
//!
//! # Limits
//!
//! - **Time**: every entry into the engine arms a wall-clock deadline that the
//!   progress callback checks; on expiry the run is terminated.
//! - **Memory**: the byte limit is split between string length and element
//!   count so that a full container of full strings still fits inside it (see
//!   [`ValueLimits`]). Rhai sums nested strings and elements when it checks a
//!   value, and `push`/`append` on arrays are re-registered to refuse growth
//!   past the ceiling.
//! - **Depth**: call and expression nesting are bounded.

use crate::events::{ConsoleLevel, Listeners, TransformerEvent};
use crate::scripting::error::ScriptError;
use chrono::Utc;
use regex::{Regex, RegexBuilder};
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{
    Array, CallFnOptions, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Module,
    Position, Scope, AST, INT,
};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the script entry point.
pub const PARSE_FN: &str = "parse";

const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FUNCTION_EXPR_DEPTH: usize = 32;
const MAX_REGEX_SIZE: usize = 1 << 20;
/// Operations between deadline checks.
const PROGRESS_CHECK_INTERVAL: u64 = 16;

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// Resource limits for script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEngineConfig {
    /// Wall-clock limit per script entry, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Memory ceiling in bytes
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,
    /// Expose the console shim and route `print`/`debug` to events
    #[serde(default = "default_enable_console")]
    pub enable_console: bool,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_memory_limit() -> usize {
    128 * 1024 * 1024
}

fn default_enable_console() -> bool {
    true
}

impl Default for ScriptEngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            memory_limit: default_memory_limit(),
            enable_console: default_enable_console(),
        }
    }
}

impl ScriptEngineConfig {
    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Per-value ceilings derived from `memory_limit`.
    pub fn value_limits(&self) -> ValueLimits {
        ValueLimits::for_budget(self.memory_limit)
    }

    /// Check that the limits are usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("script timeout_ms must be greater than zero".to_string());
        }
        if self.memory_limit < 1024 {
            return Err(format!(
                "script memory_limit must be at least 1024 bytes, got {}",
                self.memory_limit
            ));
        }
        Ok(())
    }
}

/// String and container ceilings carved out of one byte budget.
///
/// `slots * (string_len + SLOT_COST) <= budget`, so a container filled to
/// `slots` elements, each a string of `string_len` bytes, stays within the
/// budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLimits {
    /// Longest string, in bytes
    pub string_len: usize,
    /// Most elements in one array or map, nested elements included
    pub slots: usize,
    /// The byte budget the two were derived from
    pub budget: usize,
}

/// Bytes charged per array element or map entry (value plus key).
const SLOT_COST: usize = 2 * std::mem::size_of::<Dynamic>();

impl ValueLimits {
    fn for_budget(budget: usize) -> Self {
        let budget = budget.max(SLOT_COST + 1);
        // Balance the two ceilings around the square root of the slot count
        let slots = ((budget / SLOT_COST) as f64).sqrt() as usize;
        let slots = slots.max(1);
        let string_len = (budget / slots).saturating_sub(SLOT_COST).max(1);
        Self {
            string_len,
            slots,
            budget,
        }
    }
}

/// Approximate heap bytes held by `value`.
pub fn value_footprint(value: &Dynamic) -> usize {
    if let Some(text) = value.read_lock::<ImmutableString>() {
        return SLOT_COST + text.len();
    }
    if let Some(items) = value.read_lock::<Array>() {
        return SLOT_COST + items.iter().map(value_footprint).sum::<usize>();
    }
    if let Some(blob) = value.read_lock::<rhai::Blob>() {
        return SLOT_COST + blob.len();
    }
    if let Some(entries) = value.read_lock::<Map>() {
        return SLOT_COST
            + entries
                .iter()
                .map(|(key, v)| key.len() + value_footprint(v))
                .sum::<usize>();
    }
    SLOT_COST
}

fn too_large(what: &str) -> Box<EvalAltResult> {
    EvalAltResult::ErrorDataTooLarge(what.to_string(), Position::NONE).into()
}

fn ensure_room(limits: ValueLimits, array: &Array, incoming: &[Dynamic]) -> RhaiResult<()> {
    if array.len().saturating_add(incoming.len()) > limits.slots {
        return Err(too_large("Size of array"));
    }
    let held: usize = array.iter().chain(incoming).map(value_footprint).sum();
    if held > limits.budget {
        return Err(too_large("Total size of array"));
    }
    Ok(())
}

/// Shared wall-clock deadline read by the engine's progress callback.
#[derive(Debug, Clone)]
struct ExecutionClock {
    epoch: Instant,
    deadline_ns: Arc<AtomicU64>,
}

impl ExecutionClock {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            deadline_ns: Arc::new(AtomicU64::new(u64::MAX)),
        }
    }

    fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn arm(&self, timeout: Duration) {
        let budget = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        self.deadline_ns
            .store(self.now_ns().saturating_add(budget), Ordering::Relaxed);
    }

    fn disarm(&self) {
        self.deadline_ns.store(u64::MAX, Ordering::Relaxed);
    }

    fn expired(&self) -> bool {
        self.now_ns() > self.deadline_ns.load(Ordering::Relaxed)
    }
}

/// A configured, allow-listed Rhai engine.
pub struct Sandbox {
    engine: Engine,
    clock: ExecutionClock,
    config: ScriptEngineConfig,
}

impl Sandbox {
    /// Build an engine with `config`'s limits. Console output is delivered to
    /// `listeners`.
    pub fn new(config: ScriptEngineConfig, listeners: Listeners<TransformerEvent>) -> Self {
        let mut engine = Engine::new();
        let clock = ExecutionClock::new();

        let progress_clock = clock.clone();
        engine.on_progress(move |ops| {
            if ops % PROGRESS_CHECK_INTERVAL == 0 && progress_clock.expired() {
                Some(Dynamic::from("execution deadline exceeded"))
            } else {
                None
            }
        });

        let limits = config.value_limits();
        engine.set_max_string_size(limits.string_len);
        engine.set_max_array_size(limits.slots);
        engine.set_max_map_size(limits.slots);
        engine.register_fn(
            "push",
            move |array: &mut Array, item: Dynamic| -> RhaiResult<()> {
                ensure_room(limits, array, std::slice::from_ref(&item))?;
                array.push(item);
                Ok(())
            },
        );
        engine.register_fn(
            "append",
            move |array: &mut Array, items: Array| -> RhaiResult<()> {
                ensure_room(limits, array, &items)?;
                array.extend(items);
                Ok(())
            },
        );
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FUNCTION_EXPR_DEPTH);

        engine.disable_symbol("eval");
        engine.set_module_resolver(DummyModuleResolver::new());

        engine.register_static_module("json", json_module().into());
        engine.register_static_module("regex", regex_module().into());
        engine.register_static_module("time", time_module().into());

        if config.enable_console {
            let print_listeners = listeners.clone();
            engine.on_print(move |text| {
                print_listeners.emit(TransformerEvent::Console {
                    level: ConsoleLevel::Log,
                    message: text.to_string(),
                });
            });
            let debug_listeners = listeners.clone();
            engine.on_debug(move |text, _source, _pos| {
                debug_listeners.emit(TransformerEvent::Console {
                    level: ConsoleLevel::Debug,
                    message: text.to_string(),
                });
            });
            engine.register_static_module("console", console_module(&listeners).into());
        } else {
            engine.on_print(|_| {});
            engine.on_debug(|_, _, _| {});
        }

        Self {
            engine,
            clock,
            config,
        }
    }

    /// Limits this sandbox was built with.
    pub fn config(&self) -> &ScriptEngineConfig {
        &self.config
    }

    /// Parse `source` without running it.
    pub fn compile(&self, source: &str) -> Result<AST, ScriptError> {
        self.engine
            .compile(source)
            .map_err(|parse_error| ScriptError::SyntaxError {
                message: parse_error.to_string(),
            })
    }

    /// Run the top-level statements of `ast` under the time limit.
    pub fn run(&self, scope: &mut Scope<'static>, ast: &AST) -> Result<(), ScriptError> {
        self.guarded(|engine| engine.run_ast_with_scope(scope, ast))
    }

    /// Call `parse(arg)` under the time limit, without re-running top-level
    /// statements.
    pub fn call_parse(
        &self,
        scope: &mut Scope<'static>,
        ast: &AST,
        arg: Dynamic,
    ) -> Result<Dynamic, ScriptError> {
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        self.guarded(|engine| {
            engine.call_fn_with_options::<Dynamic>(options, scope, ast, PARSE_FN, (arg,))
        })
    }

    fn guarded<T>(
        &self,
        run: impl FnOnce(&Engine) -> RhaiResult<T>,
    ) -> Result<T, ScriptError> {
        self.clock.arm(self.config.timeout());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(&self.engine)));
        self.clock.disarm();

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ScriptError::from_rhai(err, self.config.timeout_ms)),
            Err(_) => Err(ScriptError::RuntimeError {
                message: "script engine panicked".to_string(),
                backtrace: None,
            }),
        }
    }
}

/// Parameter lists of every `parse` overload defined in `ast`.
pub fn parse_signatures(ast: &AST) -> Vec<Vec<String>> {
    ast.iter_functions()
        .filter(|f| f.name == PARSE_FN)
        .map(|f| f.params.iter().map(|p| p.to_string()).collect())
        .collect()
}

fn console_module(listeners: &Listeners<TransformerEvent>) -> Module {
    let mut module = Module::new();
    for (name, level) in [
        ("log", ConsoleLevel::Log),
        ("info", ConsoleLevel::Info),
        ("warn", ConsoleLevel::Warn),
        ("error", ConsoleLevel::Error),
    ] {
        let listeners = listeners.clone();
        module.set_native_fn(name, move |value: Dynamic| -> RhaiResult<()> {
            listeners.emit(TransformerEvent::Console {
                level,
                message: value.to_string(),
            });
            Ok(())
        });
    }
    module
}

fn json_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("decode", |text: ImmutableString| -> RhaiResult<Dynamic> {
        let value: serde_json::Value = serde_json::from_str(text.as_str())
            .map_err(|e| format!("json::decode: {}", e))?;
        Ok(json_to_dynamic(value))
    });
    module.set_native_fn("encode", |value: Dynamic| -> RhaiResult<ImmutableString> {
        serde_json::to_string(&dynamic_to_json(value))
            .map(Into::into)
            .map_err(|e| format!("json::encode: {}", e).into())
    });
    module
}

/// Convert parsed JSON into script values.
pub fn json_to_dynamic(value: serde_json::Value) -> Dynamic {
    use serde_json::Value;
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from(i),
            None => Dynamic::from(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Dynamic::from(s),
        Value::Array(items) => {
            Dynamic::from_array(items.into_iter().map(json_to_dynamic).collect::<Array>())
        }
        Value::Object(entries) => Dynamic::from_map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), json_to_dynamic(v)))
                .collect::<Map>(),
        ),
    }
}

/// Convert a script value into JSON. Values with no JSON form become strings.
pub fn dynamic_to_json(value: Dynamic) -> serde_json::Value {
    use serde_json::Value;
    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return Value::from(i);
    }
    if let Ok(f) = value.as_float() {
        return serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number);
    }
    if value.is_array() {
        return value
            .into_array()
            .map(|items| Value::Array(items.into_iter().map(dynamic_to_json).collect()))
            .unwrap_or(Value::Null);
    }
    if value.is_map() {
        return value
            .try_cast::<Map>()
            .map(|entries| {
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                        .collect(),
                )
            })
            .unwrap_or(Value::Null);
    }
    Value::String(value.to_string())
}

fn compile_regex(pattern: &str) -> RhaiResult<Regex> {
    RegexBuilder::new(pattern)
        .size_limit(MAX_REGEX_SIZE)
        .build()
        .map_err(|e| format!("invalid regex '{}': {}", pattern, e).into())
}

fn regex_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn(
        "is_match",
        |text: ImmutableString, pattern: ImmutableString| -> RhaiResult<bool> {
            Ok(compile_regex(pattern.as_str())?.is_match(text.as_str()))
        },
    );
    module.set_native_fn(
        "find_all",
        |text: ImmutableString, pattern: ImmutableString| -> RhaiResult<Array> {
            Ok(compile_regex(pattern.as_str())?
                .find_iter(text.as_str())
                .map(|m| Dynamic::from(m.as_str().to_string()))
                .collect())
        },
    );
    module.set_native_fn(
        "captures",
        |text: ImmutableString, pattern: ImmutableString| -> RhaiResult<Array> {
            let re = compile_regex(pattern.as_str())?;
            Ok(re
                .captures(text.as_str())
                .map(|caps| {
                    caps.iter()
                        .map(|group| {
                            Dynamic::from(group.map_or(String::new(), |m| m.as_str().to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default())
        },
    );
    module.set_native_fn(
        "replace_all",
        |text: ImmutableString,
         pattern: ImmutableString,
         replacement: ImmutableString|
         -> RhaiResult<ImmutableString> {
            Ok(compile_regex(pattern.as_str())?
                .replace_all(text.as_str(), replacement.as_str())
                .into_owned()
                .into())
        },
    );
    module
}

fn time_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("now_ms", || -> RhaiResult<INT> {
        Ok(Utc::now().timestamp_millis())
    });
    module.set_native_fn("now_iso", || -> RhaiResult<ImmutableString> {
        Ok(Utc::now().to_rfc3339().into())
    });
    module
}
