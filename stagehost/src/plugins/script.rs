//! Rhai script modules.
//!
//! A script module defines `fn stages()` returning an array of class maps:
//!
//! ```rhai
//! fn plugin() {
//!     #{ name: "TextTools", version: "1.0.0", vendor: "Example" }
//! }
//!
//! fn stages() {
//!     [#{
//!         base: "Stage",
//!         class_name: "ShoutText",
//!         uuid: "9b1f7a2e-0c55-4c8e-b7a6-3f0e9d1c2b4a",
//!         human_label: "Shout Text",
//!         group: "Text",
//!         parameters: [#{ property_name: "Text", human_label: "Text", kind: "string" }],
//!         validate: Fn("check"),
//!         execute: Fn("run"),
//!     }]
//! }
//!
//! fn check(params) { if params.Text == "" { error(-1, "Text is empty"); } 0 }
//! fn run(params) { status(params.Text.to_upper()); 0 }
//! ```
//!
//! Stage functions receive the current parameter values as a map and may call
//! `error(code, text)`, `warning(code, text)`, `status(text)`,
//! `progress(percent, text)` and `is_cancelled()`. Returning a negative integer
//! fails the call.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use rhai::{CallFnOptions, Dynamic, Engine, FnPtr, Map, Scope, AST};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{normalize_parameters, ModuleMetadata};
use crate::cancellation::CancellationToken;
use crate::errors::PluginError;
use crate::stages::{
    Parameter, ParameterSet, Stage, StageContext, StageDescriptor, StageError, StageFactory, StageResult,
};

/// Base type every script stage class must name.
pub const SCRIPT_STAGE_BASE: &str = "Stage";

/// File extension of script modules.
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Error code for interpreter failures inside a stage call.
pub const SCRIPT_RUNTIME_CODE: i32 = -11200;

const MAX_OPERATIONS: u64 = 10_000_000;

fn sandboxed_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(32);
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_string_size(1 << 20);
    engine.set_max_array_size(100_000);
    engine.set_max_map_size(10_000);
    engine.on_print(|text| debug!(target: "stagehost::script", "{text}"));
    engine.on_debug(|text, source, pos| {
        debug!(target: "stagehost::script", source = source.unwrap_or(""), position = %pos, "{text}");
    });
    engine
}

#[derive(Debug)]
enum ScriptEvent {
    Error(i32, String),
    Warning(i32, String),
    Status(String),
    Progress(i32, String),
}

/// Connection between a running script and the stage context that called it.
#[derive(Debug, Default)]
struct ScriptHost {
    events: Option<Sender<ScriptEvent>>,
    cancel: Option<CancellationToken>,
}

impl ScriptHost {
    fn emit(&self, event: ScriptEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                debug!(target: "stagehost::script", "Script message dropped after the call ended");
            }
        }
    }
}

/// Detaches the host from its caller when the script call ends, even by panic.
struct Detach<'a>(&'a Mutex<ScriptHost>);

impl Drop for Detach<'_> {
    fn drop(&mut self) {
        let mut host = self.0.lock();
        host.events = None;
        host.cancel = None;
    }
}

fn clamp_code(code: i64) -> i32 {
    i32::try_from(code).unwrap_or(if code < 0 { i32::MIN } else { i32::MAX })
}

fn register_host(engine: &mut Engine, host: &Arc<Mutex<ScriptHost>>) {
    let h = host.clone();
    engine.register_fn("error", move |code: i64, text: &str| {
        h.lock().emit(ScriptEvent::Error(clamp_code(code), text.to_string()));
    });
    let h = host.clone();
    engine.register_fn("warning", move |code: i64, text: &str| {
        h.lock().emit(ScriptEvent::Warning(clamp_code(code), text.to_string()));
    });
    let h = host.clone();
    engine.register_fn("status", move |text: &str| {
        h.lock().emit(ScriptEvent::Status(text.to_string()));
    });
    let h = host.clone();
    engine.register_fn("progress", move |percent: i64, text: &str| {
        h.lock().emit(ScriptEvent::Progress(clamp_code(percent), text.to_string()));
    });
    let h = host.clone();
    engine.register_fn("is_cancelled", move || {
        h.lock().cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    });
}

/// A compiled script module and the factories it defines.
#[derive(Debug)]
pub struct ScriptModule {
    metadata: ModuleMetadata,
    factories: Vec<Arc<dyn StageFactory>>,
}

impl ScriptModule {
    /// Reads, compiles and evaluates a script file.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        let source = std::fs::read_to_string(path).map_err(|e| PluginError::Script {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let default_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_source(path, &default_name, &source)
    }

    /// Compiles and evaluates script text; `default_name` is used when the
    /// script has no `plugin()` function.
    pub fn from_source(location: &Path, default_name: &str, source: &str) -> Result<Self, PluginError> {
        let script_err = |message: String| PluginError::Script {
            path: location.to_path_buf(),
            message,
        };

        let mut engine = sandboxed_engine();
        register_host(&mut engine, &Arc::new(Mutex::new(ScriptHost::default())));

        let ast = engine.compile(source).map_err(|e| script_err(e.to_string()))?;
        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| script_err(e.to_string()))?;

        let metadata = if has_function(&ast, "plugin", 0) {
            let raw: Dynamic = engine
                .call_fn_with_options(CallFnOptions::new().eval_ast(false), &mut scope, &ast, "plugin", ())
                .map_err(|e| script_err(format!("plugin(): {e}")))?;
            let map = raw
                .try_cast::<Map>()
                .ok_or_else(|| script_err("plugin() must return a map".into()))?;
            ModuleMetadata {
                name: map_str(&map, "name").unwrap_or_else(|| default_name.to_string()),
                version: map_str(&map, "version").unwrap_or_default(),
                vendor: map_str(&map, "vendor").unwrap_or_default(),
                description: map_str(&map, "description").unwrap_or_default(),
            }
        } else {
            ModuleMetadata {
                name: default_name.to_string(),
                ..ModuleMetadata::default()
            }
        };

        if !has_function(&ast, "stages", 0) {
            return Err(script_err("script does not define fn stages()".into()));
        }
        let classes: Dynamic = engine
            .call_fn_with_options(CallFnOptions::new().eval_ast(false), &mut scope, &ast, "stages", ())
            .map_err(|e| script_err(format!("stages(): {e}")))?;
        let classes = classes
            .try_cast::<rhai::Array>()
            .ok_or_else(|| script_err("stages() must return an array".into()))?;

        let ast = Arc::new(ast);
        let mut factories: Vec<Arc<dyn StageFactory>> = Vec::with_capacity(classes.len());
        for (index, class) in classes.into_iter().enumerate() {
            let factory = ScriptStageFactory::from_class(location, &metadata, &ast, class)
                .map_err(|message| script_err(format!("stage class {index}: {message}")))?;
            factories.push(Arc::new(factory));
        }

        debug!(path = %location.display(), module = %metadata.name, stages = factories.len(), "Loaded script module");
        Ok(Self { metadata, factories })
    }

    /// Module name, version and vendor.
    #[must_use]
    pub const fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    /// Factories for every defined stage class.
    #[must_use]
    pub fn factories(&self) -> &[Arc<dyn StageFactory>] {
        &self.factories
    }
}

fn has_function(ast: &AST, name: &str, arity: usize) -> bool {
    ast.iter_functions().any(|f| f.name == name && f.params.len() == arity)
}

fn map_str(map: &Map, key: &str) -> Option<String> {
    map.get(key).and_then(|v| v.clone().into_string().ok())
}

fn map_fn_name(map: &Map, key: &str) -> Result<Option<String>, String> {
    match map.get(key) {
        None => Ok(None),
        Some(v) if v.is_unit() => Ok(None),
        Some(v) if v.is::<FnPtr>() => Ok(v.clone().try_cast::<FnPtr>().map(|f| f.fn_name().to_string())),
        Some(v) => v
            .clone()
            .into_string()
            .map(Some)
            .map_err(|_| format!("'{key}' must be a function pointer or name")),
    }
}

/// Factory adapter for one script stage class.
struct ScriptStageFactory {
    descriptor: StageDescriptor,
    parameters: Vec<Parameter>,
    ast: Arc<AST>,
    validate: Option<String>,
    execute: String,
    location: PathBuf,
}

impl ScriptStageFactory {
    fn from_class(
        location: &Path,
        module: &ModuleMetadata,
        ast: &Arc<AST>,
        class: Dynamic,
    ) -> Result<Self, String> {
        let map = class.try_cast::<Map>().ok_or("class must be a map")?;

        match map_str(&map, "base") {
            Some(base) if base == SCRIPT_STAGE_BASE => {}
            Some(base) => return Err(format!("base '{base}' is not '{SCRIPT_STAGE_BASE}'")),
            None => return Err(format!("missing base '{SCRIPT_STAGE_BASE}'")),
        }

        let class_name = map_str(&map, "class_name")
            .filter(|n| !n.is_empty())
            .ok_or("missing class_name")?;
        let uuid = map_str(&map, "uuid").ok_or_else(|| format!("{class_name}: missing uuid"))?;
        let uuid = Uuid::parse_str(&uuid).map_err(|e| format!("{class_name}: invalid uuid: {e}"))?;
        let human_label = map_str(&map, "human_label").unwrap_or_else(|| class_name.clone());

        let mut descriptor = StageDescriptor::new(class_name.clone(), uuid, human_label)
            .with_module(module.name.clone());
        if let Some(group) = map_str(&map, "group") {
            descriptor.group = group;
        }
        if let Some(subgroup) = map_str(&map, "subgroup") {
            descriptor.subgroup = subgroup;
        }
        descriptor.version = map_str(&map, "version").unwrap_or_else(|| {
            if module.version.is_empty() {
                descriptor.version.clone()
            } else {
                module.version.clone()
            }
        });

        let parameters = match map.get("parameters") {
            None => Vec::new(),
            Some(raw) => {
                let parsed: Vec<Parameter> = rhai::serde::from_dynamic(raw)
                    .map_err(|e| format!("{class_name}: parameters: {e}"))?;
                normalize_parameters(parsed).map_err(|e| format!("{class_name}: {e}"))?
            }
        };

        let validate = map_fn_name(&map, "validate").map_err(|e| format!("{class_name}: {e}"))?;
        let execute = map_fn_name(&map, "execute")
            .map_err(|e| format!("{class_name}: {e}"))?
            .ok_or_else(|| format!("{class_name}: missing execute"))?;
        for name in validate.iter().chain(std::iter::once(&execute)) {
            if !has_function(ast, name, 1) {
                return Err(format!("{class_name}: no function '{name}(params)'"));
            }
        }

        Ok(Self {
            descriptor,
            parameters,
            ast: ast.clone(),
            validate,
            execute,
            location: location.to_path_buf(),
        })
    }
}

impl std::fmt::Debug for ScriptStageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptStageFactory")
            .field("class_name", &self.descriptor.class_name)
            .field("location", &self.location)
            .finish()
    }
}

impl StageFactory for ScriptStageFactory {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn create(&self) -> Result<Box<dyn Stage>, StageError> {
        let host = Arc::new(Mutex::new(ScriptHost::default()));
        let mut engine = sandboxed_engine();
        register_host(&mut engine, &host);
        Ok(Box::new(ScriptStage {
            descriptor: self.descriptor.clone(),
            params: ParameterSet::new(self.parameters.clone()),
            engine,
            ast: self.ast.clone(),
            host,
            validate: self.validate.clone(),
            execute: self.execute.clone(),
        }))
    }
}

/// A script stage instance with its own interpreter.
struct ScriptStage {
    descriptor: StageDescriptor,
    params: ParameterSet,
    engine: Engine,
    ast: Arc<AST>,
    host: Arc<Mutex<ScriptHost>>,
    validate: Option<String>,
    execute: String,
}

impl ScriptStage {
    /// Runs `function` on a scoped worker thread while this thread forwards
    /// the script's messages to `ctx` as they are emitted.
    fn call(&self, function: &str, ctx: &mut StageContext<'_>) -> StageResult {
        let (sender, events) = unbounded();
        {
            let mut host = self.host.lock();
            host.events = Some(sender);
            host.cancel = Some(ctx.cancel_token().clone());
        }
        let params = self.params.to_json_map();

        let joined = std::thread::scope(|threads| {
            let worker = threads.spawn(|| {
                let _detach = Detach(&self.host);
                rhai::serde::to_dynamic(params).and_then(|params| {
                    let mut scope = Scope::new();
                    self.engine.call_fn_with_options::<Dynamic>(
                        CallFnOptions::new().eval_ast(false),
                        &mut scope,
                        &self.ast,
                        function,
                        (params,),
                    )
                })
            });
            for event in &events {
                match event {
                    ScriptEvent::Error(code, text) => ctx.error(code, text),
                    ScriptEvent::Warning(code, text) => ctx.warning(code, text),
                    ScriptEvent::Status(text) => ctx.status(text),
                    ScriptEvent::Progress(percent, text) => ctx.progress(percent, text),
                }
            }
            worker.join()
        });
        let result = joined.map_err(|_| {
            StageError::new(
                SCRIPT_RUNTIME_CODE,
                format!("{}::{function}: interpreter panicked", self.descriptor.class_name),
            )
        })?;

        let value = result.map_err(|e| {
            StageError::new(
                SCRIPT_RUNTIME_CODE,
                format!("{}::{function}: {e}", self.descriptor.class_name),
            )
        })?;
        if let Ok(code) = value.as_int() {
            if code < 0 && ctx.error_code() >= 0 {
                return Err(StageError::new(
                    clamp_code(code),
                    format!("{}::{function} returned {code}", self.descriptor.class_name),
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ScriptStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptStage")
            .field("class_name", &self.descriptor.class_name)
            .field("execute", &self.execute)
            .finish_non_exhaustive()
    }
}

impl Stage for ScriptStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    fn parameter_set(&self) -> &ParameterSet {
        &self.params
    }

    fn parameter_set_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn validate(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        match self.validate.clone() {
            Some(function) => self.call(&function, ctx),
            None => Ok(()),
        }
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> StageResult {
        let function = self.execute.clone();
        self.call(&function, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MessageBus, MessageCollector, StageOrigin};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SHOUT: &str = r#"
        fn plugin() {
            #{ name: "TextTools", version: "1.2.0", vendor: "Acme" }
        }

        fn stages() {
            [#{
                base: "Stage",
                class_name: "ShoutText",
                uuid: "9b1f7a2e-0c55-4c8e-b7a6-3f0e9d1c2b4a",
                human_label: "Shout Text",
                group: "Text",
                parameters: [
                    #{ property_name: "Text", human_label: "Text", kind: "string" },
                    #{ property_name: "Times", human_label: "Times", kind: "integer", "default": 1 },
                ],
                validate: Fn("check"),
                execute: "run",
            }]
        }

        fn check(params) {
            if params.Text == "" {
                error(-42, "Text is empty");
                return -42;
            }
            warning(-1, "shouting is rude");
            0
        }

        fn run(params) {
            for i in 0..params.Times {
                status(params.Text.to_upper());
            }
            progress(100, "done");
            0
        }
    "#;

    fn ctx<'a>(bus: &'a MessageBus, cancel: &'a CancellationToken) -> StageContext<'a> {
        StageContext::new(bus, cancel, StageOrigin::new("ShoutText", "Shout Text", 0))
    }

    #[test]
    fn test_script_module_metadata_and_descriptor() {
        let module = ScriptModule::from_source(Path::new("shout.rhai"), "shout", SHOUT).unwrap();
        assert_eq!(module.metadata().name, "TextTools");
        assert_eq!(module.metadata().vendor, "Acme");

        let descriptor = module.factories()[0].descriptor();
        assert_eq!(descriptor.class_name, "ShoutText");
        assert_eq!(descriptor.group, "Text");
        assert_eq!(descriptor.version, "1.2.0");
        assert_eq!(descriptor.module, "TextTools");
    }

    #[test]
    fn test_script_stage_validate_and_execute() {
        let module = ScriptModule::from_source(Path::new("shout.rhai"), "shout", SHOUT).unwrap();
        let mut stage = module.factories()[0].create().unwrap();
        assert_eq!(stage.parameter("Times"), Some(json!(1)));

        let bus = MessageBus::new();
        let collector = Arc::new(MessageCollector::new());
        bus.subscribe(collector.clone());
        let cancel = CancellationToken::new();

        let mut c = ctx(&bus, &cancel);
        assert!(stage.validate(&mut c).is_ok());
        assert_eq!(c.error_code(), -42);

        stage.set_parameter("Text", json!("hey")).unwrap();
        stage.set_parameter("Times", json!(2)).unwrap();
        let mut c = ctx(&bus, &cancel);
        stage.validate(&mut c).unwrap();
        assert_eq!(c.error_code(), 0);
        assert_eq!(c.warning_code(), -1);

        collector.clear();
        stage.execute(&mut c).unwrap();
        let texts: Vec<String> = collector.status_messages().iter().map(|m| m.text().to_string()).collect();
        assert_eq!(texts, vec!["HEY".to_string(), "HEY".to_string()]);
    }

    #[test]
    fn test_negative_return_without_message_fails() {
        let source = r#"
            fn stages() {
                [#{ base: "Stage", class_name: "Fails", uuid: "0f0e0d0c-0b0a-4908-8706-050403020100", execute: "run" }]
            }
            fn run(params) { -9 }
        "#;
        let module = ScriptModule::from_source(Path::new("fails.rhai"), "fails", source).unwrap();
        assert_eq!(module.metadata().name, "fails");
        let mut stage = module.factories()[0].create().unwrap();

        let bus = MessageBus::new();
        let cancel = CancellationToken::new();
        let err = stage.execute(&mut ctx(&bus, &cancel)).unwrap_err();
        assert_eq!(err.code, -9);
    }

    #[test]
    fn test_runtime_error_becomes_stage_error() {
        let source = r#"
            fn stages() {
                [#{ base: "Stage", class_name: "Broken", uuid: "0f0e0d0c-0b0a-4908-8706-050403020101", execute: "run" }]
            }
            fn run(params) { params.missing.length() }
        "#;
        let module = ScriptModule::from_source(Path::new("broken.rhai"), "broken", source).unwrap();
        let mut stage = module.factories()[0].create().unwrap();

        let bus = MessageBus::new();
        let cancel = CancellationToken::new();
        let err = stage.execute(&mut ctx(&bus, &cancel)).unwrap_err();
        assert_eq!(err.code, SCRIPT_RUNTIME_CODE);
    }

    #[test]
    fn test_cancellation_visible_to_script() {
        let source = r#"
            fn stages() {
                [#{ base: "Stage", class_name: "Watcher", uuid: "0f0e0d0c-0b0a-4908-8706-050403020102", execute: "run" }]
            }
            fn run(params) { if is_cancelled() { -1 } else { 0 } }
        "#;
        let module = ScriptModule::from_source(Path::new("watch.rhai"), "watch", source).unwrap();
        let mut stage = module.factories()[0].create().unwrap();

        let bus = MessageBus::new();
        let cancel = CancellationToken::new();
        assert!(stage.execute(&mut ctx(&bus, &cancel)).is_ok());
        cancel.cancel("stop");
        assert!(stage.execute(&mut ctx(&bus, &cancel)).is_err());
    }

    struct CancelOnStatus(CancellationToken);

    impl crate::messages::MessageHandler for CancelOnStatus {
        fn on_status(&self, _message: &crate::messages::Message) {
            self.0.cancel("status seen");
        }
    }

    #[test]
    fn test_messages_reach_the_bus_while_script_runs() {
        let source = r#"
            fn stages() {
                [#{ base: "Stage", class_name: "Waiter", uuid: "0f0e0d0c-0b0a-4908-8706-050403020104", execute: "run" }]
            }
            fn run(params) {
                status("waiting");
                let spins = 0;
                while !is_cancelled() { spins += 1; }
                0
            }
        "#;
        let module = ScriptModule::from_source(Path::new("wait.rhai"), "wait", source).unwrap();
        let mut stage = module.factories()[0].create().unwrap();

        let bus = MessageBus::new();
        let cancel = CancellationToken::new();
        let collector = Arc::new(MessageCollector::new());
        bus.subscribe(collector.clone());
        bus.subscribe(Arc::new(CancelOnStatus(cancel.clone())));

        let mut c = ctx(&bus, &cancel);
        assert!(stage.execute(&mut c).is_ok());
        assert_eq!(c.error_code(), 0);
        assert_eq!(collector.status_messages()[0].text(), "waiting");
    }

    #[test]
    fn test_non_conforming_classes_rejected() {
        let wrong_base = r#"
            fn stages() { [#{ base: "Widget", class_name: "X", uuid: "0f0e0d0c-0b0a-4908-8706-050403020103", execute: "run" }] }
            fn run(params) { 0 }
        "#;
        let err = ScriptModule::from_source(Path::new("a.rhai"), "a", wrong_base).unwrap_err();
        assert!(err.to_string().contains("Widget"));

        let missing_fn = r#"
            fn stages() { [#{ base: "Stage", class_name: "X", uuid: "0f0e0d0c-0b0a-4908-8706-050403020103", execute: "nope" }] }
        "#;
        assert!(ScriptModule::from_source(Path::new("b.rhai"), "b", missing_fn).is_err());

        let bad_uuid = r#"
            fn stages() { [#{ base: "Stage", class_name: "X", uuid: "zzz", execute: "run" }] }
            fn run(params) { 0 }
        "#;
        assert!(ScriptModule::from_source(Path::new("c.rhai"), "c", bad_uuid).is_err());

        assert!(ScriptModule::from_source(Path::new("d.rhai"), "d", "let x = ;").is_err());
        assert!(ScriptModule::from_source(Path::new("e.rhai"), "e", "fn other() { 1 }").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shout.rhai");
        std::fs::write(&path, SHOUT).unwrap();
        let module = ScriptModule::load(&path).unwrap();
        assert_eq!(module.factories().len(), 1);

        let missing = ScriptModule::load(&dir.path().join("missing.rhai")).unwrap_err();
        assert!(matches!(missing, PluginError::Script { .. }));
    }
}
