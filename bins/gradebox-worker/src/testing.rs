// In-memory sandbox for runner, executor and session tests

use crate::engine::{CompiledFunction, Invocation, Sandbox};
use gradebox_common::types::CompileError;
use gradebox_common::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays scripted invocations in order and records what it was asked
pub struct ScriptedSandbox {
    compile_error: Option<CompileError>,
    invocations: Mutex<VecDeque<Invocation>>,
    compiled_sources: Mutex<Vec<String>>,
    invoked_args: Mutex<Vec<Vec<Value>>>,
}

impl ScriptedSandbox {
    pub fn new(invocations: Vec<Invocation>) -> Self {
        Self {
            compile_error: None,
            invocations: Mutex::new(invocations.into()),
            compiled_sources: Mutex::new(Vec::new()),
            invoked_args: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_compile(error: CompileError) -> Self {
        Self {
            compile_error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn returned(value: Value) -> Invocation {
        Invocation::Returned {
            value,
            console: Vec::new(),
            elapsed: Duration::from_millis(1),
        }
    }

    pub fn compiled_sources(&self) -> Vec<String> {
        self.compiled_sources.lock().unwrap().clone()
    }

    pub fn invoked_args(&self) -> Vec<Vec<Value>> {
        self.invoked_args.lock().unwrap().clone()
    }
}

impl Sandbox for ScriptedSandbox {
    async fn compile(&self, source: &str, function_name: &str)
        -> Result<CompiledFunction, CompileError> {
        self.compiled_sources.lock().unwrap().push(source.to_string());
        if let Some(error) = &self.compile_error {
            return Err(error.clone());
        }
        Ok(CompiledFunction {
            source: Arc::from(source),
            function_name: function_name.to_string(),
        })
    }

    async fn invoke(&self, _function: &CompiledFunction, args: &[Value], _budget: Duration)
        -> Invocation {
        self.invoked_args.lock().unwrap().push(args.to_vec());
        self.invocations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted invocation left for {:?}", args))
    }
}
