//! In-memory test fakes for the crate's own test suite.
//!
//! Repurposed from the upstream docker wrapper's `testing.rs`, which shipped
//! RAII container guards for integration tests against a real daemon; this
//! core has no daemon-facing test surface of its own; what it needs instead
//! is a scriptable [`CommandRunner`] and in-memory [`Store`]/
//! [`ConnectionTracker`] fakes so §8's literal scenarios can be expressed as
//! ordinary unit tests.

#![allow(clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::{CommandError, Result};
use crate::executor::{CommandOutput, CommandRunner, LineSink};
use crate::store::{ConnectionTracker, InstanceEntry, StateEntry, Store, StoreFilter};

/// A [`CommandRunner`] that replays a fixed script of responses, in order,
/// regardless of which binary was invoked — the tests that use it assert on
/// call count and high-level behavior, not on exact argv.
#[derive(Debug)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<std::result::Result<String, (i32, String)>>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedRunner {
    /// Creates a runner that will return each `Ok(output)` in turn.
    #[must_use] 
    pub fn new(script: Vec<std::result::Result<String, String>>) -> Self {
        Self::with_exit_codes(script.into_iter().map(|r| r.map_err(|e| (1, e))).collect())
    }

    /// Like [`ScriptedRunner::new`], but errors carry an explicit exit code.
    #[must_use] 
    pub fn with_exit_codes(script: Vec<std::result::Result<String, (i32, String)>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the `(program, args)` pairs recorded so far, in call order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the number of calls recorded so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        name: &str,
        args: &[String],
        _stdin: Option<&[u8]>,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.to_vec()));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(combined)) => Ok(CommandOutput {
                combined,
                exit_code: 0,
            }),
            Some(Err((exit_code, output))) => Err(CommandError::NonZeroExit {
                program: name.to_string(),
                exit_code,
                output,
            }
            .into()),
            None => Ok(CommandOutput::default()),
        }
    }

    async fn run_streaming(
        &self,
        name: &str,
        args: &[String],
        stdin: Option<&[u8]>,
        cancel: &CancellationToken,
        mut sink: LineSink,
    ) -> Result<CommandOutput> {
        let out = self.run(name, args, stdin, cancel).await?;
        for line in out.combined.lines() {
            sink(line);
        }
        Ok(out)
    }
}

/// An in-memory [`Store`] fake.
#[derive(Debug, Default)]
pub struct MemoryStore {
    instances: Mutex<Vec<InstanceEntry>>,
    states: Mutex<Vec<StateEntry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use] 
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an instance record.
    pub fn add_instance(&self, entry: InstanceEntry) {
        self.instances.lock().unwrap().push(entry);
    }

    /// Adds a state record.
    pub fn add_state(&self, entry: StateEntry) {
        self.states.lock().unwrap().push(entry);
    }
}

impl Store for MemoryStore {
    fn get_instance(&self, id: &str) -> Option<InstanceEntry> {
        self.instances
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.instance_id == id)
            .cloned()
    }

    fn get_state(&self, id: &str) -> Option<StateEntry> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.state_id == id)
            .cloned()
    }

    fn list_instances(&self, filter: StoreFilter) -> Vec<InstanceEntry> {
        self.instances
            .lock()
            .unwrap()
            .iter()
            .filter(|i| filter.state_id.as_deref().is_none_or(|sid| i.state_id == sid))
            .cloned()
            .collect()
    }

    fn list_states(&self, filter: StoreFilter) -> Vec<StateEntry> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                filter
                    .parent_id
                    .as_deref()
                    .is_none_or(|pid| s.parent_state_id.as_deref() == Some(pid))
            })
            .cloned()
            .collect()
    }

    fn delete_instance(&self, id: &str) {
        self.instances.lock().unwrap().retain(|i| i.instance_id != id);
    }

    fn delete_state(&self, id: &str) {
        self.states.lock().unwrap().retain(|s| s.state_id != id);
    }
}

/// An in-memory [`ConnectionTracker`] fake.
#[derive(Debug, Default)]
pub struct MemoryConnectionTracker {
    counts: Mutex<std::collections::HashMap<String, u64>>,
}

impl MemoryConnectionTracker {
    /// Creates a tracker with no connection counts set.
    #[must_use] 
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reported connection count for `instance_id`.
    pub fn set(&self, instance_id: impl Into<String>, count: u64) {
        self.counts.lock().unwrap().insert(instance_id.into(), count);
    }
}

impl ConnectionTracker for MemoryConnectionTracker {
    fn active_connections(&self, instance_id: &str) -> u64 {
        self.counts.lock().unwrap().get(instance_id).copied().unwrap_or(0)
    }
}
