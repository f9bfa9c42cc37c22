// Adapter Port
// Uniform execute/observe contract implemented by remote bridges,
// mappers and leaf adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ActionCatalog, ActionIndex};

/// Adapter errors.
///
/// All variants are fatal for the adapter that raises them: channel
/// and process faults are never swallowed or retried, they propagate
/// to the caller as-is. An
/// unidentified execution is NOT an error - it is `Ok(UNIDENTIFIED)`.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Child process exited: {0}")]
    ChildExited(String),

    #[error("Channel fault: {0}")]
    Channel(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Uniform adapter contract (the "local adapter" interface).
///
/// One generator-side control thread drives `execute`/`observe`
/// sequentially; two actions are never executed concurrently against
/// the same adapter instance (hence `&mut self`).
///
/// Implementations:
/// - RemoteBridge: owns a child process speaking the wire protocol
/// - MapperAdapter: routes actions among child adapters
/// - ScriptingEvaluator: evaluates action expressions against the SUT
#[async_trait]
pub trait Adapter: Send {
    /// The catalog of the level this adapter serves.
    fn catalog(&self) -> &ActionCatalog;

    /// Attempt to perform the action at `suggested`.
    ///
    /// Returns the index of whatever action was actually determined to
    /// have occurred - which may differ from the suggestion - or
    /// `UNIDENTIFIED` (0) if no known action matches. Suspends on the
    /// SUT round trip with no timeout by contract; a hung SUT call is
    /// the caller's problem.
    ///
    /// # Errors
    /// - `AdapterError` only for fatal channel/process faults
    async fn execute(&mut self, suggested: ActionIndex) -> Result<ActionIndex, AdapterError>;

    /// Drain one queued output action.
    ///
    /// With `block = true`, suspends until at least one output action
    /// is available or the adapter is torn down. With `block = false`,
    /// returns immediately with a queued index or `None`. Never invents
    /// an index that was not actually observed.
    async fn observe(&mut self, block: bool) -> Result<Option<ActionIndex>, AdapterError>;

    /// Tear the adapter down: close channels, reap child processes.
    /// Blocked reads then fail and propagate as fatal adapter errors.
    async fn stop(&mut self) -> Result<(), AdapterError>;
}

impl std::fmt::Debug for dyn Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Adapter")
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::UNIDENTIFIED;
    use std::collections::{HashSet, VecDeque};

    /// Mock adapter for mapper and composition-root tests.
    ///
    /// Default behavior is to echo the suggested index back as executed.
    /// Individual actions can be scripted to fail (report unidentified)
    /// or the whole adapter to raise a fatal fault.
    pub struct MockAdapter {
        catalog: ActionCatalog,
        failing: HashSet<String>,
        fatal: bool,
        outputs: VecDeque<ActionIndex>,
        executed: Vec<ActionIndex>,
        stopped: bool,
    }

    impl MockAdapter {
        pub fn new(catalog: ActionCatalog) -> Self {
            Self {
                catalog,
                failing: HashSet::new(),
                fatal: false,
                outputs: VecDeque::new(),
                executed: Vec::new(),
                stopped: false,
            }
        }

        /// Script the named action to report unidentified.
        pub fn fail_on(mut self, name: impl Into<String>) -> Self {
            self.failing.insert(name.into());
            self
        }

        /// Script every call to raise a fatal fault.
        pub fn fatal(mut self) -> Self {
            self.fatal = true;
            self
        }

        /// Queue an output action index for `observe` to return.
        pub fn push_output(&mut self, index: ActionIndex) {
            self.outputs.push_back(index);
        }

        /// Indices this adapter was asked to execute, in order.
        pub fn executed_log(&self) -> &[ActionIndex] {
            &self.executed
        }

        pub fn is_stopped(&self) -> bool {
            self.stopped
        }
    }

    #[async_trait]
    impl Adapter for MockAdapter {
        fn catalog(&self) -> &ActionCatalog {
            &self.catalog
        }

        async fn execute(
            &mut self,
            suggested: ActionIndex,
        ) -> Result<ActionIndex, AdapterError> {
            if self.fatal {
                return Err(AdapterError::ChildExited("mock fatal".into()));
            }
            self.executed.push(suggested);
            match self.catalog.name_of(suggested) {
                Some(name) if self.failing.contains(name) => Ok(UNIDENTIFIED),
                Some(_) => Ok(suggested),
                None => Ok(UNIDENTIFIED),
            }
        }

        async fn observe(
            &mut self,
            _block: bool,
        ) -> Result<Option<ActionIndex>, AdapterError> {
            // Mock never parks, even when asked to block; tests queue
            // outputs up front.
            Ok(self.outputs.pop_front())
        }

        async fn stop(&mut self) -> Result<(), AdapterError> {
            self.stopped = true;
            Ok(())
        }
    }
}
