// Remote Bridge
// An adapter that owns a child process and presents remote execution
// over the wire protocol as local execute/observe calls.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use testrig_core::application::{observation_queue, ObservationQueue, ObservationSender};
use testrig_core::application::observation::OBSERVATION_QUEUE_CAPACITY;
use testrig_core::application::{AdapterFactory, AdapterRegistry};
use testrig_core::domain::{ActionCatalog, ActionIndex, UNIDENTIFIED};
use testrig_core::port::{Adapter, AdapterError};

use crate::channel::{ChannelReader, ChannelWriter};
use crate::protocol::{Encoding, ProtocolError, RemoteProtocolEngine};

/// Grace window between SIGTERM and SIGKILL at teardown.
const GRACEFUL_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Fault raised by the output pump, surfaced on the next call.
type SharedFault = Arc<Mutex<Option<String>>>;

/// A local adapter that owns one child process and a protocol engine.
///
/// The child's stdin carries requests, stderr carries responses, and
/// stdout carries asynchronous output-action indices. The stdout pump
/// runs as an independent task so output capture never blocks the
/// write/response cycle; the per-bridge observation queue is the only
/// structure shared between the two, as a single-producer FIFO.
pub struct RemoteBridge {
    catalog: ActionCatalog,
    engine: RemoteProtocolEngine,
    child: Child,
    command: ChannelWriter,
    response: ChannelReader,
    queue: ObservationQueue,
    pump: JoinHandle<()>,
    fault: SharedFault,
    stopped: bool,
}

impl RemoteBridge {
    /// Spawn the child (`sh -c <command_line>`), wire up its streams
    /// and perform the handshake.
    ///
    /// # Errors
    /// - `AdapterError::SpawnFailed` if the process cannot be started
    /// - `AdapterError::ChildExited` if it dies during the handshake
    pub async fn spawn(
        command_line: &str,
        encoding: Encoding,
        catalog: ActionCatalog,
    ) -> Result<Self, AdapterError> {
        info!(command = %command_line, actions = catalog.len(), "Spawning remote adapter");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AdapterError::SpawnFailed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AdapterError::SpawnFailed("no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::SpawnFailed("no stdout handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AdapterError::SpawnFailed("no stderr handle".into()))?;

        let mut command = ChannelWriter::new(stdin);
        let response = ChannelReader::new(stderr);
        let output = ChannelReader::new(stdout);

        let engine = RemoteProtocolEngine::new(encoding);
        engine.send_handshake(&mut command, catalog.names()).await?;

        let (sender, queue) = observation_queue(OBSERVATION_QUEUE_CAPACITY);
        let fault: SharedFault = Arc::new(Mutex::new(None));
        let pump = tokio::spawn(pump_outputs(engine, output, sender, fault.clone()));

        Ok(Self {
            catalog,
            engine,
            child,
            command,
            response,
            queue,
            pump,
            fault,
            stopped: false,
        })
    }

    fn take_fault(&self) -> Option<String> {
        self.fault.lock().ok().and_then(|mut f| f.take())
    }

    #[cfg(unix)]
    fn send_sigterm(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM failed (child already gone?)");
            }
        }
    }
}

/// Continuously read output-action indices from the child's stdout into
/// the observation queue. Ends when the stream closes or the consumer
/// is dropped; a malformed line records a fault for the control thread.
async fn pump_outputs(
    engine: RemoteProtocolEngine,
    mut output: ChannelReader,
    mut sender: ObservationSender,
    fault: SharedFault,
) {
    loop {
        match engine.read_output(&mut output).await {
            Ok(index) => {
                debug!(index, "Remote output action observed");
                if !sender.push(index).await {
                    // Consumer dropped: bridge is being torn down.
                    return;
                }
            }
            Err(ProtocolError::Channel(crate::channel::ChannelError::Closed)) => {
                // Clean EOF; whether this is fatal depends on whether a
                // teardown is in progress - the bridge decides.
                return;
            }
            Err(e) => {
                warn!(error = %e, "Output stream fault");
                if let Ok(mut f) = fault.lock() {
                    *f = Some(e.to_string());
                }
                return;
            }
        }
    }
}

#[async_trait]
impl Adapter for RemoteBridge {
    fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    async fn execute(&mut self, suggested: ActionIndex) -> Result<ActionIndex, AdapterError> {
        if self.stopped {
            return Err(AdapterError::Channel("bridge is stopped".into()));
        }
        if let Some(msg) = self.take_fault() {
            return Err(AdapterError::Protocol(msg));
        }
        if !self.catalog.contains(suggested) {
            return Ok(UNIDENTIFIED);
        }

        // Blocking request/response round trip; no timeout by contract
        // (a hung SUT hangs the test).
        self.engine
            .send_request(&mut self.command, suggested)
            .await?;
        let executed = self.engine.read_response(&mut self.response).await?;
        if executed != UNIDENTIFIED && !self.catalog.contains(executed) {
            return Err(AdapterError::Protocol(format!(
                "executed index {executed} is outside the {}-action catalog",
                self.catalog.len()
            )));
        }

        debug!(suggested, executed, "Remote execution completed");
        Ok(executed)
    }

    async fn observe(&mut self, block: bool) -> Result<Option<ActionIndex>, AdapterError> {
        match self.queue.pop(block).await {
            // An output report must name an action at this level; the
            // same catalog check execute applies to responses.
            Some(entry) if !self.catalog.contains(entry.index) => {
                Err(AdapterError::Protocol(format!(
                    "output index {} is outside the {}-action catalog",
                    entry.index,
                    self.catalog.len()
                )))
            }
            Some(entry) => Ok(Some(entry.index)),
            None => {
                if let Some(msg) = self.take_fault() {
                    return Err(AdapterError::Protocol(msg));
                }
                if block && !self.stopped {
                    // Blocking pop only returns empty when the pump has
                    // ended; outside teardown that means the child died.
                    return Err(AdapterError::ChildExited(
                        "output stream closed mid-test".into(),
                    ));
                }
                Ok(None)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), AdapterError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        info!("Stopping remote bridge");

        // Closing stdin is the polite shutdown request.
        if let Err(e) = self.command.shutdown().await {
            debug!(error = %e, "stdin close failed");
        }

        #[cfg(unix)]
        self.send_sigterm();

        match tokio::time::timeout(GRACEFUL_KILL_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Child reaped"),
            Ok(Err(e)) => warn!(error = %e, "Child wait failed"),
            Err(_) => {
                warn!("Child ignored SIGTERM; killing");
                self.child
                    .kill()
                    .await
                    .map_err(|e| AdapterError::ChildExited(e.to_string()))?;
            }
        }

        self.pump.abort();
        Ok(())
    }
}

/// Factory for `remote(<command line>)` specs.
pub struct RemoteFactory {
    encoding: Encoding,
}

impl RemoteFactory {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }
}

#[async_trait]
impl AdapterFactory for RemoteFactory {
    async fn create(
        &self,
        _registry: &AdapterRegistry,
        param: &str,
        catalog: ActionCatalog,
    ) -> Result<Box<dyn Adapter>, AdapterError> {
        if param.trim().is_empty() {
            return Err(AdapterError::Config("remote() needs a command line".into()));
        }
        let bridge = RemoteBridge::spawn(param, self.encoding, catalog).await?;
        Ok(Box::new(bridge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shell echo adapter: consumes the handshake, then answers every
    /// request index `i` with executed index `i + 1` on stderr.
    const ECHO_ADAPTER: &str = r#"
read n
i=0
while [ "$i" -lt "$n" ]; do read name; i=$((i+1)); done
while read idx; do echo $((idx+1)) >&2; done
"#;

    /// Like ECHO_ADAPTER, but emits output-action index 2 on stdout
    /// right after the handshake.
    const OUTPUT_ADAPTER: &str = r#"
read n
i=0
while [ "$i" -lt "$n" ]; do read name; i=$((i+1)); done
echo 2
while read idx; do echo $((idx+1)) >&2; done
"#;

    fn catalog() -> ActionCatalog {
        ActionCatalog::from_names(vec!["iInstantiate", "iBar=0"]).unwrap()
    }

    #[tokio::test]
    async fn execute_round_trip_with_real_child() {
        let mut bridge = RemoteBridge::spawn(ECHO_ADAPTER, Encoding::Url, catalog())
            .await
            .unwrap();

        // Wire request 0 -> response 1 (iInstantiate executed itself),
        // wire request 1 -> response 2 (iBar=0).
        assert_eq!(bridge.execute(1).await.unwrap(), 1);
        assert_eq!(bridge.execute(2).await.unwrap(), 2);

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn out_of_catalog_suggestion_is_unidentified_without_io() {
        let mut bridge = RemoteBridge::spawn(ECHO_ADAPTER, Encoding::Url, catalog())
            .await
            .unwrap();

        assert_eq!(bridge.execute(99).await.unwrap(), UNIDENTIFIED);
        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn asynchronous_output_reaches_observe() {
        let mut bridge = RemoteBridge::spawn(OUTPUT_ADAPTER, Encoding::Url, catalog())
            .await
            .unwrap();

        // The pump picks the stdout line up independently of execute.
        assert_eq!(bridge.observe(true).await.unwrap(), Some(2));
        // Request loop still works after the output.
        assert_eq!(bridge.execute(1).await.unwrap(), 1);

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn out_of_catalog_output_is_a_fatal_protocol_error() {
        // Child reports output index 9 against a two-action model.
        let script = r#"
read n
i=0
while [ "$i" -lt "$n" ]; do read name; i=$((i+1)); done
echo 9
while read idx; do echo $((idx+1)) >&2; done
"#;
        let mut bridge = RemoteBridge::spawn(script, Encoding::Url, catalog())
            .await
            .unwrap();

        let err = bridge.observe(true).await.unwrap_err();
        assert!(matches!(err, AdapterError::Protocol(_)));
        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn child_exit_mid_test_is_fatal_on_next_call() {
        let mut bridge = RemoteBridge::spawn("read n; exit 3", Encoding::Url, catalog())
            .await
            .unwrap();

        // Give the child a moment to exit.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = bridge.execute(1).await.unwrap_err();
        assert!(matches!(
            err,
            AdapterError::ChildExited(_) | AdapterError::Channel(_)
        ));
    }

    #[tokio::test]
    async fn observe_nonblocking_is_empty_when_quiet() {
        let mut bridge = RemoteBridge::spawn(ECHO_ADAPTER, Encoding::Url, catalog())
            .await
            .unwrap();

        assert_eq!(bridge.observe(false).await.unwrap(), None);
        bridge.stop().await.unwrap();
    }
}
