//! Serving side of the wire protocol.
//!
//! The daemon is itself a remote adapter from its parent's point of
//! view: handshake and requests arrive on stdin, executed indices go
//! to stderr, asynchronous output-action indices go to stdout.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use testrig_core::application::AdapterRegistry;
use testrig_core::domain::{ActionCatalog, ActionIndex};
use testrig_core::port::Adapter;
use testrig_infra_remote::channel::{ChannelError, ChannelReader, ChannelWriter};
use testrig_infra_remote::protocol::{Encoding, ProtocolError, RemoteProtocolEngine};

/// How often queued output actions are flushed to stdout while the
/// request channel is idle.
const OUTPUT_FLUSH_INTERVAL: Duration = Duration::from_millis(20);

/// Read the handshake, build the adapter tree from `spec`, then run
/// the request loop until the parent closes stdin.
pub async fn serve(registry: &AdapterRegistry, spec: &str, encoding: Encoding) -> Result<()> {
    let engine = RemoteProtocolEngine::new(encoding);
    let mut requests = ChannelReader::new(tokio::io::stdin());
    let mut responses = ChannelWriter::new(tokio::io::stderr());
    let mut outputs = ChannelWriter::new(tokio::io::stdout());

    let names = engine
        .read_handshake(&mut requests)
        .await
        .context("handshake failed")?;
    let catalog = ActionCatalog::from_names(names).context("bad action list")?;
    info!(actions = catalog.len(), spec = %spec, "Handshake complete; building adapter tree");

    let mut adapter = registry
        .create(spec, catalog)
        .await
        .context("adapter construction failed")?;

    // Requests are read on their own task; line reads are not safe to
    // cancel mid-line, channel receives are.
    let (req_tx, req_rx) = mpsc::channel::<Result<ActionIndex, ProtocolError>>(1);
    let reader = tokio::spawn(async move {
        loop {
            let request = engine.read_request(&mut requests).await;
            let is_err = request.is_err();
            if req_tx.send(request).await.is_err() || is_err {
                return;
            }
        }
    });

    let result = request_loop(&engine, adapter.as_mut(), req_rx, &mut responses, &mut outputs).await;

    reader.abort();
    if let Err(e) = adapter.stop().await {
        warn!(error = %e, "Adapter teardown failed");
    }
    result
}

async fn request_loop(
    engine: &RemoteProtocolEngine,
    adapter: &mut dyn Adapter,
    mut requests: mpsc::Receiver<Result<ActionIndex, ProtocolError>>,
    responses: &mut ChannelWriter,
    outputs: &mut ChannelWriter,
) -> Result<()> {
    loop {
        tokio::select! {
            request = requests.recv() => {
                let suggested = match request {
                    None | Some(Err(ProtocolError::Channel(ChannelError::Closed))) => {
                        info!("Parent closed the command channel; shutting down");
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e).context("request decode failed"),
                    Some(Ok(index)) => index,
                };

                let executed = adapter.execute(suggested).await?;
                debug!(suggested, executed, "Request served");
                engine.send_response(responses, executed).await?;
            }
            _ = tokio::time::sleep(OUTPUT_FLUSH_INTERVAL) => {
                while let Some(index) = adapter.observe(false).await? {
                    debug!(index, "Forwarding output action");
                    engine.send_output(outputs, index).await?;
                }
            }
        }
    }
}
