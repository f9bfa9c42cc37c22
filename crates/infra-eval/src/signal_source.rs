// Signal Source (unix)
// Bridges a Unix signal into named events on an evaluator's event
// channel. Delivery is a channel handoff: signal handlers never touch
// the evaluator or its namespace directly.

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use testrig_core::port::{Event, EventSender};

fn signal_kind(name: &str) -> Option<SignalKind> {
    match name {
        "SIGHUP" => Some(SignalKind::hangup()),
        "SIGINT" => Some(SignalKind::interrupt()),
        "SIGTERM" => Some(SignalKind::terminate()),
        "SIGUSR1" => Some(SignalKind::user_defined1()),
        "SIGUSR2" => Some(SignalKind::user_defined2()),
        "SIGCHLD" => Some(SignalKind::child()),
        "SIGWINCH" => Some(SignalKind::window_change()),
        _ => None,
    }
}

/// Start forwarding occurrences of `signal_name` as zero-argument
/// events named `event_name`. Runs until the consuming evaluator is
/// torn down.
///
/// # Errors
/// Returns a message for unknown signal names or registration failure.
pub fn spawn(
    signal_name: &str,
    event_name: String,
    sender: EventSender,
) -> Result<JoinHandle<()>, String> {
    let kind = signal_kind(signal_name)
        .ok_or_else(|| format!("unknown signal name: {signal_name}"))?;
    let mut stream =
        signal(kind).map_err(|e| format!("cannot register {signal_name}: {e}"))?;
    let signal_name = signal_name.to_string();

    Ok(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            debug!(signal = %signal_name, event = %event_name, "Signal observed");
            if sender
                .send(Event::new(event_name.clone(), Vec::new()))
                .await
                .is_err()
            {
                // Consumer torn down.
                return;
            }
        }
        warn!(signal = %signal_name, "Signal stream ended");
    }))
}
