// Event Source Port
// Asynchronous external event sources (signal buses, callbacks) hand
// events to an evaluator through a channel; matching happens on the
// evaluator's own cooperative queue, never in the source's context.

use tokio::sync::mpsc;

use super::evaluator::Value;

/// Default bound for event channels. Sources that outrun the consumer
/// park on `send` rather than growing without limit.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// An observed external event: a symbolic name plus positional
/// arguments, matched against declared output-action templates.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub args: Vec<Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

/// Create a bounded event channel; the sender half goes to sources,
/// the receiver half to the consuming evaluator.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}
