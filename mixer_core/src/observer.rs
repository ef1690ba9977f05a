//! Observer hooks so front ends can follow the controller without the core
//! knowing about them.

use crossbeam_channel as xch;

use crate::state::OperatingState;

/// Name of the indicator updated on every state change.
pub const STATE_INDICATOR: &str = "State";

/// Callbacks from the control core. All methods default to no-ops.
///
/// Calls arrive on whichever thread drove the change (the loop thread or the
/// caller of `request_state`), after the controller lock is released, so an
/// observer may call back into `ControlSystem`. Implementations must not block.
pub trait Observer: Send + Sync {
    fn on_state_change(&self, _from: OperatingState, _to: OperatingState) {}
    fn on_log(&self, _message: &str) {}
    fn on_indicator(&self, _name: &str, _value: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StateChanged {
        from: OperatingState,
        to: OperatingState,
    },
    Log(String),
    Indicator {
        name: String,
        value: String,
    },
}

impl Event {
    /// Replay this event as the matching callback.
    pub fn deliver(&self, observer: &dyn Observer) {
        match self {
            Self::StateChanged { from, to } => observer.on_state_change(*from, *to),
            Self::Log(message) => observer.on_log(message),
            Self::Indicator { name, value } => observer.on_indicator(name, value),
        }
    }
}

/// Forwards every callback as an `Event`. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: xch::Sender<Event>,
}

impl ChannelObserver {
    pub fn new(tx: xch::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Observer plus the receiving end of an unbounded channel.
    pub fn unbounded() -> (Self, xch::Receiver<Event>) {
        let (tx, rx) = xch::unbounded();
        (Self::new(tx), rx)
    }
}

impl Observer for ChannelObserver {
    fn on_state_change(&self, from: OperatingState, to: OperatingState) {
        let _ = self.tx.send(Event::StateChanged { from, to });
    }

    fn on_log(&self, message: &str) {
        let _ = self.tx.send(Event::Log(message.to_string()));
    }

    fn on_indicator(&self, name: &str, value: &str) {
        let _ = self.tx.send(Event::Indicator {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
}
