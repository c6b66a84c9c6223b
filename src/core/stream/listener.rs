//! Per-channel listener registry.
//!
//! Each channel has at most one subscriber; the newest registration wins.
//! Unsubscribing requires the token handed out at subscribe time, so a late
//! unsubscribe from a replaced consumer cannot evict its successor.

use std::collections::HashMap;

use serde::Serialize;

use crate::core::bluetooth::types::{ChannelTag, DecodedSample};
use crate::core::stream::analysis::Analysis;

/// What a channel subscriber receives
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ChannelEvent {
    Sample(DecodedSample),
    Analysis(Analysis),
}

/// Consumer of one channel's events. Called synchronously on the driver task.
pub trait ChannelListener: Send {
    fn on_event(&mut self, channel: ChannelTag, event: &ChannelEvent);
}

impl<F> ChannelListener for F
where
    F: FnMut(ChannelTag, &ChannelEvent) + Send,
{
    fn on_event(&mut self, channel: ChannelTag, event: &ChannelEvent) {
        self(channel, event)
    }
}

/// Opaque proof of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken {
    channel: ChannelTag,
    id: u64,
}

impl ListenerToken {
    pub fn channel(&self) -> ChannelTag {
        self.channel
    }
}

struct Slot {
    id: u64,
    listener: Box<dyn ChannelListener>,
}

#[derive(Default)]
pub struct ListenerRegistry {
    slots: HashMap<ChannelTag, Slot>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `channel`, replacing any current subscriber.
    pub fn subscribe<L>(&mut self, channel: ChannelTag, listener: L) -> ListenerToken
    where
        L: ChannelListener + 'static,
    {
        self.next_id += 1;
        let id = self.next_id;
        self.slots.insert(
            channel,
            Slot {
                id,
                listener: Box::new(listener),
            },
        );
        ListenerToken { channel, id }
    }

    /// Removes the subscriber only if `token` still identifies it.
    pub fn unsubscribe(&mut self, token: ListenerToken) -> bool {
        match self.slots.get(&token.channel) {
            Some(slot) if slot.id == token.id => {
                self.slots.remove(&token.channel);
                true
            }
            _ => false,
        }
    }

    pub fn is_subscribed(&self, channel: ChannelTag) -> bool {
        self.slots.contains_key(&channel)
    }

    /// Delivers to the current subscriber. Events for an empty slot are dropped.
    pub fn publish(&mut self, channel: ChannelTag, event: &ChannelEvent) -> bool {
        match self.slots.get_mut(&channel) {
            Some(slot) => {
                slot.listener.on_event(channel, event);
                true
            }
            None => false,
        }
    }
}
