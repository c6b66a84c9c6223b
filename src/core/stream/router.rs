//! Frame routing
//! Tags incoming notification payloads with the channel they belong to.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::debug;
use uuid::Uuid;

use crate::core::bluetooth::types::{ChannelTag, RawFrame};

/// Routes payloads by characteristic identity or by text prefix.
#[derive(Debug, Clone, Default)]
pub struct FrameRouter {
    /// Single-purpose characteristics; their payloads are never prefix-stripped
    dedicated: HashMap<Uuid, ChannelTag>,
}

impl FrameRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes every payload of `characteristic` to `channel` without prefix parsing.
    pub fn with_dedicated(mut self, characteristic: Uuid, channel: ChannelTag) -> Self {
        self.dedicated.insert(characteristic, channel);
        self
    }

    /// Splits a shared-characteristic payload into its channel and record body.
    ///
    /// Returns `None` for payloads that are not UTF-8 or carry no known prefix;
    /// control frames on the shared characteristic are expected and dropped.
    pub fn route_payload(payload: &[u8]) -> Option<(ChannelTag, &[u8])> {
        let text = std::str::from_utf8(payload).ok()?;
        ChannelTag::PREFIXED.iter().find_map(|channel| {
            let prefix = channel.prefix()?;
            text.starts_with(prefix)
                .then(|| (*channel, &payload[prefix.len()..]))
        })
    }

    /// Produces the routed frame for a notification, or `None` to drop it.
    pub fn route(
        &self,
        characteristic: Uuid,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Option<RawFrame> {
        if let Some(channel) = self.dedicated.get(&characteristic) {
            return Some(RawFrame {
                channel: *channel,
                bytes: payload.to_vec(),
                received_at,
            });
        }

        match Self::route_payload(payload) {
            Some((channel, body)) => Some(RawFrame {
                channel,
                bytes: body.to_vec(),
                received_at,
            }),
            None => {
                debug!("Dropping unrouted frame ({} bytes)", payload.len());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_prefixes() {
        let (channel, body) = FrameRouter::route_payload(b"EMG,12,-4,7").unwrap();
        assert_eq!(channel, ChannelTag::Emg);
        assert_eq!(body, b"12,-4,7");

        let (channel, body) = FrameRouter::route_payload(b"SWEAT,0.33").unwrap();
        assert_eq!(channel, ChannelTag::Sweat);
        assert_eq!(body, b"0.33");

        let (channel, body) = FrameRouter::route_payload(b"TEST,").unwrap();
        assert_eq!(channel, ChannelTag::Test);
        assert!(body.is_empty());
    }

    #[test]
    fn unrecognized_prefix_is_dropped() {
        let router = FrameRouter::new();
        assert!(router.route(Uuid::nil(), b"BATT,98", Utc::now()).is_none());
        assert!(router.route(Uuid::nil(), b"emg,1", Utc::now()).is_none());
        assert!(router.route(Uuid::nil(), b"EMG", Utc::now()).is_none());
        assert!(router.route(Uuid::nil(), &[0xff, 0xfe, 0x00], Utc::now()).is_none());
    }

    #[test]
    fn dedicated_characteristic_skips_prefix_parsing() {
        let adc = Uuid::from_u128(7);
        let router = FrameRouter::new().with_dedicated(adc, ChannelTag::RawAdc);
        let frame = router.route(adc, &[0x00, 0x80], Utc::now()).unwrap();
        assert_eq!(frame.channel, ChannelTag::RawAdc);
        assert_eq!(frame.bytes, vec![0x00, 0x80]);

        // text that looks prefixed is still routed by identity
        let frame = router.route(adc, b"EMG,1", Utc::now()).unwrap();
        assert_eq!(frame.channel, ChannelTag::RawAdc);
        assert_eq!(frame.bytes, b"EMG,1".to_vec());
    }
}
