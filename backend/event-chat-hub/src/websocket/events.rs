//! Publish helpers used by the REST control plane after a successful write.
//!
//! Each helper encodes once and hands the bytes to [`Hub::broadcast`]; the
//! return value is the number of connections that accepted the frame.

use serde_json::Value;

use super::{ChannelId, EventKind, Hub, ServerFrame, TypingPayload, UserId};

impl Hub {
    /// Fan a newly created message out to every member of `channel`
    pub async fn publish_message(&self, channel: ChannelId, message: &Value) -> usize {
        let payload = ServerFrame::Message(message).encode();
        self.broadcast(channel, payload, None).await
    }

    /// Fan an update, deletion or reaction event out to every member of `channel`
    pub async fn publish_event(
        &self,
        channel: ChannelId,
        kind: EventKind,
        payload: Option<&Value>,
    ) -> usize {
        let frame = ServerFrame::Event { kind, payload }.encode();
        let delivered = self.broadcast(channel, frame, None).await;
        tracing::debug!(
            channel_id = channel,
            event = kind.as_str(),
            delivered,
            "published channel event"
        );
        delivered
    }

    /// Relay a typing indicator to everyone in `channel` except the sender
    pub async fn publish_typing(
        &self,
        channel: ChannelId,
        sender: UserId,
        user_name: &str,
        typing: bool,
    ) -> usize {
        let body = TypingPayload {
            user_id: sender,
            user_name: user_name.to_string(),
            typing,
        };
        let payload = match serde_json::to_value(&body) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode typing payload");
                return 0;
            }
        };

        let frame = ServerFrame::Event {
            kind: EventKind::Typing,
            payload: Some(&payload),
        }
        .encode();
        self.broadcast(channel, frame, Some(sender)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::websocket::Mailbox;
    use serde_json::json;

    fn next_json(mailbox: &mut Mailbox) -> Value {
        let bytes = mailbox.try_recv().expect("payload queued");
        serde_json::from_slice(&bytes).expect("payload is json")
    }

    #[tokio::test]
    async fn test_publish_message_wraps_in_message_envelope() {
        let hub = Hub::new(HubConfig::default());
        let (conn, mut rx) = hub.register(1).await;
        hub.join(&conn, 4).await;

        let msg = json!({"id": 9, "channel_id": 4, "content": "hi"});
        assert_eq!(hub.publish_message(4, &msg).await, 1);

        assert_eq!(
            next_json(&mut rx),
            json!({"type": "message", "message": {"id": 9, "channel_id": 4, "content": "hi"}})
        );
    }

    #[tokio::test]
    async fn test_publish_event_reaches_sender_too() {
        let hub = Hub::new(HubConfig::default());
        let (author, mut author_rx) = hub.register(1).await;
        let (reader, mut reader_rx) = hub.register(2).await;
        hub.join(&author, 4).await;
        hub.join(&reader, 4).await;

        let payload = json!({"message_id": 12, "channel_id": 4});
        let delivered = hub
            .publish_event(4, EventKind::MessageDeleted, Some(&payload))
            .await;
        assert_eq!(delivered, 2);

        let expected = json!({"type": "message_deleted", "payload": payload});
        assert_eq!(next_json(&mut author_rx), expected);
        assert_eq!(next_json(&mut reader_rx), expected);
    }

    #[tokio::test]
    async fn test_publish_typing_skips_sender() {
        let hub = Hub::new(HubConfig::default());
        let (sender, mut sender_rx) = hub.register(7).await;
        let (peer, mut peer_rx) = hub.register(8).await;
        hub.join(&sender, 2).await;
        hub.join(&peer, 2).await;

        assert_eq!(hub.publish_typing(2, 7, "Ren", true).await, 1);

        assert_eq!(
            next_json(&mut peer_rx),
            json!({
                "type": "typing",
                "payload": {"user_id": 7, "user_name": "Ren", "typing": true}
            })
        );
        assert!(sender_rx.try_recv().is_err());
    }
}
