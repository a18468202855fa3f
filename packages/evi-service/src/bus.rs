//! In-process event bus with one broadcast channel per topic.
//!
//! Delivery is at most once: a receiver that falls behind loses the oldest events and a publish
//! with no live receiver is dropped. Consumers must therefore be idempotent.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::broadcast::{self, Receiver, Sender, error::RecvError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 1_024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Topic {
	KnowledgeIngested,
	RecordChanged,
}
impl Topic {
	pub fn as_str(self) -> &'static str {
		match self {
			Topic::KnowledgeIngested => "knowledge.ingested",
			Topic::RecordChanged => "record.changed",
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct KnowledgeIngested {
	pub record_id: Uuid,
	pub tenant_id: String,
	pub chunk_count: u32,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
	Created,
	Updated,
	Deleted,
}
impl ChangeOp {
	pub fn as_str(self) -> &'static str {
		match self {
			ChangeOp::Created => "created",
			ChangeOp::Updated => "updated",
			ChangeOp::Deleted => "deleted",
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RecordChanged {
	pub tenant_id: String,
	pub entity_kind: String,
	pub entity_id: String,
	pub op: ChangeOp,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub snapshot: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub actor: Option<String>,
}

#[derive(Clone)]
pub struct EventBus {
	ingested: Sender<Value>,
	record_changed: Sender<Value>,
}
impl EventBus {
	pub fn new() -> Self {
		let (ingested, _) = broadcast::channel(CHANNEL_CAPACITY);
		let (record_changed, _) = broadcast::channel(CHANNEL_CAPACITY);

		Self { ingested, record_changed }
	}

	pub fn subscribe(&self, topic: Topic) -> Receiver<Value> {
		self.sender(topic).subscribe()
	}

	/// Publishes a raw payload. Returns the number of receivers that saw it.
	pub fn publish(&self, topic: Topic, payload: Value) -> usize {
		match self.sender(topic).send(payload) {
			Ok(receivers) => receivers,
			Err(_) => {
				tracing::debug!(topic = topic.as_str(), "No subscribers for event; dropped.");

				0
			},
		}
	}

	pub fn publish_json<T>(&self, topic: Topic, payload: &T) -> usize
	where
		T: Serialize,
	{
		match serde_json::to_value(payload) {
			Ok(value) => self.publish(topic, value),
			Err(err) => {
				tracing::warn!(topic = topic.as_str(), error = %err, "Failed to encode event.");

				0
			},
		}
	}

	fn sender(&self, topic: Topic) -> &Sender<Value> {
		match topic {
			Topic::KnowledgeIngested => &self.ingested,
			Topic::RecordChanged => &self.record_changed,
		}
	}
}
impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}

/// Waits for the next well-formed payload on `rx`.
///
/// Malformed payloads are logged and skipped and lag is logged. Returns `None` once the token is
/// cancelled or the channel closes.
pub async fn next_payload<T>(
	rx: &mut Receiver<Value>,
	topic: Topic,
	cancel: &CancellationToken,
) -> Option<T>
where
	T: DeserializeOwned,
{
	loop {
		let received = tokio::select! {
			_ = cancel.cancelled() => return None,
			received = rx.recv() => received,
		};

		match received {
			Ok(value) => match serde_json::from_value::<T>(value) {
				Ok(payload) => return Some(payload),
				Err(err) => {
					tracing::warn!(
						topic = topic.as_str(),
						error = %err,
						"Skipping malformed event payload."
					);
				},
			},
			Err(RecvError::Lagged(skipped)) => {
				tracing::warn!(topic = topic.as_str(), skipped, "Event receiver lagged.");
			},
			Err(RecvError::Closed) => return None,
		}
	}
}
