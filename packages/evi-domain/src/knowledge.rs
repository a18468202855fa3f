use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
	Document,
	Email,
	Call,
	Ticket,
	Note,
	Entity,
}
impl SourceKind {
	pub fn as_str(self) -> &'static str {
		match self {
			SourceKind::Document => "document",
			SourceKind::Email => "email",
			SourceKind::Call => "call",
			SourceKind::Ticket => "ticket",
			SourceKind::Note => "note",
			SourceKind::Entity => "entity",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"document" => Some(SourceKind::Document),
			"email" => Some(SourceKind::Email),
			"call" => Some(SourceKind::Call),
			"ticket" => Some(SourceKind::Ticket),
			"note" => Some(SourceKind::Note),
			"entity" => Some(SourceKind::Entity),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
	Pending,
	Embedded,
	Failed,
}
impl EmbeddingStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			EmbeddingStatus::Pending => "pending",
			EmbeddingStatus::Embedded => "embedded",
			EmbeddingStatus::Failed => "failed",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"pending" => Some(EmbeddingStatus::Pending),
			"embedded" => Some(EmbeddingStatus::Embedded),
			"failed" => Some(EmbeddingStatus::Failed),
			_ => None,
		}
	}
}

/// Reference from a knowledge record to an upstream business entity.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct EntityLink {
	pub entity_kind: String,
	pub entity_id: String,
}
impl EntityLink {
	pub fn new(entity_kind: impl Into<String>, entity_id: impl Into<String>) -> Self {
		Self { entity_kind: entity_kind.into(), entity_id: entity_id.into() }
	}

	pub fn entity_ref(&self) -> String {
		format!("{}:{}", self.entity_kind, self.entity_id)
	}
}
