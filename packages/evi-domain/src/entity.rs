//! Text renderers for upstream business entities linked to knowledge records.

use std::collections::HashMap;

use serde_json::Value;

pub type EntityRenderer = fn(&Value) -> Option<RenderedEntity>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedEntity {
	pub title: String,
	pub body: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RenderError {
	#[error("No renderer registered for entity kind {entity_kind}.")]
	UnknownKind { entity_kind: String },
	#[error("Entity state for {entity_kind} is missing required fields.")]
	InvalidState { entity_kind: String },
}

/// Renderers keyed by entity kind. Linking a new entity type means registering one function.
#[derive(Clone)]
pub struct RendererRegistry {
	renderers: HashMap<String, EntityRenderer>,
}
impl RendererRegistry {
	pub fn empty() -> Self {
		Self { renderers: HashMap::new() }
	}

	pub fn with_defaults() -> Self {
		let mut registry = Self::empty();

		registry.register("account", render_account);
		registry.register("contact", render_contact);
		registry.register("deal", render_deal);
		registry.register("case", render_case);

		registry
	}

	pub fn register(&mut self, entity_kind: &str, renderer: EntityRenderer) {
		self.renderers.insert(entity_kind.to_string(), renderer);
	}

	pub fn supports(&self, entity_kind: &str) -> bool {
		self.renderers.contains_key(entity_kind)
	}

	pub fn render(&self, entity_kind: &str, state: &Value) -> Result<RenderedEntity, RenderError> {
		let renderer = self
			.renderers
			.get(entity_kind)
			.ok_or_else(|| RenderError::UnknownKind { entity_kind: entity_kind.to_string() })?;

		renderer(state)
			.ok_or_else(|| RenderError::InvalidState { entity_kind: entity_kind.to_string() })
	}
}
impl Default for RendererRegistry {
	fn default() -> Self {
		Self::with_defaults()
	}
}

fn render_account(state: &Value) -> Option<RenderedEntity> {
	let name = field(state, "name")?;

	Some(RenderedEntity {
		title: format!("Account: {name}"),
		body: render_lines(
			state,
			&[
				("Account", "name"),
				("Industry", "industry"),
				("Tier", "tier"),
				("Description", "description"),
			],
		),
	})
}

fn render_contact(state: &Value) -> Option<RenderedEntity> {
	let name = field(state, "name").or_else(|| {
		let first = field(state, "first_name")?;

		Some(match field(state, "last_name") {
			Some(last) => format!("{first} {last}"),
			None => first,
		})
	})?;
	let mut body = format!("Contact: {name}");
	let rest = render_lines(
		state,
		&[("Title", "title"), ("Email", "email"), ("Phone", "phone"), ("Notes", "notes")],
	);

	if !rest.is_empty() {
		body.push('\n');
		body.push_str(&rest);
	}

	Some(RenderedEntity { title: format!("Contact: {name}"), body })
}

fn render_deal(state: &Value) -> Option<RenderedEntity> {
	let name = field(state, "name")?;

	Some(RenderedEntity {
		title: format!("Deal: {name}"),
		body: render_lines(
			state,
			&[
				("Deal", "name"),
				("Stage", "stage"),
				("Amount", "amount"),
				("Close date", "close_date"),
				("Description", "description"),
			],
		),
	})
}

fn render_case(state: &Value) -> Option<RenderedEntity> {
	let subject = field(state, "subject")?;

	Some(RenderedEntity {
		title: format!("Case: {subject}"),
		body: render_lines(
			state,
			&[
				("Case", "subject"),
				("Status", "status"),
				("Priority", "priority"),
				("Description", "description"),
			],
		),
	})
}

fn render_lines(state: &Value, fields: &[(&str, &str)]) -> String {
	fields
		.iter()
		.filter_map(|(label, key)| field(state, key).map(|value| format!("{label}: {value}")))
		.collect::<Vec<_>>()
		.join("\n")
}

fn field(state: &Value, key: &str) -> Option<String> {
	match state.get(key)? {
		Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
		Value::Number(number) => Some(number.to_string()),
		Value::Bool(flag) => Some(flag.to_string()),
		_ => None,
	}
}
