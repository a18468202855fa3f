use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{BoxFuture, PolicyProvider, Result};
use evi_domain::pii::PiiRedactor;

pub const ADMIN_ROLE: &str = "admin";

/// The caller an evidence pack is assembled for.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Principal {
	pub tenant_id: String,
	pub user_id: String,
	#[serde(default)]
	pub roles: Vec<String>,
}
impl Principal {
	pub fn has_role(&self, role: &str) -> bool {
		self.roles.iter().any(|candidate| candidate == role)
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnerScope {
	Any,
	Only(String),
}

/// Predicate over (tenant, owner). Records without an owner are visible to every principal of
/// their tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionFilter {
	pub tenant_id: String,
	pub owners: OwnerScope,
}
impl PermissionFilter {
	pub fn allows(&self, tenant_id: &str, owner_id: Option<&str>) -> bool {
		if tenant_id != self.tenant_id {
			return false;
		}

		match (&self.owners, owner_id) {
			(OwnerScope::Any, _) | (_, None) => true,
			(OwnerScope::Only(allowed), Some(owner)) => allowed == owner,
		}
	}
}

#[derive(Clone, Debug)]
pub struct RedactionItem {
	pub key: Uuid,
	pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedactedItem {
	pub key: Uuid,
	pub text: String,
	pub redacted: bool,
}

pub struct DefaultPolicy {
	redactor: PiiRedactor,
}
impl DefaultPolicy {
	pub fn new(redactor: PiiRedactor) -> Self {
		Self { redactor }
	}
}
impl PolicyProvider for DefaultPolicy {
	fn permission_filter<'a>(
		&'a self,
		principal: &'a Principal,
	) -> BoxFuture<'a, Result<PermissionFilter>> {
		let owners = if principal.has_role(ADMIN_ROLE) {
			OwnerScope::Any
		} else {
			OwnerScope::Only(principal.user_id.clone())
		};
		let filter = PermissionFilter { tenant_id: principal.tenant_id.clone(), owners };

		Box::pin(async move { Ok(filter) })
	}

	fn redact_pii<'a>(
		&'a self,
		items: Vec<RedactionItem>,
	) -> BoxFuture<'a, Result<Vec<RedactedItem>>> {
		Box::pin(async move {
			let mut session = self.redactor.session();
			let redacted = items
				.into_iter()
				.map(|item| {
					let out = session.redact(&item.text);
					let touched = out.touched();

					RedactedItem { key: item.key, text: out.text, redacted: touched }
				})
				.collect();

			Ok(redacted)
		})
	}
}
