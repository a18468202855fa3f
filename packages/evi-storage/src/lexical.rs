//! In-memory BM25 projection over live chunk text.
//!
//! Statistics (document count, average length, document frequency) are kept per tenant so a
//! tenant's ranking never depends on another tenant's corpus.

use std::{
	collections::{HashMap, HashSet},
	sync::RwLock,
};

use uuid::Uuid;

const K1: f32 = 1.2;
const B: f32 = 0.75;

#[derive(Clone, Debug, PartialEq)]
pub struct LexicalHit {
	pub chunk_id: Uuid,
	pub record_id: Uuid,
	pub score: f32,
}

#[derive(Default)]
pub struct LexicalIndex {
	inner: RwLock<Inner>,
}
impl LexicalIndex {
	pub fn new() -> Self {
		Self::default()
	}

	/// Indexes a chunk, replacing any previous entry with the same id.
	pub fn add(&self, chunk_id: Uuid, record_id: Uuid, tenant_id: &str, text: &str) {
		let mut inner = self.inner.write().unwrap_or_else(|err| err.into_inner());

		inner.remove(chunk_id);
		inner.add(chunk_id, record_id, tenant_id, text);
	}

	pub fn remove(&self, chunk_ids: &[Uuid]) {
		let mut inner = self.inner.write().unwrap_or_else(|err| err.into_inner());

		for chunk_id in chunk_ids {
			inner.remove(*chunk_id);
		}
	}

	pub fn clear(&self) {
		let mut inner = self.inner.write().unwrap_or_else(|err| err.into_inner());

		*inner = Inner::default();
	}

	pub fn len(&self) -> usize {
		self.inner.read().unwrap_or_else(|err| err.into_inner()).docs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Scores every chunk of `tenant_id` that shares a term with `query`, best first.
	pub fn search(&self, tenant_id: &str, query: &str) -> Vec<LexicalHit> {
		let inner = self.inner.read().unwrap_or_else(|err| err.into_inner());
		let Some(stats) = inner.tenants.get(tenant_id) else {
			return Vec::new();
		};

		if stats.docs == 0 {
			return Vec::new();
		}

		let terms: HashSet<String> = tokenize(query).collect();
		let n = stats.docs as f32;
		let avg_len = (stats.total_len as f32 / n).max(1.0);
		let mut scores: HashMap<Uuid, f32> = HashMap::new();

		for term in &terms {
			let Some(postings) = stats.postings.get(term) else {
				continue;
			};
			let df = postings.len() as f32;
			let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

			for chunk_id in postings {
				let Some(doc) = inner.docs.get(chunk_id) else {
					continue;
				};
				let tf = doc.terms.get(term).copied().unwrap_or(0) as f32;
				let norm = K1 * (1.0 - B + B * doc.len as f32 / avg_len);

				*scores.entry(*chunk_id).or_insert(0.0) += idf * tf * (K1 + 1.0) / (tf + norm);
			}
		}

		let mut hits: Vec<LexicalHit> = scores
			.into_iter()
			.filter_map(|(chunk_id, score)| {
				inner.docs.get(&chunk_id).map(|doc| LexicalHit {
					chunk_id,
					record_id: doc.record_id,
					score,
				})
			})
			.collect();

		hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));

		hits
	}
}

struct LexicalDoc {
	record_id: Uuid,
	tenant_id: String,
	len: u32,
	terms: HashMap<String, u32>,
}

#[derive(Default)]
struct TenantStats {
	docs: usize,
	total_len: u64,
	postings: HashMap<String, HashSet<Uuid>>,
}

#[derive(Default)]
struct Inner {
	docs: HashMap<Uuid, LexicalDoc>,
	tenants: HashMap<String, TenantStats>,
}
impl Inner {
	fn add(&mut self, chunk_id: Uuid, record_id: Uuid, tenant_id: &str, text: &str) {
		let mut terms: HashMap<String, u32> = HashMap::new();
		let mut len = 0_u32;

		for term in tokenize(text) {
			*terms.entry(term).or_insert(0) += 1;
			len += 1;
		}

		let stats = self.tenants.entry(tenant_id.to_string()).or_default();

		stats.docs += 1;
		stats.total_len += u64::from(len);

		for term in terms.keys() {
			stats.postings.entry(term.clone()).or_default().insert(chunk_id);
		}

		self.docs.insert(
			chunk_id,
			LexicalDoc { record_id, tenant_id: tenant_id.to_string(), len, terms },
		);
	}

	fn remove(&mut self, chunk_id: Uuid) {
		let Some(doc) = self.docs.remove(&chunk_id) else {
			return;
		};
		let Some(stats) = self.tenants.get_mut(&doc.tenant_id) else {
			return;
		};

		stats.docs = stats.docs.saturating_sub(1);
		stats.total_len = stats.total_len.saturating_sub(u64::from(doc.len));

		for term in doc.terms.keys() {
			if let Some(postings) = stats.postings.get_mut(term) {
				postings.remove(&chunk_id);

				if postings.is_empty() {
					stats.postings.remove(term);
				}
			}
		}

		if stats.docs == 0 {
			self.tenants.remove(&doc.tenant_id);
		}
	}
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
	text.split(|ch: char| !ch.is_alphanumeric())
		.filter(|term| !term.is_empty())
		.map(|term| term.to_lowercase())
}
