//! Whitespace token windows for embedding.

#[derive(Clone, Debug)]
pub struct ChunkingConfig {
	pub window_tokens: u32,
	pub overlap_tokens: u32,
}
impl Default for ChunkingConfig {
	fn default() -> Self {
		Self { window_tokens: 512, overlap_tokens: 50 }
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
	pub chunk_index: i32,
	/// Byte offset of the first token in the source text.
	pub start_offset: usize,
	/// Byte offset one past the last token in the source text.
	pub end_offset: usize,
	pub token_count: usize,
	pub text: String,
}
impl Chunk {
	pub fn tokens(&self) -> impl Iterator<Item = &str> {
		self.text.split_whitespace()
	}
}

/// Splits `text` into overlapping windows of whitespace tokens.
///
/// Windows advance by `window - overlap` tokens. The final window is truncated to the tokens that
/// remain and iteration stops once a window reaches the end of the stream. An overlap at or above
/// the window size is clamped to `window - 1`.
pub fn split_tokens(text: &str, cfg: &ChunkingConfig) -> Vec<Chunk> {
	let tokens = token_spans(text);

	if tokens.is_empty() {
		return Vec::new();
	}

	let window = cfg.window_tokens.max(1) as usize;
	let overlap = (cfg.overlap_tokens as usize).min(window - 1);
	let stride = window - overlap;
	let mut chunks = Vec::new();
	let mut start = 0_usize;

	loop {
		let end = (start + window).min(tokens.len());
		let start_offset = tokens[start].0;
		let end_offset = tokens[end - 1].1;

		chunks.push(Chunk {
			chunk_index: chunks.len() as i32,
			start_offset,
			end_offset,
			token_count: end - start,
			text: text[start_offset..end_offset].to_string(),
		});

		if end == tokens.len() {
			break;
		}

		start += stride;
	}

	chunks
}

pub fn count_tokens(text: &str) -> usize {
	text.split_whitespace().count()
}

fn token_spans(text: &str) -> Vec<(usize, usize)> {
	let mut spans = Vec::new();
	let mut current: Option<usize> = None;

	for (idx, ch) in text.char_indices() {
		match (ch.is_whitespace(), current) {
			(true, Some(start)) => {
				spans.push((start, idx));

				current = None;
			},
			(false, None) => current = Some(idx),
			_ => {},
		}
	}

	if let Some(start) = current {
		spans.push((start, text.len()));
	}

	spans
}
