use unicode_normalization::UnicodeNormalization;

const ENTITIES: [(&str, &str); 6] = [
	("&nbsp;", " "),
	("&lt;", "<"),
	("&gt;", ">"),
	("&quot;", "\""),
	("&#39;", "'"),
	("&amp;", "&"),
];

/// Produces the searchable form of raw content: markup stripped, NFKC folded, whitespace
/// collapsed and trimmed.
pub fn normalize_content(raw: &str) -> String {
	let stripped = strip_markup(raw);
	let mut decoded = stripped;

	for (entity, replacement) in ENTITIES {
		if decoded.contains(entity) {
			decoded = decoded.replace(entity, replacement);
		}
	}

	let folded: String = decoded.nfkc().collect();

	folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_markup(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());
	let mut in_tag = false;

	for ch in raw.chars() {
		match ch {
			'<' if !in_tag => in_tag = true,
			'>' if in_tag => {
				in_tag = false;

				// Tags separate words, e.g. `<p>a</p><p>b</p>`.
				out.push(' ');
			},
			_ if in_tag => {},
			_ => out.push(ch),
		}
	}

	out
}
