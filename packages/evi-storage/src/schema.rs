pub fn render_schema() -> String {
	let init = include_str!("../../../sql/init.sql");

	expand_includes(init)
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_knowledge_records.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_knowledge_records.sql")),
				"tables/002_knowledge_chunks.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_knowledge_chunks.sql")),
				"tables/003_chunk_vectors.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_chunk_vectors.sql")),
				"tables/004_evidence_records.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_evidence_records.sql")),
				"tables/005_audit_events.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_audit_events.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
