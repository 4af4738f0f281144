#[must_use]
pub fn sanitize_for_filename(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '-',
            _ => c,
        })
        .collect()
}

/// File name used when exporting `session_key` at `exported_at` (RFC3339).
#[must_use]
pub fn export_file_name(exported_at: &str, session_key: &str) -> String {
    format!(
        "{}_{}.jsonl",
        sanitize_for_filename(exported_at),
        sanitize_for_filename(session_key)
    )
}

#[cfg(test)]
mod tests {
    use super::export_file_name;

    #[test]
    fn export_file_name_replaces_path_hostile_characters() {
        assert_eq!(
            export_file_name("2026-02-14T00:00:00Z", "webchat:main"),
            "2026-02-14T00-00-00Z_webchat-main.jsonl"
        );
    }
}
