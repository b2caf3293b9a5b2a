//! Heuristics for locating markdown tables in a model response and for
//! stitching the final report out of header, body, summary and appendix.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches a GitHub-flavored-markdown separator row such as `| --- | :-: |`.
static SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\|( *:?-+:? *\|)+ *$").expect("valid separator regex"));

/// Finds every markdown table in the text: a `| ... |` header line directly
/// followed by a separator row, then any number of `| ... |` body rows.
pub fn find_tables(text: &str) -> Vec<String> {
    let sep = &*SEPARATOR_RE;
    let lines: Vec<&str> = text.lines().collect();
    let mut tables = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let header = lines[i].trim();
        if header.starts_with('|') && i + 1 < lines.len() && sep.is_match(lines[i + 1].trim()) {
            let mut j = i + 2;
            while j < lines.len() && lines[j].trim_start().starts_with('|') {
                j += 1;
            }
            tables.push(lines[i..j].join("\n"));
            i = j;
        } else {
            i += 1;
        }
    }
    tables
}

/// Picks the table with the highest count of candidate-name occurrences
/// (case-insensitive). Ties and zero matches fall back to the first table.
pub fn best_table<'a>(tables: &'a [String], names: &[String]) -> Option<&'a String> {
    let mut best: Option<(&'a String, usize)> = None;
    for table in tables {
        let haystack = table.to_lowercase();
        let count: usize = names
            .iter()
            .map(|n| {
                let needle = n.trim().to_lowercase();
                if needle.is_empty() {
                    0
                } else {
                    haystack.matches(&needle).count()
                }
            })
            .sum();
        match best {
            None => best = Some((table, count)),
            Some((_, c)) if count > c => best = Some((table, count)),
            _ => {}
        }
    }
    best.map(|(t, _)| t)
}

/// Injects the summary-score section directly after the chosen table. When
/// the table can no longer be located the summary is appended at the end.
pub fn inject_summary(text: &str, table: &str, summary: &str) -> String {
    if let Some(idx) = text.find(table) {
        let after = idx + table.len();
        format!(
            "{}\n\n{}\n\n{}",
            &text[..after],
            summary.trim(),
            &text[after..]
        )
    } else {
        format!("{}\n\n{}", text, summary.trim())
    }
}

/// Wraps the report body in the generated header and the methodology
/// appendix embedding the exact prompt that produced it.
pub fn stitch_report(thing_name: &str, context: &str, body: &str, prompt: &str) -> String {
    let context = if context.trim().is_empty() {
        "Not provided"
    } else {
        context
    };
    let header = format!(
        "# Architectural Assessment Report for: {}\n\n**Code context:** {}\n\n",
        thing_name, context
    );
    let appendix = format!(
        "\n\n---\n\n### Appendix: Assessment Methodology\n\n\
         This report was generated by an AI architectural assessment engine \
         using the following prompt configuration:\n\n```text\n{}\n```",
        prompt.trim()
    );
    format!("{header}{body}{appendix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "Intro text.\n\n\
        | Feature | Alpha | Beta |\n\
        | --- | :-: | :-: |\n\
        | Cleaning | ✅ | ❌ |\n\n\
        Some analysis.\n\n\
        | Tier | Members |\n\
        | --- | --- |\n\
        | Industrial | Alpha |\n";

    #[test]
    fn finds_both_tables() {
        let tables = find_tables(REPORT);
        assert_eq!(tables.len(), 2);
        assert!(tables[0].starts_with("| Feature |"));
        assert!(tables[1].starts_with("| Tier |"));
    }

    #[test]
    fn ignores_pipe_lines_without_separator() {
        let tables = find_tables("| not a table |\njust text\n");
        assert!(tables.is_empty());
    }

    #[test]
    fn best_table_prefers_most_candidate_mentions() {
        let tables = find_tables(REPORT);
        let names = vec!["Alpha".to_string(), "Beta".to_string()];
        let best = best_table(&tables, &names).unwrap();
        assert!(best.starts_with("| Feature |"));
    }

    #[test]
    fn best_table_falls_back_to_first_on_no_mentions() {
        let tables = find_tables(REPORT);
        let names = vec!["Gamma".to_string()];
        let best = best_table(&tables, &names).unwrap();
        assert!(best.starts_with("| Feature |"));
    }

    #[test]
    fn summary_lands_after_the_table() {
        let tables = find_tables(REPORT);
        let out = inject_summary(REPORT, &tables[0], "### Summary Scores\n| Alpha | Beta |");
        let table_end = out.find("| Cleaning | ✅ | ❌ |").unwrap();
        let summary_at = out.find("### Summary Scores").unwrap();
        let analysis_at = out.find("Some analysis.").unwrap();
        assert!(table_end < summary_at && summary_at < analysis_at);
    }

    #[test]
    fn stitch_adds_header_and_appendix() {
        let out = stitch_report("slider", "", "body", "the prompt");
        assert!(out.starts_with("# Architectural Assessment Report for: slider\n"));
        assert!(out.contains("**Code context:** Not provided"));
        assert!(out.contains("### Appendix: Assessment Methodology"));
        assert!(out.ends_with("```text\nthe prompt\n```"));
    }
}
