//! Construction of the assessment prompt and the follow-up summary-score
//! prompt sent to the selected model.

/// Builds the comparative assessment prompt from the subject metadata and the
/// labeled snippets. `snippets` pairs each candidate display name with the
/// snippet content.
pub fn build_assessment_prompt(
    thing_name: &str,
    context: &str,
    language: &str,
    snippets: &[(String, String)],
) -> String {
    let mut code_blocks = String::new();
    for (name, content) in snippets {
        code_blocks.push_str(&format!(
            "\n{}:\n```{}\n{}\n```\n",
            name, language, content
        ));
    }

    let context = if context.trim().is_empty() {
        "Not provided"
    } else {
        context
    };

    format!(
        r#"Conduct a rigorous, professional assessment of these {thing_name} implementations. Provide a high-density report that distinguishes between "code that works" and "code that scales."
1. Assessment Pillars

Evaluate all provided snippets against these universal dimensions:

    Architectural Integrity: Examine the interface design. Is the API "open" (extensible/interoperable) or "closed" (hardcoded/rigid)? Does it respect the standards of its environment (e.g., prop spreading in React, memory safety in C++, PEP8 in Python)?

    Data Flow & Logic: Does the code "clean" its inputs? Is there a single source of truth, or is state/data duplicated? Check for defensive programming (error handling, null checks, floating-point safety).

    Maintenance & DX (Developer Experience):
        Boilerplate: How much code does a developer have to write to use this component?
        The 80/20 Rule: Does it provide shortcuts for the most common use cases (e.g., a unit prop) while still allowing full control for complex ones?
        Discovery: Is the component self-documenting (JSDoc, clear prop names)?

    Foundational Baseline vs. Over-engineering: Distinguish between "Standard Practice" (necessary for health) and "Premature Optimization" (unnecessary complexity).

2. Report Configuration

    The 'Comparison Matrix,' 'Technical Analysis,' and 'Implementation Tiers' format.

    For the Comparison Matrix:
        A table comparing implementations side-by-side across key technical features and standards.
        Rows should include technical features (Prop Spreading, Data Cleaning) and "Soft" features (DX, A11y) + other metrics/assessments, like for example: API Surface, Data Flow, Scalability, Integrity.
        Include visual indicators (✅/❌) or score (1-5) for quick scanning in fields where possible.

    No Hyperbole: Eliminate fluff words like "ultimate," "perfect," or "professional." Use objective, technical language.

    Technical Analysis: Grouped by impact (Infrastructure, Logic, maintainability). Focus on the consequence of each design choice.

    Tiered Ranking: Categorize implementations (e.g., Industrial Grade, Foundationally Sound, Feature-Specific, or Localized Prototype).

3. Input Data

Context: {context}.

Implementations:
{code_blocks}"#
    )
}

/// Builds the second-stage prompt that turns an isolated comparison matrix
/// into a summary-score section with a trailing machine-readable JSON map.
pub fn build_scoring_prompt(table_markdown: &str) -> String {
    format!(
        r#"Based on the following comparison matrix table, calculate a summary score for each implementation (column).

Identify all metrics (rows) that imply a positive/negative value (e.g., ✅/❌/⚠️ (1/0/-1), High(2)/Medium(1)/Low(0), or numerical scores).
Determine the total maximum points possible and the actual points achieved by each implementation.

Present the result as a table with only the header (names) and score row in a '### Summary Scores' section.
Include a brief explanation of the scoring logic used.

After the section, append a JSON object inside a ```json code fence mapping each implementation name to its score as an "achieved/total" string.

Return ONLY the markdown for this 'Summary Scores' section followed by the JSON block.

Table:
{table_markdown}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_snippets_and_context() {
        let snippets = vec![
            ("Alpha".to_string(), "fn a() {}".to_string()),
            ("Beta".to_string(), "fn b() {}".to_string()),
        ];
        let prompt = build_assessment_prompt("slider component", "embedded UI", "rust", &snippets);
        assert!(prompt.contains("slider component"));
        assert!(prompt.contains("Context: embedded UI."));
        assert!(prompt.contains("\nAlpha:\n```rust\nfn a() {}\n```"));
        assert!(prompt.contains("\nBeta:\n```rust\nfn b() {}\n```"));
    }

    #[test]
    fn missing_context_marked_as_not_provided() {
        let prompt = build_assessment_prompt("thing", "  ", "javascript", &[]);
        assert!(prompt.contains("Context: Not provided."));
    }

    #[test]
    fn scoring_prompt_embeds_table() {
        let table = "| A | B |\n| --- | --- |\n| 1 | 2 |";
        let prompt = build_scoring_prompt(table);
        assert!(prompt.contains(table));
        assert!(prompt.contains("### Summary Scores"));
        assert!(prompt.contains("achieved/total"));
    }
}
