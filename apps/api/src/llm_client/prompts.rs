// Cross-cutting prompt pieces. Each feature keeps its own prompts.rs next to it.

/// Appended to every candidate-facing system prompt.
pub const EVIDENCE_INSTRUCTION: &str = "\
    CRITICAL: Base every assessment only on the material provided. \
    Do NOT infer protected characteristics, and do NOT invent experience, \
    skills, or employers that are not present in the source text. \
    If the material does not support a field, leave it empty.";

/// Substitutes `{name}` placeholders in one left-to-right pass.
///
/// Inserted values are never scanned again, so resume text or notes that
/// happen to contain `{notes}` come through verbatim. Braces that do not
/// name a known placeholder (the JSON schema in a template) are kept.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let matched = values.iter().find(|(key, _)| {
            after
                .strip_prefix(key)
                .is_some_and(|tail| tail.starts_with('}'))
        });
        match matched {
            Some((key, value)) => {
                out.push_str(value);
                rest = &after[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_template_replaces_known_placeholders() {
        let out = fill_template("Hi {name}, see {job}.", &[("name", "Ada"), ("job", "SRE")]);
        assert_eq!(out, "Hi Ada, see SRE.");
    }

    #[test]
    fn test_fill_template_does_not_rescan_inserted_text() {
        let out = fill_template(
            "A: {first}\nB: {second}",
            &[("first", "literal {second} here"), ("second", "two")],
        );
        assert_eq!(out, "A: literal {second} here\nB: two");
    }

    #[test]
    fn test_fill_template_keeps_unrelated_braces() {
        let out = fill_template(r#"{"score": {n}} {unknown} {"#, &[("n", "5")]);
        assert_eq!(out, r#"{"score": 5} {unknown} {"#);
    }
}
