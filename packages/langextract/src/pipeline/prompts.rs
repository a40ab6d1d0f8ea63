//! LLM prompts for the extraction pipeline.
//!
//! One prompt drives every pass. Few-shot examples are rendered in the same
//! JSON shape the response parser expects back.

use serde_json::{json, Map, Value};

use crate::types::{example::ExampleData, extraction::Extraction};

/// Prompt for extracting grounded entities from a document or chunk.
pub const EXTRACT_PROMPT: &str = r#"{task_description}

Extract entities from the text below.

Rules:
1. Use the exact wording of the source text for every extraction
2. List extractions in the order they appear in the text
3. Do not paraphrase, summarize, or overlap extractions
4. Put any extra details in "attributes"
5. Give a confidence between 0.0 and 1.0 when you can

{examples_section}{context_section}{pass_section}Output JSON:
{
    "extractions": [
        {
            "extraction_class": "entity type",
            "extraction_text": "exact text from the source",
            "attributes": {},
            "confidence": 0.9
        }
    ]
}

Text:
{text}"#;

/// Render one extraction in the output format.
fn example_item(extraction: &Extraction) -> Value {
    let mut item = Map::new();
    item.insert("extraction_class".into(), json!(extraction.class));
    item.insert("extraction_text".into(), json!(extraction.text));

    if !extraction.attributes.is_empty() {
        let attributes: Map<String, Value> = extraction
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        item.insert("attributes".into(), Value::Object(attributes));
    }
    if let Some(confidence) = extraction.confidence {
        item.insert("confidence".into(), json!(confidence));
    }

    Value::Object(item)
}

fn format_examples(examples: &[ExampleData]) -> String {
    if examples.is_empty() {
        return String::new();
    }

    let rendered = examples
        .iter()
        .map(|example| {
            let items: Vec<Value> = example.extractions.iter().map(example_item).collect();
            let output = serde_json::to_string_pretty(&json!({ "extractions": items }))
                .unwrap_or_else(|_| "{}".to_string());
            format!("Text: {}\nOutput:\n{}\n", example.text, output)
        })
        .collect::<Vec<_>>()
        .join("\n---\n");

    format!("Examples:\n\n{}\n", rendered)
}

/// Format the extract prompt for one pass over one piece of text.
///
/// `pass` is zero-based; later passes ask for entities missed earlier.
pub fn format_extract_prompt(
    task_description: &str,
    text: &str,
    examples: &[ExampleData],
    additional_context: Option<&str>,
    pass: u32,
) -> String {
    let context_section = match additional_context {
        Some(context) if !context.trim().is_empty() => {
            format!("Additional context:\n{}\n\n", context.trim())
        }
        _ => String::new(),
    };

    let pass_section = if pass > 0 {
        "This is a follow-up pass. Focus on entities that may have been missed before.\n\n"
            .to_string()
    } else {
        String::new()
    };

    let examples_section = format_examples(examples);
    render(
        EXTRACT_PROMPT,
        &[
            ("task_description", task_description.trim()),
            ("examples_section", &examples_section),
            ("context_section", &context_section),
            ("pass_section", &pass_section),
            ("text", text),
        ],
    )
}

/// Fill `{name}` placeholders in one pass over the template.
///
/// Substituted values are never rescanned, so caller text containing
/// placeholder-like braces comes through verbatim. Unknown `{...}` runs
/// (the JSON in the template) are left alone.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let extra: usize = values.iter().map(|(_, v)| v.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];

        let value = tail.find('}').and_then(|close| {
            let name = &tail[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close + 1))
        });

        match value {
            Some((value, consumed)) => {
                out.push_str(value);
                rest = &tail[consumed..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    out
}
