//! Builders for the body blocks appended to records. Shapes follow the
//! workspace's block API: every block is an object with a type tag and a
//! matching payload of rich-text spans.

use serde_json::{Value, json};

pub fn text_span(content: &str) -> Value {
    json!({ "text": { "content": content } })
}

pub fn linked_span(content: &str, url: &str) -> Value {
    json!({ "text": { "content": content, "link": { "url": url } } })
}

pub fn heading_1(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_1",
        "heading_1": { "rich_text": [text_span(text)] }
    })
}

pub fn heading_2(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_2",
        "heading_2": { "rich_text": [text_span(text)] }
    })
}

pub fn heading_3(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_3",
        "heading_3": { "rich_text": [text_span(text)] }
    })
}

pub fn paragraph(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": { "rich_text": [text_span(text)] }
    })
}

pub fn linked_paragraph(text: &str, url: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": { "rich_text": [linked_span(text, url)] }
    })
}

/// Paragraph built from pre-assembled rich-text spans, for lines mixing
/// plain and linked runs.
pub fn span_paragraph(spans: Vec<Value>) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": { "rich_text": spans }
    })
}

pub fn external_image(url: &str) -> Value {
    json!({
        "object": "block",
        "type": "image",
        "image": { "type": "external", "external": { "url": url } }
    })
}

/// Flatten a block's rich-text contents, for test assertions.
#[cfg(test)]
pub(crate) fn block_text(block: &Value) -> String {
    let Some(tag) = block.get("type").and_then(Value::as_str) else {
        return String::new();
    };
    let Some(spans) = block
        .get(tag)
        .and_then(|payload| payload.get("rich_text"))
        .and_then(Value::as_array)
    else {
        return String::new();
    };
    spans
        .iter()
        .filter_map(|span| span.pointer("/text/content").and_then(Value::as_str))
        .collect()
}
