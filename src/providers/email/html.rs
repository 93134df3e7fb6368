//! HTML to plain text for message bodies.

/// Tags that start a new line in the text rendering.
const BLOCK_TAGS: &[&str] = &[
    "br", "p", "/p", "div", "/div", "li", "tr", "/tr", "h1", "h2", "h3", "h4", "h5", "h6",
    "/h1", "/h2", "/h3", "/h4", "/h5", "/h6", "blockquote", "/blockquote", "hr",
];

/// Strips tags, turns block elements into line breaks and decodes common
/// entities. `<style>` and `<script>` contents are dropped.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut tag_name = String::new();
    let mut name_done = false;
    let mut skip_until: Option<&'static str> = None;
    let mut entity: Option<String> = None;

    for ch in html.chars() {
        if let Some(buf) = entity.as_mut() {
            if ch == ';' {
                out.push_str(&decode_entity(buf));
                entity = None;
            } else if buf.len() < 10 && (ch.is_ascii_alphanumeric() || ch == '#') {
                buf.push(ch);
            } else {
                // Not an entity after all.
                out.push('&');
                out.push_str(buf);
                entity = None;
                if ch == '<' {
                    in_tag = true;
                    tag_name.clear();
                    name_done = false;
                } else {
                    out.push(ch);
                }
            }
            continue;
        }

        if in_tag {
            if ch == '>' {
                let lower = tag_name.trim_end_matches('/').to_ascii_lowercase();
                match skip_until {
                    Some(end) if lower == end => skip_until = None,
                    Some(_) => {}
                    None => {
                        if lower == "style" || lower == "script" {
                            skip_until = Some(if lower == "style" { "/style" } else { "/script" });
                        } else if BLOCK_TAGS.contains(&lower.as_str()) {
                            out.push('\n');
                        }
                    }
                }
                in_tag = false;
            } else if ch.is_whitespace() {
                name_done |= !tag_name.is_empty();
            } else if !name_done && tag_name.len() < 32 {
                tag_name.push(ch);
            }
            continue;
        }

        match ch {
            '<' => {
                in_tag = true;
                tag_name.clear();
                name_done = false;
            }
            _ if skip_until.is_some() => {}
            '&' => entity = Some(String::new()),
            _ => out.push(ch),
        }
    }

    if let Some(buf) = entity {
        out.push('&');
        out.push_str(&buf);
    }

    normalize_whitespace(&out)
}

fn decode_entity(name: &str) -> String {
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" | "#39" => "'".to_string(),
        "nbsp" => " ".to_string(),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()
            } else {
                name.strip_prefix('#').and_then(|dec| dec.parse().ok())
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| format!("&{};", name))
        }
    }
}

/// Trims each line and collapses runs of blank lines to one.
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}
