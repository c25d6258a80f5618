//! Pattern extraction for the handful of S3 XML responses we consume.
//!
//! This is not an XML parser. It finds `<Tag>...</Tag>` pairs by text
//! search, which is enough for the flat, machine-generated documents S3
//! returns.

use chrono::{DateTime, Utc};

/// One object in a `ListObjectsV2` page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A parsed `ListBucketResult` page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// Inner text of every `<tag>` element, in document order.
pub fn elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut found = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(&open) {
        let body = &rest[start + open.len()..];
        let Some(end) = body.find(&close) else {
            break;
        };
        found.push(&body[..end]);
        rest = &body[end + close.len()..];
    }
    found
}

/// Inner text of the first `<tag>` element.
pub fn element<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    elements(xml, tag).into_iter().next()
}

/// Decode the predefined entities and numeric character references.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };

        let entity = &tail[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .map(|hex| u32::from_str_radix(hex, 16))
                .or_else(|| entity.strip_prefix('#').map(|dec| dec.parse::<u32>()))
                .and_then(|code| code.ok())
                .and_then(char::from_u32),
        };

        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=semi]),
        }
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    out
}

/// Parse a `ListObjectsV2` response body.
pub fn parse_list_page(xml: &str) -> ListPage {
    let objects = elements(xml, "Contents")
        .into_iter()
        .filter_map(|contents| {
            let key = decode_entities(element(contents, "Key")?);
            let size = element(contents, "Size")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0);
            let last_modified = element(contents, "LastModified")
                .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
                .map(|dt| dt.with_timezone(&Utc));
            Some(ListedObject {
                key,
                size,
                last_modified,
            })
        })
        .collect();

    let common_prefixes = elements(xml, "CommonPrefixes")
        .into_iter()
        .filter_map(|block| element(block, "Prefix"))
        .map(decode_entities)
        .collect();

    ListPage {
        objects,
        common_prefixes,
        is_truncated: element(xml, "IsTruncated").is_some_and(|v| v.trim() == "true"),
        next_continuation_token: element(xml, "NextContinuationToken").map(decode_entities),
    }
}

/// `Code` and `Message` of an `<Error>` document.
pub fn parse_error(xml: &str) -> Option<(String, String)> {
    let error = element(xml, "Error")?;
    let code = element(error, "Code").map(decode_entities)?;
    let message = element(error, "Message")
        .map(decode_entities)
        .unwrap_or_default();
    Some((code, message))
}
