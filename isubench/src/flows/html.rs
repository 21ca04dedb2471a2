//! Just enough HTML scraping for the flows: tags, attributes and the text of
//! elements carrying a given class.
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"(?is)<([a-z][a-z0-9]*)\b([^>]*)>").unwrap();
    static ref ATTR: Regex =
        Regex::new(r#"(?s)([a-zA-Z_:][-a-zA-Z0-9_:.\[\]]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap();
    static ref CHAR_REF: Regex = Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap();
    static ref POST_ID: Regex = Regex::new(r"^/posts/([0-9]+)$").unwrap();
}

/// One start tag and its (unescaped) attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    /// Byte offset just past the tag in the source document.
    pub end: usize,
    pub attrs: HashMap<String, String>,
}

impl Tag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }
}

/// Start tags named `name`, in document order.
pub fn tags(body: &str, name: &str) -> Vec<Tag> {
    all_tags(body)
        .into_iter()
        .filter(|tag| tag.name == name)
        .collect()
}

fn all_tags(body: &str) -> Vec<Tag> {
    TAG.captures_iter(body)
        .map(|caps| {
            let attrs = ATTR
                .captures_iter(&caps[2])
                .map(|attr| {
                    let value = attr.get(2).or_else(|| attr.get(3)).map_or("", |m| m.as_str());
                    (attr[1].to_ascii_lowercase(), unescape(value))
                })
                .collect();
            Tag {
                name: caps[1].to_ascii_lowercase(),
                end: caps.get(0).map_or(0, |m| m.end()),
                attrs,
            }
        })
        .collect()
}

/// `src` of every `<img>`.
pub fn img_srcs(body: &str) -> Vec<String> {
    tags(body, "img")
        .into_iter()
        .filter_map(|tag| tag.attrs.get("src").cloned())
        .collect()
}

/// `value` of the first `<input name="csrf_token">`.
pub fn csrf_token(body: &str) -> Option<String> {
    input_value(body, "name", "csrf_token")
}

/// `value` of the first `<input>` whose `attr` equals `expected`.
pub fn input_value(body: &str, attr: &str, expected: &str) -> Option<String> {
    tags(body, "input")
        .into_iter()
        .find(|tag| tag.attr(attr) == Some(expected))
        .and_then(|tag| tag.attrs.get("value").cloned())
}

/// Trimmed text directly inside every element with `class`, in document
/// order. Nested markup ends the text.
pub fn class_texts(body: &str, class: &str) -> Vec<String> {
    all_tags(body)
        .into_iter()
        .filter(|tag| tag.has_class(class))
        .map(|tag| {
            let rest = &body[tag.end..];
            let text = rest.split('<').next().unwrap_or_default();
            unescape(text.trim())
        })
        .collect()
}

/// `src` of the first `<img>` inside each element with `class`.
pub fn class_img_srcs(body: &str, class: &str) -> Vec<String> {
    let tags = all_tags(body);
    tags.iter()
        .enumerate()
        .filter(|(_, tag)| tag.has_class(class))
        .filter_map(|(i, _)| {
            tags[i + 1..]
                .iter()
                .find(|tag| tag.name == "img")
                .and_then(|img| img.attrs.get("src").cloned())
        })
        .collect()
}

/// The id in a `/posts/{id}` path.
pub fn post_id(path: &str) -> Option<&str> {
    POST_ID
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Decodes the character references a template engine emits.
pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    CHAR_REF
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let reference = &caps[1];
            let decoded = match reference {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => reference
                    .strip_prefix("#x")
                    .or_else(|| reference.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| {
                        reference
                            .strip_prefix('#')
                            .and_then(|dec| dec.parse::<u32>().ok())
                    })
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<div class="header"><span class="isu-account-name">alice</span>さん</div>
<form method="post" action="/" enctype="multipart/form-data">
  <input type="hidden" name="csrf_token" value="tok&amp;en">
</form>
<div class="isu-post" id="pid_3">
  <a href="/@bob" class="isu-post-account-name">bob</a>
  <div class="isu-post-image">
    <img src="/image/3.jpg" class="isu-image">
  </div>
  <div class="isu-comment">
    <a href="/@carol" class="isu-comment-account-name">carol</a>
    <span class="isu-comment-text">nice &lt;3</span>
  </div>
</div>
<input type="checkbox" name="uid[]" value="42" data-account-name="victim">
<img class="isu-loading-icon" src='/img/ajax-loader.gif'>
"#;

    #[test]
    fn extracts_form_values() {
        assert_eq!(csrf_token(PAGE).as_deref(), Some("tok&en"));
        assert_eq!(
            input_value(PAGE, "data-account-name", "victim").as_deref(),
            Some("42")
        );
        assert_eq!(input_value(PAGE, "data-account-name", "nobody"), None);
        assert_eq!(csrf_token("<p>no form</p>"), None);
    }

    #[test]
    fn extracts_images() {
        assert_eq!(img_srcs(PAGE), vec!["/image/3.jpg", "/img/ajax-loader.gif"]);
        assert_eq!(class_img_srcs(PAGE, "isu-post-image"), vec!["/image/3.jpg"]);
    }

    #[test]
    fn extracts_class_text_in_order() {
        assert_eq!(class_texts(PAGE, "isu-account-name"), vec!["alice"]);
        assert_eq!(class_texts(PAGE, "isu-post-account-name"), vec!["bob"]);
        assert_eq!(class_texts(PAGE, "isu-comment-text"), vec!["nice <3"]);
        assert!(class_texts(PAGE, "isu-post").iter().all(String::is_empty));
        assert!(class_texts("<p>anon</p>", "isu-account-name").is_empty());
    }

    #[test]
    fn unescapes_references() {
        assert_eq!(unescape("a &amp; b &#39;c&#x27; &quot;d&quot;"), "a & b 'c' \"d\"");
        assert_eq!(unescape("&bogus; stays"), "&bogus; stays");
    }

    #[test]
    fn post_ids() {
        assert_eq!(post_id("/posts/123"), Some("123"));
        assert_eq!(post_id("/posts/abc"), None);
        assert_eq!(post_id("/"), None);
    }
}
