//! A forgiving tag tokenizer for model-emitted pseudo-XML.
//!
//! The scanner only reports tags. Text between tags is never copied; parsers
//! slice it out of the source using the byte offsets carried by each [`Tag`].
//! A `<` that does not start a well-formed tag is treated as text, and an
//! unterminated tag ends the scan.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Open { self_closing: bool },
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub kind: TagKind,
    /// Attribute values with entities decoded, in source order.
    pub attributes: Vec<(String, String)>,
    /// Byte offset of the opening `<`.
    pub start: usize,
    /// Byte offset just past the closing `>`.
    pub end: usize,
}

impl Tag {
    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn opens(&self, name: &str) -> bool {
        matches!(self.kind, TagKind::Open { .. }) && self.is(name)
    }

    pub fn closes(&self, name: &str) -> bool {
        self.kind == TagKind::Close && self.is(name)
    }

    pub fn is_self_closing(&self) -> bool {
        self.kind == TagKind::Open { self_closing: true }
    }

    /// Looks up an attribute by case-insensitive name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Iterator over the tags of `src`, in document order.
pub struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn skip_whitespace(&self, mut p: usize) -> usize {
        let bytes = self.bytes();
        while p < bytes.len() && bytes[p].is_ascii_whitespace() {
            p += 1;
        }
        p
    }

    fn read_name(&self, start: usize) -> usize {
        let bytes = self.bytes();
        let mut p = start;
        while p < bytes.len() && is_name_byte(bytes[p]) {
            p += 1;
        }
        p
    }

    fn find_from(&self, from: usize, needle: &str) -> Option<usize> {
        self.src.get(from..)?.find(needle).map(|i| from + i)
    }

    /// Reads `</name>` starting at `start` (the `<`).
    fn close_tag(&mut self, start: usize) -> Option<Option<Tag>> {
        let name_end = self.read_name(start + 2);
        if name_end == start + 2 {
            self.pos = start + 1;
            return Some(None);
        }
        let gt = self.find_from(name_end, ">")?;
        self.pos = gt + 1;
        Some(Some(Tag {
            name: self.src[start + 2..name_end].to_string(),
            kind: TagKind::Close,
            attributes: Vec::new(),
            start,
            end: gt + 1,
        }))
    }

    /// Reads `<name attr="value" ...>` or `<name .../>` starting at `start`.
    fn open_tag(&mut self, start: usize) -> Option<Tag> {
        let bytes = self.bytes();
        let name_end = self.read_name(start + 1);
        let name = self.src[start + 1..name_end].to_string();
        let mut attributes = Vec::new();
        let mut p = name_end;

        let self_closing = loop {
            p = self.skip_whitespace(p);
            match bytes.get(p)? {
                b'>' => {
                    p += 1;
                    break false;
                }
                b'/' if bytes.get(p + 1) == Some(&b'>') => {
                    p += 2;
                    break true;
                }
                b'/' => {
                    p += 1;
                    continue;
                }
                _ => {}
            }

            let key_end = self.read_name(p);
            if key_end == p {
                // Stray character such as an unmatched quote.
                p += 1;
                continue;
            }
            let key = self.src[p..key_end].to_string();
            p = self.skip_whitespace(key_end);

            let value = if bytes.get(p) == Some(&b'=') {
                p = self.skip_whitespace(p + 1);
                match bytes.get(p)? {
                    quote @ (b'"' | b'\'') => {
                        let close = self.find_from(p + 1, if *quote == b'"' { "\"" } else { "'" })?;
                        let value = &self.src[p + 1..close];
                        p = close + 1;
                        value
                    }
                    _ => {
                        let value_start = p;
                        while p < bytes.len()
                            && !bytes[p].is_ascii_whitespace()
                            && bytes[p] != b'>'
                        {
                            p += 1;
                        }
                        &self.src[value_start..p]
                    }
                }
            } else {
                ""
            };
            attributes.push((key, decode_entities(value)));
        };

        self.pos = p;
        Some(Tag {
            name,
            kind: TagKind::Open { self_closing },
            attributes,
            start,
            end: p,
        })
    }
}

impl Iterator for Scanner<'_> {
    type Item = Tag;

    fn next(&mut self) -> Option<Tag> {
        loop {
            let start = self.find_from(self.pos, "<")?;
            let rest = &self.src[start..];

            if rest.starts_with("<!--") {
                self.pos = self.find_from(start + 4, "-->").map_or(self.src.len(), |i| i + 3);
            } else if rest.starts_with("</") {
                if let Some(tag) = self.close_tag(start)? {
                    return Some(tag);
                }
            } else if rest.starts_with("<!") || rest.starts_with("<?") {
                self.pos = self.find_from(start, ">").map_or(self.src.len(), |i| i + 1);
            } else if rest.as_bytes().get(1).is_some_and(u8::is_ascii_alphabetic) {
                return self.open_tag(start);
            } else {
                self.pos = start + 1;
            }
        }
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.')
}

/// Decodes the five predefined XML entities plus numeric `&#39;`.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
