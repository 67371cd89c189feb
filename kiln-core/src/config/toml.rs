//! Minimal TOML reader for controller configuration and profiles
//!
//! Handles only the subset the configuration file uses. It does NOT
//! support all of TOML.
//!
//! Supported features:
//! - Key = value pairs (string, float, integer, boolean)
//! - [section] and [section.subsection] headers
//! - Arrays of inline tables, which may span several lines:
//!   `steps = [ { type = "ramp", target = 600 }, ... ]`
//! - Comments (# ...), including inside multi-line arrays
//! - Underscore digit separators in numbers
//!
//! NOT supported:
//! - Multi-line strings and escape sequences
//! - Datetime values
//! - Nested inline tables or arrays of tables (`[[...]]`)

use core::str::FromStr;

use heapless::String;

/// What went wrong while reading a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TomlErrorKind {
    /// Malformed section header
    InvalidSection,
    /// Section name not recognized
    UnknownSection,
    /// Key not recognized in its section
    UnknownKey,
    /// Value has the wrong type or cannot be parsed
    InvalidValue,
    /// Array opened but never closed
    UnterminatedArray,
    /// More items than the fixed capacity allows
    TooManyItems,
    /// A required key is absent
    MissingKey,
}

impl TomlErrorKind {
    /// Attach the line number the error was found on
    pub fn at(self, line: u32) -> TomlError {
        TomlError { line, kind: self }
    }
}

/// Parse error with its 1-based line number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TomlError {
    pub line: u32,
    pub kind: TomlErrorKind,
}

impl core::fmt::Display for TomlError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let what = match self.kind {
            TomlErrorKind::InvalidSection => "invalid section header",
            TomlErrorKind::UnknownSection => "unknown section",
            TomlErrorKind::UnknownKey => "unknown key",
            TomlErrorKind::InvalidValue => "invalid value",
            TomlErrorKind::UnterminatedArray => "unterminated array",
            TomlErrorKind::TooManyItems => "too many items",
            TomlErrorKind::MissingKey => "missing key",
        };
        write!(f, "line {}: {}", self.line, what)
    }
}

/// One logical entry of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item<'a> {
    /// `[name]` header, brackets removed
    Section(&'a str),
    /// `key = value`, value trimmed and stripped of trailing comments
    Pair { key: &'a str, value: &'a str },
}

/// Iterator over the entries of a document
///
/// Yields each item with the line number it starts on.
pub struct Items<'a> {
    input: &'a str,
    pos: usize,
    line: u32,
}

/// Iterate over the sections and key/value pairs of `input`
pub fn items(input: &str) -> Items<'_> {
    Items {
        input,
        pos: 0,
        line: 0,
    }
}

impl<'a> Items<'a> {
    /// End of the line that contains `from` (index of '\n' or input length)
    fn line_end(&self, from: usize) -> usize {
        self.input[from..]
            .find('\n')
            .map_or(self.input.len(), |i| from + i)
    }

    /// Move past the line ending at `end`
    fn advance_past(&mut self, end: usize) {
        self.pos = if end < self.input.len() { end + 1 } else { end };
    }

    fn pair(&mut self, start: usize, end: usize, line: u32) -> Result<Item<'a>, TomlError> {
        let input = self.input;
        let raw = &input[start..end];
        let eq = raw.find('=').ok_or(TomlErrorKind::InvalidValue.at(line))?;
        let key = raw[..eq].trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(TomlErrorKind::InvalidValue.at(line));
        }

        let after_eq = start + eq + 1;
        let leading = input[after_eq..end].len() - input[after_eq..end].trim_start().len();
        let value_start = after_eq + leading;

        if input[value_start..].starts_with('[') {
            let len = bracket_len(&input[value_start..])
                .ok_or(TomlErrorKind::UnterminatedArray.at(line))?;
            let value_end = value_start + len;
            self.line += input[start..value_end].matches('\n').count() as u32;

            let tail_end = self.line_end(value_end);
            if !strip_comment(&input[value_end..tail_end]).trim().is_empty() {
                return Err(TomlErrorKind::InvalidValue.at(self.line));
            }
            self.advance_past(tail_end);
            return Ok(Item::Pair {
                key,
                value: &input[value_start..value_end],
            });
        }

        self.advance_past(end);
        let value = strip_comment(&input[value_start..end]).trim();
        if value.is_empty() {
            return Err(TomlErrorKind::InvalidValue.at(line));
        }
        Ok(Item::Pair { key, value })
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = Result<(u32, Item<'a>), TomlError>;

    fn next(&mut self) -> Option<Self::Item> {
        let input = self.input;
        while self.pos < input.len() {
            let start = self.pos;
            let end = self.line_end(start);
            self.line += 1;
            let line = self.line;
            let content = strip_comment(&input[start..end]).trim();

            if content.is_empty() {
                self.advance_past(end);
                continue;
            }

            if content.starts_with('[') {
                self.advance_past(end);
                return Some(
                    parse_header(content)
                        .map(|name| (line, Item::Section(name)))
                        .map_err(|kind| kind.at(line)),
                );
            }

            let item = self.pair(start, end, line);
            if item.is_err() {
                // Stop after the first error
                self.pos = input.len();
            }
            return Some(item.map(|item| (line, item)));
        }
        None
    }
}

fn parse_header(content: &str) -> Result<&str, TomlErrorKind> {
    if content.starts_with("[[") || !content.ends_with(']') {
        return Err(TomlErrorKind::InvalidSection);
    }
    let name = content[1..content.len() - 1].trim();
    let valid = !name.is_empty()
        && name
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(is_name_char));
    if valid {
        Ok(name)
    } else {
        Err(TomlErrorKind::InvalidSection)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Remove a trailing `# comment` that is not inside a string
pub fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Length of the bracketed value at the start of `s`, including both brackets
///
/// Skips over strings and comments; `None` if the brackets never balance.
fn bracket_len(s: &str) -> Option<usize> {
    let mut depth = 0u32;
    let mut in_string = false;
    let mut in_comment = false;

    for (i, c) in s.char_indices() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        match c {
            '"' => in_string = !in_string,
            '#' if !in_string => in_comment = true,
            '[' | '{' if !in_string => depth += 1,
            ']' | '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a string value, removing the quotes
///
/// Bare words are accepted as well, matching the handwritten files this
/// reads.
pub fn parse_str(value: &str) -> Result<&str, TomlErrorKind> {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        Ok(&value[1..value.len() - 1])
    } else if !value.is_empty() && !value.contains(['"', '[', '{']) {
        Ok(value)
    } else {
        Err(TomlErrorKind::InvalidValue)
    }
}

/// Copy a number without its `_` separators
fn digits(value: &str) -> Result<String<32>, TomlErrorKind> {
    let mut out = String::new();
    for c in value.trim().chars().filter(|&c| c != '_') {
        out.push(c).map_err(|_| TomlErrorKind::InvalidValue)?;
    }
    Ok(out)
}

/// Parse a finite float; integers are accepted
pub fn parse_f32(value: &str) -> Result<f32, TomlErrorKind> {
    let v: f32 = digits(value)?
        .parse()
        .map_err(|_| TomlErrorKind::InvalidValue)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(TomlErrorKind::InvalidValue)
    }
}

/// Parse an integer value
pub fn parse_int<T: FromStr>(value: &str) -> Result<T, TomlErrorKind> {
    digits(value)?
        .parse()
        .map_err(|_| TomlErrorKind::InvalidValue)
}

/// Parse a boolean value
pub fn parse_bool(value: &str) -> Result<bool, TomlErrorKind> {
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(TomlErrorKind::InvalidValue),
    }
}

/// Iterator over the inline tables of an array value
///
/// Yields the text between each pair of braces.
pub struct InlineTables<'a> {
    rest: &'a str,
}

/// Iterate over `[ { ... }, { ... } ]`
pub fn inline_tables(value: &str) -> Result<InlineTables<'_>, TomlErrorKind> {
    let value = value.trim();
    if !value.starts_with('[') || !value.ends_with(']') {
        return Err(TomlErrorKind::InvalidValue);
    }
    Ok(InlineTables {
        rest: &value[1..value.len() - 1],
    })
}

impl<'a> Iterator for InlineTables<'a> {
    type Item = Result<&'a str, TomlErrorKind>;

    fn next(&mut self) -> Option<Self::Item> {
        // Skip separators, whitespace and comments between tables
        loop {
            let trimmed = self.rest.trim_start();
            if let Some(after) = trimmed.strip_prefix(',') {
                self.rest = after;
            } else if trimmed.starts_with('#') {
                let skip = trimmed.find('\n').map_or(trimmed.len(), |i| i + 1);
                self.rest = &trimmed[skip..];
            } else {
                self.rest = trimmed;
                break;
            }
        }

        if self.rest.is_empty() {
            return None;
        }
        if !self.rest.starts_with('{') {
            self.rest = "";
            return Some(Err(TomlErrorKind::InvalidValue));
        }

        let mut in_string = false;
        for (i, c) in self.rest.char_indices() {
            match c {
                '"' => in_string = !in_string,
                '{' if !in_string && i > 0 => {
                    self.rest = "";
                    return Some(Err(TomlErrorKind::InvalidValue));
                }
                '}' if !in_string => {
                    let table = &self.rest[1..i];
                    self.rest = &self.rest[i + 1..];
                    return Some(Ok(table));
                }
                _ => {}
            }
        }
        self.rest = "";
        Some(Err(TomlErrorKind::UnterminatedArray))
    }
}

/// Iterator over the `key = value` pairs of one inline table
pub struct TablePairs<'a> {
    rest: &'a str,
}

/// Iterate over the pairs inside `{ ... }` (braces already removed)
pub fn table_pairs(table: &str) -> TablePairs<'_> {
    TablePairs { rest: table }
}

impl<'a> Iterator for TablePairs<'a> {
    type Item = Result<(&'a str, &'a str), TomlErrorKind>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest.trim_start();
        if rest.is_empty() {
            return None;
        }

        let mut in_string = false;
        let mut split = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '"' => in_string = !in_string,
                ',' if !in_string => {
                    split = i;
                    break;
                }
                _ => {}
            }
        }

        let part = &rest[..split];
        self.rest = if split < rest.len() { &rest[split + 1..] } else { "" };

        let Some((key, value)) = part.split_once('=') else {
            self.rest = "";
            return Some(Err(TomlErrorKind::InvalidValue));
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            self.rest = "";
            return Some(Err(TomlErrorKind::InvalidValue));
        }
        Some(Ok((key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(input: &str) -> heapless::Vec<(u32, Item<'_>), 16> {
        let mut out = heapless::Vec::new();
        for item in items(input) {
            out.push(item.unwrap()).unwrap();
        }
        out
    }

    #[test]
    fn test_sections_and_pairs() {
        let doc = "# kiln\n[safety]\nmax_temp = 1280 # cone 10\n\n[relay]\ncycle_ms = 2_000\n";
        let parsed = collect(doc);

        assert_eq!(parsed[0], (2, Item::Section("safety")));
        assert_eq!(
            parsed[1],
            (
                3,
                Item::Pair {
                    key: "max_temp",
                    value: "1280"
                }
            )
        );
        assert_eq!(parsed[2], (5, Item::Section("relay")));
        assert_eq!(parse_int::<u32>("2_000"), Ok(2000));
    }

    #[test]
    fn test_hash_inside_string_kept() {
        let parsed = collect("name = \"glaze #6\" # comment");
        assert_eq!(
            parsed[0].1,
            Item::Pair {
                key: "name",
                value: "\"glaze #6\""
            }
        );
        assert_eq!(parse_str("\"glaze #6\""), Ok("glaze #6"));
    }

    #[test]
    fn test_multi_line_array() {
        let doc = "[profile.bisque]\nsteps = [\n  { type = \"ramp\", target = 600 }, # candling\n  { type = \"hold\", target = 600, duration = 600 },\n]\nafter = 1\n";
        let parsed = collect(doc);

        let Item::Pair { key, value } = parsed[1].1 else {
            panic!("expected pair");
        };
        assert_eq!(key, "steps");
        assert_eq!(parsed[1].0, 2);
        // Line numbering continues after the array
        assert_eq!(parsed[2].0, 6);

        let tables: heapless::Vec<&str, 4> = inline_tables(value)
            .unwrap()
            .map(|t| t.unwrap())
            .collect();
        assert_eq!(tables.len(), 2);

        let pairs: heapless::Vec<(&str, &str), 4> =
            table_pairs(tables[1]).map(|p| p.unwrap()).collect();
        assert_eq!(
            pairs.as_slice(),
            &[("type", "\"hold\""), ("target", "600"), ("duration", "600")]
        );
    }

    #[test]
    fn test_unterminated_array() {
        let mut iter = items("steps = [\n { type = \"ramp\" },\n");
        assert_eq!(
            iter.next(),
            Some(Err(TomlErrorKind::UnterminatedArray.at(1)))
        );
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_bad_header() {
        let mut iter = items("[[steps]]\n");
        assert_eq!(iter.next(), Some(Err(TomlErrorKind::InvalidSection.at(1))));
    }

    #[test]
    fn test_missing_value() {
        let mut iter = items("\n\nkey =   # nothing\n");
        assert_eq!(iter.next(), Some(Err(TomlErrorKind::InvalidValue.at(3))));
    }

    #[test]
    fn test_scalars() {
        assert_eq!(parse_f32("-12.5"), Ok(-12.5));
        assert_eq!(parse_f32("100"), Ok(100.0));
        assert_eq!(parse_f32("inf"), Err(TomlErrorKind::InvalidValue));
        assert_eq!(parse_bool("true"), Ok(true));
        assert_eq!(parse_bool("yes"), Err(TomlErrorKind::InvalidValue));
        assert_eq!(parse_int::<u8>("300"), Err(TomlErrorKind::InvalidValue));
        assert_eq!(parse_str("ramp"), Ok("ramp"));
    }

    #[test]
    fn test_nested_table_rejected() {
        let mut tables = inline_tables("[ { a = { b = 1 } } ]").unwrap();
        assert_eq!(tables.next(), Some(Err(TomlErrorKind::InvalidValue)));
    }

    #[test]
    fn test_error_display() {
        let mut text: String<32> = String::new();
        core::fmt::write(&mut text, format_args!("{}", TomlErrorKind::UnknownKey.at(7))).unwrap();
        assert_eq!(text.as_str(), "line 7: unknown key");
    }
}
