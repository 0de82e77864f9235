//! Lenient JSON reader for almost-JSON model output.
//!
//! Accepts trailing and doubled commas, unquoted keys, single-quoted
//! strings, Python literals (`True`, `False`, `None`), bare words as
//! strings and truncated input (open strings, arrays and objects are
//! closed at end of text). The text must start with `{` or `[` and
//! nothing but whitespace may follow the top-level value.

use serde_json::{Map, Number, Value};

const MAX_DEPTH: usize = 64;

pub(crate) fn repair(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }

    let mut reader = Reader {
        chars: trimmed.chars().collect(),
        pos: 0,
    };
    let value = reader.value(0)?;
    reader.skip_ws();
    if reader.peek().is_some() {
        return None;
    }
    Some(value)
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
}

impl Reader {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn value(&mut self, depth: usize) -> Option<Value> {
        if depth > MAX_DEPTH {
            return None;
        }
        self.skip_ws();
        match self.peek()? {
            '{' => self.object(depth),
            '[' => self.array(depth),
            quote @ ('"' | '\'') => Some(Value::String(self.string(quote))),
            c if c == '-' || c.is_ascii_digit() => Some(self.number()),
            _ => self.bare_word().map(literal),
        }
    }

    fn object(&mut self, depth: usize) -> Option<Value> {
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_ws();
            let key = match self.peek() {
                None => break,
                Some('}') => {
                    self.bump();
                    break;
                }
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some(quote @ ('"' | '\'')) => self.string(quote),
                Some(_) => match self.bare_word() {
                    Some(word) => word,
                    // A stray closer or colon with no key.
                    None => return None,
                },
            };

            self.skip_ws();
            match self.peek() {
                Some(':') => {
                    self.bump();
                }
                // Truncated after the key.
                None => break,
                Some(_) => return None,
            }

            self.skip_ws();
            let value = match self.peek() {
                None => break,
                Some(',') | Some('}') => Value::Null,
                Some(_) => self.value(depth + 1)?,
            };
            map.insert(key, value);
        }
        Some(Value::Object(map))
    }

    fn array(&mut self, depth: usize) -> Option<Value> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(']') => {
                    self.bump();
                    break;
                }
                Some(',') => {
                    self.bump();
                }
                Some(_) => items.push(self.value(depth + 1)?),
            }
        }
        Some(Value::Array(items))
    }

    /// Quoted string; an unterminated one runs to end of text.
    fn string(&mut self, quote: char) -> String {
        self.bump();
        let mut out = String::new();
        while let Some(c) = self.bump() {
            match c {
                c if c == quote => break,
                '\\' => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('b') => out.push('\u{8}'),
                    Some('f') => out.push('\u{c}'),
                    Some('u') => {
                        if let Some(decoded) = self.unicode_escape() {
                            out.push(decoded);
                        }
                    }
                    Some(other) => out.push(other),
                    None => break,
                },
                c => out.push(c),
            }
        }
        out
    }

    fn unicode_escape(&mut self) -> Option<char> {
        let end = (self.pos + 4).min(self.chars.len());
        let hex: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
    }

    fn number(&mut self) -> Value {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();

        if let Ok(n) = raw.parse::<i64>() {
            return Value::Number(n.into());
        }
        raw.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(raw))
    }

    /// Unquoted run up to the next structural character.
    fn bare_word(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| !matches!(c, ',' | ':' | '{' | '}' | '[' | ']' | '\n'))
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        let word = word.trim().to_string();
        if word.is_empty() {
            None
        } else {
            Some(word)
        }
    }
}

fn literal(word: String) -> Value {
    match word.as_str() {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        "null" | "None" | "undefined" => Value::Null,
        _ => Value::String(word),
    }
}
