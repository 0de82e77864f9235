//! Function-call fallback: `tool(entities=['email'], count=2)` becomes
//! `{"entities": ["email"], "count": 2}`.
//!
//! Only keyword arguments whose values are Python literals (strings,
//! numbers, booleans, `None`, lists, tuples, dicts) are accepted.
//! Positional literals are parsed and ignored.

use serde_json::{Map, Number, Value};

const MAX_DEPTH: usize = 64;

pub(crate) fn parse_call(text: &str) -> Option<Value> {
    let mut parser = CallParser {
        chars: text.trim().chars().collect(),
        pos: 0,
    };

    parser.identifier()?;
    parser.skip_ws();
    parser.expect('(')?;

    let mut kwargs = Map::new();
    loop {
        parser.skip_ws();
        match parser.peek()? {
            ')' => {
                parser.pos += 1;
                break;
            }
            ',' => {
                parser.pos += 1;
                continue;
            }
            _ => {}
        }

        let checkpoint = parser.pos;
        if let Some(name) = parser.keyword_name() {
            let value = parser.literal(0)?;
            kwargs.insert(name, value);
        } else {
            parser.pos = checkpoint;
            parser.literal(0)?;
        }

        parser.skip_ws();
        match parser.peek()? {
            ',' | ')' => {}
            _ => return None,
        }
    }

    parser.skip_ws();
    if parser.peek().is_some() || kwargs.is_empty() {
        return None;
    }
    Some(Value::Object(kwargs))
}

struct CallParser {
    chars: Vec<char>,
    pos: usize,
}

impl CallParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Option<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    /// Dotted identifier such as `tools.extract`.
    fn identifier(&mut self) -> Option<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => self.pos += 1,
            _ => return None,
        }
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        Some(self.chars[start..self.pos].iter().collect())
    }

    /// `name =` (but not `name ==`). Consumes through the `=`.
    fn keyword_name(&mut self) -> Option<String> {
        let name = self.identifier()?;
        self.skip_ws();
        self.expect('=')?;
        if self.peek() == Some('=') {
            return None;
        }
        Some(name)
    }

    fn literal(&mut self, depth: usize) -> Option<Value> {
        if depth > MAX_DEPTH {
            return None;
        }
        self.skip_ws();
        match self.peek()? {
            quote @ ('"' | '\'') => self.string(quote).map(Value::String),
            '[' => self.sequence(']', depth),
            '(' => self.sequence(')', depth),
            '{' => self.dict(depth),
            c if c == '-' || c == '+' || c.is_ascii_digit() => self.number(),
            _ => match self.identifier()?.as_str() {
                "True" => Some(Value::Bool(true)),
                "False" => Some(Value::Bool(false)),
                "None" => Some(Value::Null),
                _ => None,
            },
        }
    }

    fn string(&mut self, quote: char) -> Option<String> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let c = self.peek()?;
            self.pos += 1;
            match c {
                c if c == quote => return Some(out),
                '\\' => {
                    let escaped = self.peek()?;
                    self.pos += 1;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c => out.push(c),
            }
        }
    }

    fn sequence(&mut self, close: char, depth: usize) -> Option<Value> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek()? == close {
                self.pos += 1;
                return Some(Value::Array(items));
            }
            items.push(self.literal(depth + 1)?);
            self.skip_ws();
            match self.peek()? {
                ',' => self.pos += 1,
                c if c == close => {}
                _ => return None,
            }
        }
    }

    fn dict(&mut self, depth: usize) -> Option<Value> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek()? == '}' {
                self.pos += 1;
                return Some(Value::Object(map));
            }
            let key = match self.literal(depth + 1)? {
                Value::String(s) => s,
                other => other.to_string(),
            };
            self.skip_ws();
            self.expect(':')?;
            let value = self.literal(depth + 1)?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek()? {
                ',' => self.pos += 1,
                '}' => {}
                _ => return None,
            }
        }
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        self.pos += 1;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '_'))
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();

        if let Ok(n) = raw.parse::<i64>() {
            return Some(Value::Number(n.into()));
        }
        raw.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    }
}
