use std::collections::HashMap;
use std::fmt;

use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum ParserError {
    Duplicate(String),
    Unknown(String),
    Parse { parser: String, raw: String },
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserError::Duplicate(id) => write!(f, "parser \"{id}\" already registered"),
            ParserError::Unknown(id) => write!(f, "no parser registered as \"{id}\""),
            ParserError::Parse { parser, raw } => {
                write!(f, "parser \"{parser}\" can not normalize \"{raw}\"")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueType {
    NUMERIC,
    TEXT,
}

// Normalized comparison key. Numbers compare numerically, text
// lexicographically. The two never meet within one sort key because a
// parser declares its value type up front.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Number(f64),
    Text(String),
}

impl Key {
    pub fn compare(&self, other: &Key) -> std::cmp::Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => {
                a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
            }
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
            // Mixed keys only happen when a custom parser misbehaves.
            // Put numbers before text and move on.
            (Key::Number(_), Key::Text(_)) => std::cmp::Ordering::Less,
            (Key::Text(_), Key::Number(_)) => std::cmp::Ordering::Greater,
        }
    }
}

pub trait Parser {
    fn value_type(&self) -> ValueType;
    fn normalize(&self, raw: &str) -> Result<Key, ParserError>;
}

// Length of the raw string, kept in the textual bucket: lengths order
// lexicographically over their decimal rendering. Callers that want
// numeric length order have to register a numeric variant themselves.
struct StringLength;

impl Parser for StringLength {
    fn value_type(&self) -> ValueType {
        ValueType::TEXT
    }

    fn normalize(&self, raw: &str) -> Result<Key, ParserError> {
        Ok(Key::Text(raw.chars().count().to_string()))
    }
}

// Numeric value of everything before the first space, e.g. "42 km" -> 42
struct SubstringBeforeSpace;

impl Parser for SubstringBeforeSpace {
    fn value_type(&self) -> ValueType {
        ValueType::NUMERIC
    }

    fn normalize(&self, raw: &str) -> Result<Key, ParserError> {
        let token = raw.split(' ').next().unwrap_or(raw);
        token
            .parse::<f64>()
            .map(Key::Number)
            .map_err(|_| ParserError::Parse {
                parser: "substring_before_space".to_string(),
                raw: raw.to_string(),
            })
    }
}

// Signed total seconds from a "[-]MM:SS[...]" token. Anything after the
// first space is ignored, e.g. "-2:30 (PR)" -> -150.
struct Timestamp;

impl Parser for Timestamp {
    fn value_type(&self) -> ValueType {
        ValueType::NUMERIC
    }

    fn normalize(&self, raw: &str) -> Result<Key, ParserError> {
        let fail = || ParserError::Parse {
            parser: "timestamp".to_string(),
            raw: raw.to_string(),
        };

        let token = raw.split(' ').next().unwrap_or(raw);
        let (minutes, seconds) = token.split_once(':').ok_or_else(fail)?;
        let sign = if token.starts_with('-') { -1.0 } else { 1.0 };
        let minutes: f64 = minutes.parse().map_err(|_| fail())?;
        // Seconds may carry further ":" separated precision; only the
        // leading seconds field counts.
        let seconds: f64 = seconds
            .split(':')
            .next()
            .ok_or_else(fail)?
            .parse()
            .map_err(|_| fail())?;

        Ok(Key::Number(sign * (sign * minutes * 60.0 + seconds)))
    }
}

// Explicit id -> parser mapping, validated at registration. Built as part
// of the engine configuration, never a process wide singleton.
pub struct ParserRegistry {
    parsers: HashMap<String, Box<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        ParserRegistry {
            parsers: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Fresh registry, the builtin ids can not collide
        registry
            .register("string_length", Box::new(StringLength))
            .unwrap();
        registry
            .register("substring_before_space", Box::new(SubstringBeforeSpace))
            .unwrap();
        registry.register("timestamp", Box::new(Timestamp)).unwrap();
        registry
    }

    pub fn register(&mut self, id: &str, parser: Box<dyn Parser>) -> Result<(), ParserError> {
        if self.parsers.contains_key(id) {
            return Err(ParserError::Duplicate(id.to_string()));
        }
        debug!("Registered parser \"{id}\"");
        self.parsers.insert(id.to_string(), parser);
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<&dyn Parser, ParserError> {
        self.parsers
            .get(id)
            .map(|p| p.as_ref())
            .ok_or_else(|| ParserError::Unknown(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(id: &str, raw: &str) -> Result<Key, ParserError> {
        ParserRegistry::with_builtins()
            .resolve(id)
            .unwrap()
            .normalize(raw)
    }

    #[test]
    fn timestamp_negative_with_trailer() {
        assert_eq!(normalize("timestamp", "-2:30 foo"), Ok(Key::Number(-150.0)));
    }

    #[test]
    fn timestamp_positive() {
        assert_eq!(normalize("timestamp", "4:05"), Ok(Key::Number(245.0)));
    }

    #[test]
    fn timestamp_requires_colon() {
        assert_eq!(
            normalize("timestamp", "bad"),
            Err(ParserError::Parse {
                parser: "timestamp".to_string(),
                raw: "bad".to_string(),
            })
        );
    }

    #[test]
    fn substring_before_space_numeric() {
        assert_eq!(
            normalize("substring_before_space", "42 km"),
            Ok(Key::Number(42.0))
        );
    }

    #[test]
    fn string_length_is_textual() {
        // Textual bucket: "12" < "7" lexicographically
        let twelve = normalize("string_length", "twelve char.").unwrap();
        let seven = normalize("string_length", "7 chars").unwrap();
        assert_eq!(twelve, Key::Text("12".to_string()));
        assert_eq!(twelve.compare(&seven), std::cmp::Ordering::Less);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = ParserRegistry::with_builtins();
        let result = registry.register("timestamp", Box::new(super::Timestamp));
        assert_eq!(result, Err(ParserError::Duplicate("timestamp".to_string())));
        // Registry still usable afterwards
        assert!(registry.resolve("timestamp").is_ok());
    }

    #[test]
    fn unknown_parser_rejected() {
        let registry = ParserRegistry::with_builtins();
        assert!(matches!(
            registry.resolve("nope").err(),
            Some(ParserError::Unknown(_))
        ));
    }
}
