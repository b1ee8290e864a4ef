//! Caps string parser using winnow.
//!
//! Accepts the usual caps syntax:
//!
//! ```text
//! audio/x-raw, format=(string){ S16LE, F32LE }, rate=(int)[ 8000, 48000 ]; audio/mpeg
//! video/x-raw, framerate=(fraction)30/1, interlaced=(boolean)false
//! ANY
//! EMPTY
//! ```
//!
//! Parsing happens in two steps: winnow turns the text into raw tokens,
//! then tokens are converted to typed values so a bad value can be reported
//! with its field name.

use std::str::FromStr;

use winnow::Parser;
use winnow::ascii::multispace0;
use winnow::combinator::{alt, delimited, opt, preceded, repeat, separated};
use winnow::error::ContextError;
use winnow::token::take_while;

use super::value::{CapsValue, Fraction, Value};
use super::{Caps, Structure};
use crate::error::CapsParseError;

type WResult<T> = std::result::Result<T, ContextError>;

#[derive(Debug, Clone)]
struct Token {
    text: String,
    quoted: bool,
}

#[derive(Debug, Clone)]
enum RawShape {
    Fixed(Token),
    Range(Token, Token),
    List(Vec<Token>),
}

#[derive(Debug, Clone)]
struct RawField {
    name: String,
    kind: Option<String>,
    shape: RawShape,
}

#[derive(Debug, Clone)]
struct RawStructure {
    name: String,
    fields: Vec<RawField>,
}

#[derive(Debug, Clone)]
enum RawCaps {
    Any,
    Empty,
    Structures(Vec<RawStructure>),
}

impl FromStr for Caps {
    type Err = CapsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = caps_body.parse(s).map_err(|e| CapsParseError::Syntax {
            rest: e.input()[e.offset()..].to_string(),
        })?;
        match raw {
            RawCaps::Any => Ok(Caps::new_any()),
            RawCaps::Empty => Ok(Caps::new_empty()),
            RawCaps::Structures(structures) => {
                let mut caps = Caps::new_empty();
                for raw in structures {
                    caps.append_structure(convert_structure(raw)?);
                }
                Ok(caps)
            }
        }
    }
}

// ============================================================================
// Grammar
// ============================================================================

fn caps_body(input: &mut &str) -> WResult<RawCaps> {
    multispace0.parse_next(input)?;
    let raw = alt((
        ("ANY", multispace0).value(RawCaps::Any),
        (alt(("EMPTY", "NONE")), multispace0).value(RawCaps::Empty),
        separated(1.., structure, (multispace0, ';', multispace0)).map(RawCaps::Structures),
    ))
    .parse_next(input)?;
    let _ = opt((multispace0, ';')).parse_next(input)?;
    multispace0.parse_next(input)?;
    Ok(raw)
}

fn structure(input: &mut &str) -> WResult<RawStructure> {
    let name = take_while(1.., |c: char| c.is_ascii_alphanumeric() || "/-_.+".contains(c))
        .parse_next(input)?;
    let fields = repeat(0.., preceded((multispace0, ',', multispace0), field)).parse_next(input)?;
    Ok(RawStructure {
        name: name.to_string(),
        fields,
    })
}

fn field(input: &mut &str) -> WResult<RawField> {
    let name = take_while(1.., |c: char| c.is_ascii_alphanumeric() || "-_.".contains(c))
        .parse_next(input)?;
    (multispace0, '=', multispace0).parse_next(input)?;
    let kind = opt(delimited(
        '(',
        take_while(1.., |c: char| c.is_ascii_alphanumeric()),
        ')',
    ))
    .parse_next(input)?;
    multispace0.parse_next(input)?;
    let shape = alt((range, list, token.map(RawShape::Fixed))).parse_next(input)?;
    Ok(RawField {
        name: name.to_string(),
        kind: kind.map(str::to_string),
        shape,
    })
}

fn range(input: &mut &str) -> WResult<RawShape> {
    let (_, _, min, _, _, _, max, _, _) = (
        '[',
        multispace0,
        token,
        multispace0,
        ',',
        multispace0,
        token,
        multispace0,
        ']',
    )
        .parse_next(input)?;
    Ok(RawShape::Range(min, max))
}

fn list(input: &mut &str) -> WResult<RawShape> {
    let values = delimited(
        ('{', multispace0),
        separated(1.., token, (multispace0, ',', multispace0)),
        (multispace0, '}'),
    )
    .parse_next(input)?;
    Ok(RawShape::List(values))
}

fn token(input: &mut &str) -> WResult<Token> {
    alt((quoted, bare)).parse_next(input)
}

fn bare(input: &mut &str) -> WResult<Token> {
    take_while(1.., |c: char| !c.is_whitespace() && !",;[]{}\"=".contains(c))
        .map(|s: &str| Token {
            text: s.to_string(),
            quoted: false,
        })
        .parse_next(input)
}

fn quoted(input: &mut &str) -> WResult<Token> {
    '"'.parse_next(input)?;
    let s: &str = *input;
    let mut text = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                *input = &s[i + 1..];
                return Ok(Token { text, quoted: true });
            }
            '\\' => match chars.next() {
                Some((_, escaped)) => text.push(escaped),
                None => break,
            },
            _ => text.push(c),
        }
    }
    Err(ContextError::new())
}

// ============================================================================
// Typed conversion
// ============================================================================

fn convert_structure(raw: RawStructure) -> Result<Structure, CapsParseError> {
    let mut structure = Structure::new(raw.name);
    for field in raw.fields {
        let kind = field.kind.as_deref();
        let convert = |token: &Token| convert_token(&field.name, kind, token);
        let value = match &field.shape {
            RawShape::Fixed(token) => CapsValue::Fixed(convert(token)?),
            RawShape::Range(min, max) => CapsValue::Range {
                min: convert(min)?,
                max: convert(max)?,
            },
            RawShape::List(tokens) => CapsValue::List(
                tokens
                    .iter()
                    .map(convert)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        structure.set(field.name.clone(), value);
    }
    Ok(structure)
}

fn convert_token(field: &str, kind: Option<&str>, token: &Token) -> Result<Value, CapsParseError> {
    let bad = |kind: &str| CapsParseError::BadValue {
        field: field.to_string(),
        value: token.text.clone(),
        kind: kind.to_string(),
    };
    let text = token.text.as_str();
    match kind {
        Some("int" | "i" | "gint") => text.parse().map(Value::Int).map_err(|_| bad("int")),
        Some("boolean" | "bool" | "b") => parse_bool(text).map(Value::Bool).ok_or_else(|| bad("boolean")),
        Some("string" | "str" | "s") => Ok(Value::Str(token.text.clone())),
        Some("fraction" | "f") => parse_fraction(text).map(Value::Fraction).ok_or_else(|| bad("fraction")),
        Some(other) => Err(bad(other)),
        None if token.quoted => Ok(Value::Str(token.text.clone())),
        None => Ok(infer(text)),
    }
}

fn infer(text: &str) -> Value {
    if let Ok(v) = text.parse::<i64>() {
        return Value::Int(v);
    }
    if text.contains('/') {
        if let Some(fraction) = parse_fraction(text) {
            return Value::Fraction(fraction);
        }
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Str(text.to_string()),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" | "t" | "1" => Some(true),
        "false" | "no" | "f" | "0" => Some(false),
        _ => None,
    }
}

fn parse_fraction(text: &str) -> Option<Fraction> {
    match text.split_once('/') {
        Some((num, den)) => Some(Fraction::new(num.trim().parse().ok()?, den.trim().parse().ok()?)),
        None => text.parse().ok().map(|num| Fraction::new(num, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_any_and_empty() {
        assert!("ANY".parse::<Caps>().unwrap().is_any());
        assert!("EMPTY".parse::<Caps>().unwrap().is_empty());
        assert!(" NONE ".parse::<Caps>().unwrap().is_empty());
    }

    #[test]
    fn test_parse_typed_fields() {
        let caps: Caps = "audio/x-raw, format=(string){ S16LE, F32LE }, rate=(int)[ 8000, 48000 ], channels=(int)2"
            .parse()
            .unwrap();
        let s = caps.structure(0).unwrap();
        assert_eq!(s.name(), "audio/x-raw");
        assert_eq!(s.get("rate"), Some(&CapsValue::int_range(8000, 48000)));
        assert_eq!(s.get("format"), Some(&CapsValue::list(["S16LE", "F32LE"])));
        assert_eq!(s.get_int("channels"), Some(2));
    }

    #[test]
    fn test_parse_untyped_inference() {
        let caps: Caps = "video/x-raw,width=320,framerate=30/1,interlaced=false,format=\"I420\""
            .parse()
            .unwrap();
        let s = caps.structure(0).unwrap();
        assert_eq!(s.get_int("width"), Some(320));
        assert_eq!(s.value("framerate"), Some(&Value::Fraction(Fraction::new(30, 1))));
        assert_eq!(s.value("interlaced"), Some(&Value::Bool(false)));
        assert_eq!(s.get_str("format"), Some("I420"));
    }

    #[test]
    fn test_parse_multiple_structures() {
        let caps: Caps = "audio/x-raw; audio/mpeg, mpegversion=(int)4;".parse().unwrap();
        assert_eq!(caps.size(), 2);
        assert_eq!(caps.structure(1).unwrap().get_int("mpegversion"), Some(4));
    }

    #[test]
    fn test_parse_quoted_escapes() {
        let caps: Caps = r#"text/x-raw, title=(string)"say \"hi\"""#.parse().unwrap();
        assert_eq!(caps.structure(0).unwrap().get_str("title"), Some("say \"hi\""));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "audio/x-raw, rate=(int)fast".parse::<Caps>(),
            Err(CapsParseError::BadValue { .. })
        ));
        assert!(matches!(
            "audio/x-raw, rate=".parse::<Caps>(),
            Err(CapsParseError::Syntax { .. })
        ));
        assert!("".parse::<Caps>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let text = "audio/x-raw, format=(string){ S16LE, F32LE }, rate=(int)[ 8000, 48000 ], layout=(string)\"two words\"; video/x-raw, framerate=(fraction)30/1";
        let caps: Caps = text.parse().unwrap();
        assert_eq!(caps.to_string(), text);
        let again: Caps = caps.to_string().parse().unwrap();
        assert_eq!(again, caps);
    }
}
