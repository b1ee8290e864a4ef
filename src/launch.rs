//! Pipeline construction from a textual description.
//!
//! ```text
//! fakesrc num-buffers=3 ! identity ! fakesink
//! fakesrc ! tee name=t ! queue ! fakesink  t. ! queue ! fakesink
//! ```
//!
//! # Syntax
//!
//! - A description is one or more chains separated by whitespace.
//! - Items in a chain are separated by `!` and linked in order.
//! - An element is a factory name followed by `key=value` properties.
//!   Values can be quoted strings, booleans, numbers or bare words.
//! - `name.` or `name.pad` refers to an element created earlier in the
//!   description (for example a named tee), optionally naming the pad to
//!   link.
//!
//! Elements are created through an [`ElementRegistry`], added to a new
//! [`Pipeline`] and linked with [`Element::link_pads`], which requests pads
//! from REQUEST templates when needed.

use std::sync::Arc;

use tracing::debug;
use winnow::Parser;
use winnow::ascii::{alpha1, digit1, multispace0, multispace1};
use winnow::combinator::{alt, delimited, opt, repeat, separated};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

use crate::element::{Element, ElementRegistry, Pipeline, Properties, PropertyValue};
use crate::error::{Error, Result};

type WResult<T> = std::result::Result<T, ContextError>;

/// An element to create.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedElement {
    /// Factory name.
    pub factory: String,
    /// Properties in the order written.
    pub properties: Vec<(String, PropertyValue)>,
}

/// One link endpoint of a chain.
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchItem {
    /// A new element.
    Element(ParsedElement),
    /// An element created earlier, by name, with an optional pad name.
    Reference {
        /// Element name.
        element: String,
        /// Pad to link, chosen automatically if `None`.
        pad: Option<String>,
    },
}

/// A parsed description: chains of linked items.
pub type ParsedDescription = Vec<Vec<LaunchItem>>;

/// Parse a description without creating anything.
///
/// # Example
///
/// ```rust
/// use padline::launch::{LaunchItem, parse_description};
///
/// let chains = parse_description("fakesrc num-buffers=10 ! identity ! fakesink").unwrap();
/// assert_eq!(chains.len(), 1);
/// assert_eq!(chains[0].len(), 3);
/// assert!(matches!(&chains[0][0], LaunchItem::Element(e) if e.factory == "fakesrc"));
/// ```
pub fn parse_description(input: &str) -> Result<ParsedDescription> {
    description
        .parse(input.trim())
        .map_err(|e| Error::LaunchParse(e.to_string()))
}

/// Build a linked pipeline from a description.
pub fn parse_launch(input: &str, registry: &ElementRegistry) -> Result<Pipeline> {
    let chains = parse_description(input)?;
    let pipeline = Pipeline::new("pipeline")?;

    for chain in &chains {
        // Element and source pad the next item links from.
        let mut upstream: Option<(Arc<Element>, Option<String>)> = None;
        for item in chain {
            let (element, pad) = match item {
                LaunchItem::Element(parsed) => {
                    let properties: Properties = parsed.properties.iter().cloned().collect();
                    let element = registry.make(&parsed.factory, None, &properties)?;
                    pipeline.add(&element)?;
                    (element, None)
                }
                LaunchItem::Reference { element, pad } => {
                    let found = pipeline
                        .by_name(element)
                        .ok_or_else(|| Error::NotFound(format!("element '{element}'")))?;
                    (found, pad.clone())
                }
            };
            if let Some((src, src_pad)) = &upstream {
                debug!(
                    src = %src.name(),
                    sink = %element.name(),
                    "linking launch items"
                );
                src.link_pads(src_pad.as_deref(), &element, pad.as_deref())?;
            }
            upstream = Some((element, pad));
        }
    }
    Ok(pipeline)
}

// ============================================================================
// Grammar
// ============================================================================

fn description(input: &mut &str) -> WResult<ParsedDescription> {
    let chains = separated(1.., chain, multispace1).parse_next(input)?;
    multispace0.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }
    Ok(chains)
}

fn chain(input: &mut &str) -> WResult<Vec<LaunchItem>> {
    separated(1.., item, link_separator).parse_next(input)
}

fn link_separator(input: &mut &str) -> WResult<()> {
    multispace0.parse_next(input)?;
    '!'.parse_next(input)?;
    multispace0.parse_next(input)?;
    Ok(())
}

fn item(input: &mut &str) -> WResult<LaunchItem> {
    alt((reference, element.map(LaunchItem::Element))).parse_next(input)
}

fn reference(input: &mut &str) -> WResult<LaunchItem> {
    let (element, _, pad) = (identifier, '.', opt(identifier)).parse_next(input)?;
    Ok(LaunchItem::Reference {
        element: element.to_string(),
        pad: pad.map(str::to_string),
    })
}

fn element(input: &mut &str) -> WResult<ParsedElement> {
    let factory = identifier.parse_next(input)?;
    let properties = repeat(0.., property).parse_next(input)?;
    Ok(ParsedElement {
        factory: factory.to_string(),
        properties,
    })
}

fn identifier<'a>(input: &mut &'a str) -> WResult<&'a str> {
    (
        alt((alpha1::<_, ContextError>, "_")),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .parse_next(input)
}

/// `key=value`, preceded by whitespace. Backtracks without consuming when
/// the next word is not a property, so it can start the next chain.
fn property(input: &mut &str) -> WResult<(String, PropertyValue)> {
    let checkpoint = *input;
    let parsed = (multispace1, identifier, multispace0, '=', multispace0, property_value)
        .map(|(_, key, _, _, _, value)| (key.to_string(), value))
        .parse_next(input);
    if parsed.is_err() {
        *input = checkpoint;
    }
    parsed
}

fn property_value(input: &mut &str) -> WResult<PropertyValue> {
    alt((
        quoted_string.map(PropertyValue::String),
        terminated_word(boolean).map(PropertyValue::Bool),
        terminated_word(float).map(PropertyValue::Float),
        terminated_word(integer).map(PropertyValue::Integer),
        bare_string.map(PropertyValue::String),
    ))
    .parse_next(input)
}

/// Accept `parser` only if it consumed a whole word, so `3rd` stays a
/// string and `truest` is not a boolean.
fn terminated_word<'a, O>(
    mut parser: impl Parser<&'a str, O, ContextError>,
) -> impl Parser<&'a str, O, ContextError> {
    move |input: &mut &'a str| -> WResult<O> {
        let checkpoint = *input;
        let value = parser.parse_next(input)?;
        match input.chars().next() {
            Some(c) if !c.is_whitespace() && c != '!' => {
                *input = checkpoint;
                Err(ContextError::new())
            }
            _ => Ok(value),
        }
    }
}

fn quoted_string(input: &mut &str) -> WResult<String> {
    alt((
        delimited('"', take_till(0.., '"'), '"'),
        delimited('\'', take_till(0.., '\''), '\''),
    ))
    .map(str::to_string)
    .parse_next(input)
}

fn boolean(input: &mut &str) -> WResult<bool> {
    alt(("true".value(true), "false".value(false))).parse_next(input)
}

fn integer(input: &mut &str) -> WResult<i64> {
    (opt('-'), digit1)
        .take()
        .try_map(str::parse::<i64>)
        .parse_next(input)
}

fn float(input: &mut &str) -> WResult<f64> {
    (opt('-'), digit1, '.', digit1)
        .take()
        .try_map(str::parse::<f64>)
        .parse_next(input)
}

fn bare_string(input: &mut &str) -> WResult<String> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '!')
        .map(str::to_string)
        .parse_next(input)
}
