use std::fmt;

use crate::caps::Caps;
use crate::error::{Error, Result};

use super::PadDirection;

/// When pads of a template exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Created with the element.
    Always,
    /// Created by the element while streaming (demuxers).
    Sometimes,
    /// Created on application request (tee outputs).
    Request,
}

/// Description of the pads an element can have.
///
/// Name patterns of SOMETIMES and REQUEST templates may contain one `%u`
/// or `%d` placeholder, replaced by an index when a pad is created. ALWAYS
/// templates name exactly one pad and must be literal.
#[derive(Clone, PartialEq, Eq)]
pub struct PadTemplate {
    name_template: String,
    direction: PadDirection,
    presence: PadPresence,
    caps: Caps,
}

impl PadTemplate {
    /// Validate and create a template.
    pub fn new(
        name_template: impl Into<String>,
        direction: PadDirection,
        presence: PadPresence,
        caps: Caps,
    ) -> Result<Self> {
        let name_template = name_template.into();
        let placeholders = name_template.matches("%u").count() + name_template.matches("%d").count();
        let stray = name_template.matches('%').count() != placeholders;
        let reason = if name_template.is_empty() {
            Some("empty name")
        } else if stray || placeholders > 1 {
            Some("only a single %u or %d placeholder is allowed")
        } else if placeholders == 1 && presence == PadPresence::Always {
            Some("ALWAYS templates must have a literal name")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(Error::PadTemplate {
                template: name_template,
                reason: reason.to_string(),
            });
        }
        Ok(Self {
            name_template,
            direction,
            presence,
            caps,
        })
    }

    /// Name pattern.
    pub fn name_template(&self) -> &str {
        &self.name_template
    }

    /// Direction of created pads.
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    /// Availability.
    pub fn presence(&self) -> PadPresence {
        self.presence
    }

    /// Caps every pad of this template can handle.
    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    /// True if the pattern contains a placeholder.
    pub fn is_pattern(&self) -> bool {
        self.name_template.contains('%')
    }

    /// Pad name for instance `index`.
    pub fn instance_name(&self, index: u32) -> String {
        self.name_template
            .replace("%u", &index.to_string())
            .replace("%d", &index.to_string())
    }

    /// True if `name` could have been produced by this template.
    pub fn matches(&self, name: &str) -> bool {
        if !self.is_pattern() {
            return self.name_template == name;
        }
        let Some(at) = self.name_template.find('%') else {
            return false;
        };
        let prefix = &self.name_template[..at];
        let suffix = &self.name_template[at + 2..];
        name.len() > prefix.len() + suffix.len()
            && name.starts_with(prefix)
            && name.ends_with(suffix)
            && name[prefix.len()..name.len() - suffix.len()]
                .chars()
                .all(|c| c.is_ascii_digit() || c == '-')
    }
}

impl fmt::Debug for PadTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PadTemplate")
            .field("name", &self.name_template)
            .field("direction", &self.direction)
            .field("presence", &self.presence)
            .field("caps", &self.caps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_template_must_be_literal() {
        let err = PadTemplate::new("src_%u", PadDirection::Src, PadPresence::Always, Caps::new_any());
        assert!(matches!(err, Err(Error::PadTemplate { .. })));
        assert!(PadTemplate::new("src", PadDirection::Src, PadPresence::Always, Caps::new_any()).is_ok());
    }

    #[test]
    fn test_request_template_placeholders() {
        let tmpl =
            PadTemplate::new("src_%u", PadDirection::Src, PadPresence::Request, Caps::new_any()).unwrap();
        assert!(tmpl.is_pattern());
        assert_eq!(tmpl.instance_name(3), "src_3");
        assert!(tmpl.matches("src_12"));
        assert!(!tmpl.matches("src_"));
        assert!(!tmpl.matches("sink_1"));

        assert!(PadTemplate::new("a_%u_%u", PadDirection::Src, PadPresence::Request, Caps::new_any()).is_err());
        assert!(PadTemplate::new("a_%s", PadDirection::Src, PadPresence::Sometimes, Caps::new_any()).is_err());
        assert!(PadTemplate::new("", PadDirection::Sink, PadPresence::Always, Caps::new_any()).is_err());
    }
}
