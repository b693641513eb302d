// src/coordinator/callbacks.rs
//! Deep-dive callbacks: `CALLBACK:<kind>:<item_id>` from a card button
//! re-reads the stored item and runs a focused single-item LLM pass.

use crate::analyze::prompt;

/// The three deep-dive flavors bound to card buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    FactCheck,
    Synthesis,
    DeepDive,
}

impl CallbackKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chk" => Some(CallbackKind::FactCheck),
            "syn" => Some(CallbackKind::Synthesis),
            "div" => Some(CallbackKind::DeepDive),
            _ => None,
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            CallbackKind::FactCheck => prompt::FACT_CHECK_SYSTEM,
            CallbackKind::Synthesis => prompt::SYNTHESIS_SYSTEM,
            CallbackKind::DeepDive => prompt::DEEP_DIVE_SYSTEM,
        }
    }

    pub fn holding_text(self) -> &'static str {
        match self {
            CallbackKind::FactCheck => "Fact-checking, one moment…",
            CallbackKind::Synthesis => "Synthesizing, one moment…",
            CallbackKind::DeepDive => "Digging in, one moment…",
        }
    }
}

/// Split `CALLBACK:<kind>:<item_id>`. `None` for anything malformed, which
/// the router then treats as a user error.
pub fn parse_callback(text: &str) -> Option<(CallbackKind, &str)> {
    let rest = text.strip_prefix("CALLBACK:")?;
    let (kind, item_id) = rest.split_once(':')?;
    let kind = CallbackKind::parse(kind)?;
    if item_id.is_empty() {
        return None;
    }
    Some((kind, item_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_callbacks_parse() {
        assert_eq!(
            parse_callback("CALLBACK:chk:abc-123"),
            Some((CallbackKind::FactCheck, "abc-123"))
        );
        assert_eq!(
            parse_callback("CALLBACK:div:x"),
            Some((CallbackKind::DeepDive, "x"))
        );
    }

    #[test]
    fn malformed_callbacks_are_rejected() {
        assert!(parse_callback("CALLBACK:nope:abc").is_none());
        assert!(parse_callback("CALLBACK:chk:").is_none());
        assert!(parse_callback("CALLBACK:chk").is_none());
        assert!(parse_callback("not a callback").is_none());
    }
}
