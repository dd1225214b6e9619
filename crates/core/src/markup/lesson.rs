//! Parser for `<lesson><unit type=".." name="..">instructions</unit></lesson>`.

use super::scanner::{Scanner, Tag, decode_entities};
use crate::error::MarkupParseError;
use crate::unit::{LessonPlanUnit, UnitType};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One `<unit>` declaration with a recognised type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUnit {
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    /// Display name; falls back to the type's label when the tag has none.
    pub name: String,
    pub instructions: String,
}

impl From<ParsedUnit> for LessonPlanUnit {
    fn from(unit: ParsedUnit) -> Self {
        LessonPlanUnit::new(unit.unit_type, unit.instructions)
    }
}

/// A `<unit>` whose opening tag has been seen but not yet its end.
struct OpenUnit {
    tag: Tag,
    position: usize,
}

/// Parses the unit list of a lesson from a raw model reply.
///
/// Prose or code fences around the `<lesson>` element are ignored. Units
/// with a missing or unknown `type` are skipped with a warning. Fails when
/// there is no `<lesson>` element or when no valid unit remains.
pub fn parse_lesson_markup(text: &str) -> Result<Vec<ParsedUnit>, MarkupParseError> {
    let mut scanner = Scanner::new(text);
    let root = scanner
        .by_ref()
        .find(|tag| tag.opens("lesson"))
        .ok_or(MarkupParseError::MissingRoot { root: "lesson" })?;

    let mut units = Vec::new();
    let mut seen = 0;
    let mut open: Option<OpenUnit> = None;

    if !root.is_self_closing() {
        for tag in scanner {
            if tag.opens("unit") {
                // A new unit implicitly closes one left open.
                if let Some(prev) = open.take() {
                    finish_unit(text, prev, tag.start, &mut units);
                }
                seen += 1;
                if tag.is_self_closing() {
                    let end = tag.end;
                    finish_unit(text, OpenUnit { tag, position: seen }, end, &mut units);
                } else {
                    open = Some(OpenUnit { tag, position: seen });
                }
            } else if tag.closes("unit") {
                if let Some(prev) = open.take() {
                    finish_unit(text, prev, tag.start, &mut units);
                }
            } else if tag.closes("lesson") {
                if let Some(prev) = open.take() {
                    finish_unit(text, prev, tag.start, &mut units);
                }
                break;
            }
        }
    }

    // A reply cut off mid-unit still yields the text that arrived.
    if let Some(prev) = open.take() {
        finish_unit(text, prev, text.len(), &mut units);
    }

    if units.is_empty() {
        return Err(MarkupParseError::NoValidUnits);
    }
    Ok(units)
}

fn finish_unit(text: &str, open: OpenUnit, body_end: usize, units: &mut Vec<ParsedUnit>) {
    let OpenUnit { tag, position } = open;
    let raw_type = tag.attribute("type").unwrap_or_default();

    let Ok(unit_type) = raw_type.parse::<UnitType>() else {
        warn!(position, unit_type = %raw_type, "Skipping lesson unit with unknown type");
        return;
    };

    let body = text.get(tag.end.min(body_end)..body_end).unwrap_or_default();
    let name = tag
        .attribute("name")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(unit_type.label())
        .to_string();

    units.push(ParsedUnit {
        unit_type,
        name,
        instructions: decode_entities(body.trim()),
    });
}
