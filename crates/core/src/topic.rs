use crate::unit::{LessonPlanUnit, UnitType};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reply of the topic breakdown stage: one instruction per section, in
/// teaching order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TopicBreakdown {
    pub sections: Vec<String>,
}

impl TopicBreakdown {
    /// Drops blank entries; the model occasionally pads the list.
    pub fn into_instructions(self) -> Vec<String> {
        self.sections
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Reply of the section (or flat) generation stage: the ordered unit plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SectionPlan {
    pub units: Vec<LessonPlanUnit>,
}

impl SectionPlan {
    /// One line per plan, used for `{{unit_list}}` and redo avoid blocks.
    pub fn outline(units: &[LessonPlanUnit]) -> String {
        units
            .iter()
            .enumerate()
            .map(|(i, unit)| format!("{}. [{}] {}", i + 1, unit.unit_type, unit.instructions))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Counts plans per type, in catalogue order.
    pub fn type_counts(&self) -> Vec<(UnitType, usize)> {
        UnitType::ALL
            .iter()
            .map(|t| (*t, self.units.iter().filter(|u| u.unit_type == *t).count()))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}
