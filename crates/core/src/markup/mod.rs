//! Parsers for the pseudo-XML the model emits when asked for a lesson
//! structure or a curriculum.

mod curriculum;
mod lesson;
pub mod scanner;

pub use curriculum::parse_curriculum_markup;
pub use lesson::{ParsedUnit, parse_lesson_markup};
