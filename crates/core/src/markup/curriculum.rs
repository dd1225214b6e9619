//! Parser for `<curriculum><Month><Week><Lesson>` markup.
//!
//! Indices are handed out once, in document order, while scanning:
//! `week_index`/`lesson_index` restart in every parent, the `global_*`
//! counters run across the whole curriculum.

use super::scanner::{Scanner, Tag, decode_entities};
use crate::curriculum::{Curriculum, CurriculumLesson, CurriculumMonth, CurriculumWeek};
use crate::error::MarkupParseError;
use tracing::warn;

#[derive(Default)]
struct Counters {
    global_week: usize,
    global_lesson: usize,
}

struct Builder<'a> {
    text: &'a str,
    months: Vec<CurriculumMonth>,
    month: Option<CurriculumMonth>,
    week: Option<CurriculumWeek>,
    /// Opening `<Lesson>` tag awaiting its end tag.
    lesson: Option<Tag>,
    counters: Counters,
}

impl<'a> Builder<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            months: Vec::new(),
            month: None,
            week: None,
            lesson: None,
            counters: Counters::default(),
        }
    }

    fn start_month(&mut self, tag: &Tag) {
        self.finish_month(tag.start);
        self.month = Some(CurriculumMonth {
            month_index: self.months.len(),
            name: attribute(tag, "name"),
            description: attribute(tag, "description"),
            weeks: Vec::new(),
        });
    }

    fn start_week(&mut self, tag: &Tag) {
        self.finish_week(tag.start);
        let Some(month) = &self.month else {
            warn!(week = %attribute(tag, "name"), "Skipping curriculum week outside any month");
            return;
        };
        self.week = Some(CurriculumWeek {
            week_index: month.weeks.len(),
            global_week_index: self.counters.global_week,
            name: attribute(tag, "name"),
            description: attribute(tag, "description"),
            lessons: Vec::new(),
        });
        self.counters.global_week += 1;
    }

    fn start_lesson(&mut self, tag: Tag) {
        self.finish_lesson(tag.start);
        if self.week.is_none() {
            warn!(lesson = %attribute(&tag, "name"), "Skipping curriculum lesson outside any week");
            return;
        }
        if tag.is_self_closing() {
            let end = tag.end;
            self.lesson = Some(tag);
            self.finish_lesson(end);
        } else {
            self.lesson = Some(tag);
        }
    }

    fn finish_lesson(&mut self, body_end: usize) {
        let (Some(tag), Some(week)) = (self.lesson.take(), self.week.as_mut()) else {
            return;
        };
        let body = self
            .text
            .get(tag.end.min(body_end)..body_end)
            .unwrap_or_default();
        week.lessons.push(CurriculumLesson {
            lesson_index: week.lessons.len(),
            global_lesson_index: self.counters.global_lesson,
            name: attribute(&tag, "name"),
            description: decode_entities(body.trim()),
        });
        self.counters.global_lesson += 1;
    }

    fn finish_week(&mut self, at: usize) {
        self.finish_lesson(at);
        if let (Some(week), Some(month)) = (self.week.take(), self.month.as_mut()) {
            month.weeks.push(week);
        }
    }

    fn finish_month(&mut self, at: usize) {
        self.finish_week(at);
        if let Some(month) = self.month.take() {
            self.months.push(month);
        }
    }
}

fn attribute(tag: &Tag, name: &str) -> String {
    tag.attribute(name).unwrap_or_default().trim().to_string()
}

/// Parses a curriculum from a raw model reply.
///
/// Text around the `<curriculum>` element is ignored, as are weeks outside
/// a month and lessons outside a week. Unclosed elements are closed by the
/// next sibling or ancestor. Fails when there is no `<curriculum>` element
/// or it contains no month.
pub fn parse_curriculum_markup(text: &str) -> Result<Curriculum, MarkupParseError> {
    let mut scanner = Scanner::new(text);
    let root = scanner
        .by_ref()
        .find(|tag| tag.opens("curriculum"))
        .ok_or(MarkupParseError::MissingRoot { root: "curriculum" })?;

    let mut builder = Builder::new(text);
    if !root.is_self_closing() {
        for tag in scanner {
            if tag.opens("month") {
                builder.start_month(&tag);
                if tag.is_self_closing() {
                    builder.finish_month(tag.end);
                }
            } else if tag.opens("week") {
                builder.start_week(&tag);
                if tag.is_self_closing() {
                    builder.finish_week(tag.end);
                }
            } else if tag.opens("lesson") {
                builder.start_lesson(tag);
            } else if tag.closes("lesson") {
                builder.finish_lesson(tag.start);
            } else if tag.closes("week") {
                builder.finish_week(tag.start);
            } else if tag.closes("month") {
                builder.finish_month(tag.start);
            } else if tag.closes("curriculum") {
                builder.finish_month(tag.start);
                break;
            }
        }
    }
    builder.finish_month(text.len());

    if builder.months.is_empty() {
        return Err(MarkupParseError::NoMonths);
    }
    Ok(Curriculum {
        months: builder.months,
    })
}
