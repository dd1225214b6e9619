//! `{{name}}` placeholder substitution for prompt templates.

use std::collections::HashMap;

/// Values substituted into a template, keyed by placeholder name.
pub type TemplateVars = HashMap<&'static str, String>;

/// Replaces every `{{name}}` in `template` with the value bound to `name`.
///
/// Names missing from `vars` render as the empty string, so templates can
/// reference optional context blocks. Only word characters (`[A-Za-z0-9_]`)
/// form a name; anything else between braces is left untouched.
pub fn render_template(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        match after_open.find("}}") {
            Some(close) if is_placeholder_name(&after_open[..close]) => {
                let name = &after_open[..close];
                if let Some(value) = vars.get(name) {
                    out.push_str(value);
                }
                rest = &after_open[close + 2..];
            }
            _ => {
                out.push_str("{{");
                rest = after_open;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
