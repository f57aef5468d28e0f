//! Input-deck templating for file-driven solvers.

use std::path::Path;

use crate::error::{EvaluationFailure, Result};
use crate::space::ParamSet;

/// A solver input file whose top-level `name = value` variables are
/// substituted per trial.
///
/// Top-level variables are the assignments above the first `[Block]`
/// header, the convention MOOSE input files use for tunable geometry and
/// material constants. Substitution keeps indentation and trailing
/// `#` comments; the rest of the file is copied verbatim.
///
/// # Examples
///
/// ```
/// use sledo::backend::InputTemplate;
/// use sledo::space::{ParamSet, ParamValue};
///
/// let template = InputTemplate::new(
///     "width = 1.0 # mm\nn = 4\n\n[Mesh]\n  width = 99\n[]\n",
/// );
/// let params = ParamSet::from([("width".to_string(), ParamValue::Float(2.5))]);
/// let rendered = template.render(&params).unwrap();
///
/// assert!(rendered.starts_with("width = 2.5 # mm\nn = 4\n"));
/// assert!(rendered.contains("  width = 99\n"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputTemplate {
    text: String,
}

/// A parsed top-level assignment: byte range of the value within its line.
struct Assignment<'a> {
    name: &'a str,
    value_start: usize,
    value_end: usize,
}

fn parse_assignment(line: &str) -> Option<Assignment<'_>> {
    let code_end = line.find('#').unwrap_or(line.len());
    let (lhs, _) = line[..code_end].split_once('=')?;
    let name = lhs.trim();
    let is_ident = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/');
    if !is_ident {
        return None;
    }
    let after_eq = lhs.len() + 1;
    let value_region = &line[after_eq..code_end];
    let leading = value_region.len() - value_region.trim_start().len();
    let value_start = after_eq + leading;
    let value_end = after_eq + value_region.trim_end().len();
    Some(Assignment {
        name,
        value_start,
        value_end: value_end.max(value_start),
    })
}

fn is_block_header(line: &str) -> bool {
    line.trim_start().starts_with('[')
}

impl InputTemplate {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Reads a template from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(std::fs::read_to_string(path)?))
    }

    /// The raw template text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    fn top_level_lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines().take_while(|line| !is_block_header(line))
    }

    /// Top-level variables and their template values, in file order.
    #[must_use]
    pub fn variables(&self) -> Vec<(&str, &str)> {
        self.top_level_lines()
            .filter_map(|line| {
                parse_assignment(line).map(|a| (a.name, &line[a.value_start..a.value_end]))
            })
            .collect()
    }

    /// Substitutes every parameter into its top-level variable.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidParameters` failure naming any parameter that has
    /// no top-level variable in the template.
    pub fn render(&self, parameters: &ParamSet) -> core::result::Result<String, EvaluationFailure> {
        let known: Vec<&str> = self.variables().into_iter().map(|(name, _)| name).collect();
        let missing: Vec<&str> = parameters
            .keys()
            .map(String::as_str)
            .filter(|name| !known.contains(name))
            .collect();
        if !missing.is_empty() {
            return Err(EvaluationFailure::invalid_parameters(format!(
                "template has no top-level variable for: {}",
                missing.join(", ")
            )));
        }

        let mut out = String::with_capacity(self.text.len());
        let mut in_header = true;
        for line in self.text.split_inclusive('\n') {
            in_header = in_header && !is_block_header(line);
            let substitution = in_header
                .then(|| parse_assignment(line))
                .flatten()
                .and_then(|a| parameters.get(a.name).map(|v| (a, v)));
            match substitution {
                Some((a, value)) => {
                    out.push_str(&line[..a.value_start]);
                    out.push_str(&value.to_string());
                    out.push_str(&line[a.value_end..]);
                }
                None => out.push_str(line),
            }
        }
        Ok(out)
    }
}
