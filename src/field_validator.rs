//! Field Validator - Keeps Hallucinated Fields Out of Queries
//!
//! Every field, filter and sort a model proposes is checked against the live
//! lexicon of the current explore before it reaches the query service.
//! Filter expressions are additionally checked against the grammar of the
//! field's type. Anything that fails is dropped with a warning; validation
//! never fails a turn.

use crate::query::ExploreParams;
use crate::semantic::{FieldType, SemanticModel};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

const UNIT: &str = r"(?:second|minute|hour|day|week|month|quarter|fiscal quarter|year|fiscal year)s?";
const NUM: &str = r"-?(?:\d+(?:\.\d*)?|\.\d+)";

lazy_static! {
    static ref NUMBER_NULL: Regex = Regex::new(r"^(?:not\s+)?null$").expect("static regex");
    static ref NUMBER_COMPARISON: Regex =
        Regex::new(&format!(r"^(?:not\s+)?(?:>=|<=|!=|<>|>|<|=)?\s*{NUM}$"))
            .expect("static regex");
    static ref NUMBER_INTERVAL: Regex = Regex::new(&format!(
        r"^(?:not\s+)?[\[\(]\s*(?:{NUM}|-inf)?\s*,\s*(?:{NUM}|inf)?\s*[\]\)]$"
    ))
    .expect("static regex");
    static ref NUMBER_RANGE: Regex = Regex::new(&format!(r"^{NUM}\s+to\s+{NUM}$"))
        .expect("static regex");
    static ref BOOLEAN_JOIN: Regex = Regex::new(r"(?i)\s+(?:and|or)\s+").expect("static regex");

    static ref DATE_NULL: Regex = Regex::new(r"^(?:not\s+)?null$").expect("static regex");
    static ref DATE_ABSOLUTE: Regex = Regex::new(
        r"^\d{4}(?:[-/]\d{1,2}(?:[-/]\d{1,2}(?:\s+\d{1,2}:\d{2}(?::\d{2})?)?)?)?$"
    )
    .expect("static regex");
    static ref DATE_DAY_WORD: Regex = Regex::new(r"^(?:now|today|yesterday|tomorrow)$")
        .expect("static regex");
    static ref DATE_PERIOD: Regex = Regex::new(&format!(r"^(?:this|last|next)\s+{UNIT}$"))
        .expect("static regex");
    static ref DATE_OFFSET: Regex = Regex::new(&format!(r"^\d+\s+{UNIT}\s+(?:ago|from now)$"))
        .expect("static regex");
    static ref DATE_DURATION: Regex = Regex::new(&format!(r"^(?:(?:last|next)\s+)?\d+\s+{UNIT}$"))
        .expect("static regex");
    static ref YESNO: Regex = Regex::new(r"^(?:yes|no)$").expect("static regex");
}

/// True iff `name` belongs to the explore's dimension + measure name set.
pub fn is_member(name: &str, lexicon: &HashSet<String>) -> bool {
    lexicon.contains(name)
}

/// True iff `expression` is a legal filter for a field of `field_type`.
///
/// Commas separate alternatives (logical OR); every alternative must be legal.
pub fn is_filter_valid(field_type: FieldType, expression: &str) -> bool {
    let expression = expression.trim();
    if expression.is_empty() {
        return false;
    }
    match field_type {
        FieldType::String => split_string_terms(expression)
            .iter()
            .all(|t| !t.trim().is_empty()),
        FieldType::Number => split_terms(expression).iter().all(|t| is_number_term(t)),
        FieldType::Date => split_terms(expression).iter().all(|t| is_date_term(t)),
        FieldType::YesNo => YESNO.is_match(&normalize(expression)),
        FieldType::Unknown => false,
    }
}

/// Split on commas that are neither escaped with `^` nor inside an interval.
fn split_terms(expression: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for c in expression.chars() {
        match c {
            '[' | '(' => {
                depth += 1;
                current.push(c);
            }
            ']' | ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth <= 0 => terms.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    terms.push(current);
    terms
}

fn split_string_terms(expression: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in expression.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '^' {
            current.push(c);
            escaped = true;
        } else if c == ',' {
            terms.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    terms.push(current);
    terms
}

fn normalize(term: &str) -> String {
    term.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn is_number_term(term: &str) -> bool {
    let term = normalize(term);
    if term.is_empty() {
        return false;
    }
    BOOLEAN_JOIN.split(&term).all(|part| {
        let part = part.trim();
        NUMBER_NULL.is_match(part)
            || NUMBER_COMPARISON.is_match(part)
            || NUMBER_INTERVAL.is_match(part)
            || NUMBER_RANGE.is_match(part)
    })
}

fn is_date_term(term: &str) -> bool {
    let term = normalize(term);
    if term.is_empty() {
        return false;
    }
    if DATE_NULL.is_match(&term) {
        return true;
    }
    for prefix in ["on or after ", "on or before ", "before ", "after "] {
        if let Some(rest) = term.strip_prefix(prefix) {
            return is_date_point(rest);
        }
    }
    if let Some((start, end)) = term.split_once(" to ") {
        return is_date_point(start) && is_date_point(end);
    }
    if let Some((start, span)) = term.rsplit_once(" for ") {
        return is_date_point(start) && DATE_DURATION.is_match(span);
    }
    is_date_point(&term) || DATE_DURATION.is_match(&term)
}

fn is_date_point(term: &str) -> bool {
    let term = term.trim();
    DATE_ABSOLUTE.is_match(term)
        || DATE_DAY_WORD.is_match(term)
        || DATE_PERIOD.is_match(term)
        || DATE_OFFSET.is_match(term)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A parsed `"field"` or `"field direction"` sort token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortToken {
    pub field: String,
    pub direction: SortDirection,
}

impl SortToken {
    pub fn to_token(&self) -> String {
        match self.direction {
            SortDirection::Asc => self.field.clone(),
            SortDirection::Desc => format!("{} desc", self.field),
        }
    }
}

/// Parse a sort token; direction defaults to ascending.
pub fn parse_sort(token: &str) -> Option<SortToken> {
    let mut parts = token.split_whitespace();
    let field = parts.next()?.to_string();
    let direction = match parts.next().map(str::to_ascii_lowercase).as_deref() {
        None | Some("asc") => SortDirection::Asc,
        Some("desc") => SortDirection::Desc,
        Some(_) => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(SortToken { field, direction })
}

/// True iff the field portion of `token` is in the lexicon.
pub fn is_sort_valid(token: &str, lexicon: &HashSet<String>) -> bool {
    parse_sort(token)
        .map(|s| is_member(&s.field, lexicon))
        .unwrap_or(false)
}

/// One filter proposed by the filter-extraction stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCandidate {
    pub field_id: String,
    pub filter_expression: String,
}

impl FilterCandidate {
    pub fn new(field_id: impl Into<String>, filter_expression: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            filter_expression: filter_expression.into(),
        }
    }

    /// Read candidates out of parsed model output. Anything that is not an
    /// array of `{field_id, filter_expression}` string pairs is skipped.
    pub fn from_model_value(value: &Value) -> Vec<Self> {
        let items = match value {
            Value::Array(items) => items.as_slice(),
            _ => return Vec::new(),
        };
        items
            .iter()
            .filter_map(|item| {
                let field_id = item.get("field_id")?.as_str()?;
                let expression = item.get("filter_expression")?.as_str()?;
                Some(Self::new(field_id, expression))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn drop(&mut self, message: String) {
        warn!("{}", message);
        self.is_valid = false;
        self.warnings.push(message);
    }
}

/// Validates model-proposed query parts against one explore's semantic model.
pub struct ExploreValidator<'a> {
    model: &'a SemanticModel,
    lexicon: HashSet<String>,
}

impl<'a> ExploreValidator<'a> {
    pub fn new(model: &'a SemanticModel) -> Self {
        Self {
            model,
            lexicon: model.field_names(),
        }
    }

    pub fn lexicon(&self) -> &HashSet<String> {
        &self.lexicon
    }

    fn filter_ok(&self, field_id: &str, expression: &str) -> Result<(), String> {
        let field = self
            .model
            .field(field_id)
            .ok_or_else(|| format!("Invalid field: {}", field_id))?;
        if !is_filter_valid(field.filter_class(), expression) {
            return Err(format!(
                "Invalid filter expression for field {}: {}",
                field_id, expression
            ));
        }
        Ok(())
    }

    /// Keep the valid candidates, grouped by field in proposal order.
    pub fn validate_filters(
        &self,
        candidates: &[FilterCandidate],
    ) -> (BTreeMap<String, Vec<String>>, ValidationResult) {
        let mut result = ValidationResult {
            is_valid: true,
            ..Default::default()
        };
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for candidate in candidates {
            match self.filter_ok(&candidate.field_id, &candidate.filter_expression) {
                Ok(()) => grouped
                    .entry(candidate.field_id.clone())
                    .or_default()
                    .push(candidate.filter_expression.trim().to_string()),
                Err(message) => result.drop(message),
            }
        }
        debug!("Kept filters on {} fields", grouped.len());
        (grouped, result)
    }

    /// Drop every field, filter, sort, pivot and fill field outside the lexicon.
    pub fn validate(&self, params: ExploreParams) -> (ExploreParams, ValidationResult) {
        let mut result = ValidationResult {
            is_valid: true,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut fields = Vec::new();
        for field in params.fields {
            if !is_member(&field, &self.lexicon) {
                result.drop(format!("Dropped unknown field: {}", field));
            } else if seen.insert(field.clone()) {
                fields.push(field);
            }
        }

        let mut filters = BTreeMap::new();
        for (field, expression) in params.filters {
            match self.filter_ok(&field, &expression) {
                Ok(()) => {
                    filters.insert(field, expression);
                }
                Err(message) => result.drop(message),
            }
        }

        let mut sorts = Vec::new();
        for token in params.sorts {
            match parse_sort(&token) {
                Some(sort) if is_member(&sort.field, &self.lexicon) => sorts.push(sort.to_token()),
                _ => result.drop(format!("Dropped invalid sort: {}", token)),
            }
        }

        let pivots = self.retain_members(params.pivots, "pivot", &mut result);
        let fill_fields = self.retain_members(params.fill_fields, "fill field", &mut result);

        let validated = ExploreParams {
            fields,
            filters,
            sorts,
            pivots,
            fill_fields,
            ..params
        };
        (validated, result)
    }

    fn retain_members(
        &self,
        names: Vec<String>,
        kind: &str,
        result: &mut ValidationResult,
    ) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| {
                let ok = is_member(name, &self.lexicon);
                if !ok {
                    result.drop(format!("Dropped unknown {}: {}", kind, name));
                }
                ok
            })
            .collect()
    }
}
