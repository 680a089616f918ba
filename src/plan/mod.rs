//! Query plans: parameterized statements ready for the store
//!
//! A plan's SQL text holds only schema identifiers and `?` placeholders;
//! user-derived values live in `bound_parameters`, in placeholder order.

pub mod compiler;

pub use compiler::{CompiledPlans, CompilerExplanation, PlanCompiler};

use crate::error::PlanCompilationError;
use crate::intent::IntentType;
use crate::store::Scalar;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryPlan {
    plan_id: String,
    target_table: String,
    sql_template: String,
    bound_parameters: Vec<Scalar>,

    /// What this plan is about when one intent fans out (an entity, a metric pair)
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    intent_type: Option<IntentType>,
}

impl QueryPlan {
    /// Build a plan, checking placeholder and parameter counts agree
    pub fn new(
        plan_id: impl Into<String>,
        target_table: impl Into<String>,
        sql_template: impl Into<String>,
        bound_parameters: Vec<Scalar>,
    ) -> Result<Self, PlanCompilationError> {
        let plan_id = plan_id.into();
        let sql_template = sql_template.into();
        let placeholders = count_placeholders(&sql_template);
        if placeholders != bound_parameters.len() {
            return Err(PlanCompilationError::ParameterMismatch {
                plan_id,
                placeholders,
                parameters: bound_parameters.len(),
            });
        }

        Ok(Self {
            plan_id,
            target_table: target_table.into(),
            sql_template,
            bound_parameters,
            subject: None,
            intent_type: None,
        })
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn for_intent(mut self, intent_type: IntentType) -> Self {
        self.intent_type = Some(intent_type);
        self
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    pub fn sql_template(&self) -> &str {
        &self.sql_template
    }

    pub fn bound_parameters(&self) -> &[Scalar] {
        &self.bound_parameters
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn intent_type(&self) -> Option<IntentType> {
        self.intent_type
    }
}

/// Quote an identifier for SQLite, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Count `?` placeholders outside string literals, quoted identifiers and comments
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                // Doubled quote characters inside are escapes; skipping to the
                // next quote and re-entering handles them
                for inner in chars.by_ref() {
                    if inner == c {
                        break;
                    }
                }
            }
            '[' => {
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            '?' => count += 1,
            _ => {}
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_placeholders_skips_quoted_text() {
        assert_eq!(count_placeholders("SELECT 1"), 0);
        assert_eq!(count_placeholders(r#"SELECT "a?" FROM t WHERE x IN (?, ?)"#), 2);
        assert_eq!(count_placeholders("SELECT 'why?' WHERE y = ? -- really?\n AND z = ?"), 2);
        assert_eq!(count_placeholders("SELECT /* ? */ ? FROM [we?ird]"), 1);
        assert_eq!(count_placeholders("SELECT 'it''s?' , ?"), 1);
    }

    #[test]
    fn test_new_rejects_mismatched_parameters() {
        let err = QueryPlan::new("p1", "crop_yield", "SELECT ? + ?", vec![Scalar::Integer(1)]).unwrap_err();
        assert_eq!(
            err,
            PlanCompilationError::ParameterMismatch {
                plan_id: "p1".to_string(),
                placeholders: 2,
                parameters: 1,
            }
        );
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("Crop_Year"), r#""Crop_Year""#);
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }

    #[test]
    fn test_plan_serializes_without_empty_subject() {
        let plan = QueryPlan::new("p1", "crop_yield", "SELECT ?", vec![Scalar::text("Rice")]).unwrap();
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["bound_parameters"], serde_json::json!(["Rice"]));
        assert!(json.get("subject").is_none());
    }
}
