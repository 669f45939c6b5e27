//! Template and expression evaluation.
//!
//! Input templates, transform expressions and edge conditions all use
//! minijinja syntax. Contexts are plain JSON values.
//!
//! Templates and expressions are strict: referencing an undefined variable is
//! an error. Conditions are chainable, so `output.flag` on a missing field is
//! simply false.

use std::collections::HashSet;

use minijinja::{Environment, UndefinedBehavior, Value};

use crate::error::WorkflowError;

fn strict_env() -> Environment<'static> {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Strict);
  env
}

fn expression_error(source: &str, err: minijinja::Error) -> WorkflowError {
  WorkflowError::Expression {
    source_text: source.to_string(),
    message: err.to_string(),
  }
}

fn to_json(source: &str, value: Value) -> Result<serde_json::Value, WorkflowError> {
  serde_json::to_value(&value).map_err(|e| WorkflowError::Expression {
    source_text: source.to_string(),
    message: format!("result is not representable as JSON: {}", e),
  })
}

/// Check if a string is a pure template expression (just `{{ expr }}`).
pub fn is_pure_template(s: &str) -> bool {
  let trimmed = s.trim();
  trimmed.starts_with("{{")
    && trimmed.ends_with("}}")
    && trimmed.matches("{{").count() == 1
    && trimmed.matches("}}").count() == 1
}

/// The expression inside a pure template, without `{{-`/`-}}` whitespace
/// control markers.
fn pure_expression(s: &str) -> &str {
  let trimmed = s.trim();
  let inner = &trimmed[2..trimmed.len() - 2];
  let inner = inner.strip_prefix('-').unwrap_or(inner);
  let inner = inner.strip_suffix('-').unwrap_or(inner);
  inner.trim()
}

/// Render a template to a string.
pub fn render_str(template: &str, ctx: &serde_json::Value) -> Result<String, WorkflowError> {
  strict_env()
    .render_str(template, Value::from_serialize(ctx))
    .map_err(|e| expression_error(template, e))
}

/// Render a template to a JSON value.
///
/// A pure `{{ expr }}` template is evaluated as an expression so that numbers,
/// booleans and objects keep their type. Anything else renders to a string.
pub fn render(template: &str, ctx: &serde_json::Value) -> Result<serde_json::Value, WorkflowError> {
  if is_pure_template(template) {
    return evaluate(pure_expression(template), ctx);
  }
  if template.contains("{{") || template.contains("{%") {
    return render_str(template, ctx).map(serde_json::Value::String);
  }
  Ok(serde_json::Value::String(template.to_string()))
}

/// Evaluate an expression such as `x * 2` or `items | length`.
pub fn evaluate(expression: &str, ctx: &serde_json::Value) -> Result<serde_json::Value, WorkflowError> {
  let env = strict_env();
  let compiled = env
    .compile_expression(expression)
    .map_err(|e| expression_error(expression, e))?;
  let value = compiled
    .eval(Value::from_serialize(ctx))
    .map_err(|e| expression_error(expression, e))?;
  to_json(expression, value)
}

/// Evaluate an expression for its truthiness.
pub fn evaluate_condition(expression: &str, ctx: &serde_json::Value) -> Result<bool, WorkflowError> {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Chainable);
  let compiled = env
    .compile_expression(expression)
    .map_err(|e| expression_error(expression, e))?;
  let value = compiled
    .eval(Value::from_serialize(ctx))
    .map_err(|e| expression_error(expression, e))?;
  Ok(value.is_true())
}

/// Compile an expression without evaluating it.
pub fn check_expression(expression: &str) -> Result<(), WorkflowError> {
  let env = Environment::new();
  env
    .compile_expression(expression)
    .map(|_| ())
    .map_err(|e| expression_error(expression, e))
}

/// Compile a template and return the top-level variables it reads.
pub fn template_variables(template: &str) -> Result<HashSet<String>, WorkflowError> {
  let env = Environment::new();
  let compiled = env
    .template_from_str(template)
    .map_err(|e| expression_error(template, e))?;
  Ok(compiled.undeclared_variables(false))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_pure_template_keeps_type() {
    let ctx = json!({ "count": 100, "user": { "name": "ada" } });

    assert_eq!(render("{{ count }}", &ctx).unwrap(), json!(100));
    assert_eq!(render("{{ count * 2 }}", &ctx).unwrap(), json!(200));
    assert_eq!(render("{{ user }}", &ctx).unwrap(), json!({ "name": "ada" }));
  }

  #[test]
  fn test_whitespace_control_keeps_unary_minus() {
    let ctx = json!({ "count": 5 });

    assert_eq!(render("{{ -count }}", &ctx).unwrap(), json!(-5));
    assert_eq!(render("{{- -count -}}", &ctx).unwrap(), json!(-5));
    assert_eq!(render("{{-count-}}", &ctx).unwrap(), json!(5));
    assert_eq!(render("{{ count - 1 -}}", &ctx).unwrap(), json!(4));
  }

  #[test]
  fn test_mixed_template_renders_string() {
    let ctx = json!({ "name": "john doe" });
    assert_eq!(
      render("Hello {{ name | title }}!", &ctx).unwrap(),
      json!("Hello John Doe!")
    );
    assert_eq!(render("static", &ctx).unwrap(), json!("static"));
  }

  #[test]
  fn test_strict_undefined() {
    let err = render("{{ missing }}", &json!({})).unwrap_err();
    assert!(err.to_string().contains("missing"));
  }

  #[test]
  fn test_condition_chainable() {
    let ctx = json!({ "output": { "score": 0.9 } });
    assert!(evaluate_condition("output.score > 0.5", &ctx).unwrap());
    assert!(!evaluate_condition("output.flag", &ctx).unwrap());
    assert!(!evaluate_condition("output.nested.flag", &ctx).unwrap());
  }

  #[test]
  fn test_check_expression() {
    assert!(check_expression("a and b").is_ok());
    assert!(check_expression("a and (").is_err());
  }

  #[test]
  fn test_template_variables() {
    let vars = template_variables("{{ topic }} by {{ nodes.a.content }}").unwrap();
    assert!(vars.contains("topic"));
    assert!(vars.contains("nodes"));
    assert_eq!(vars.len(), 2);
  }
}
