//! Minijinja rendering of target action params.
//!
//! Param values may embed expressions over the [`DispatchContext`], e.g.
//! `"Pollen is {{ trigger.matchedValue | lower }}"`. Templates are arbitrary
//! strings (not pre-registered), so a fresh [`minijinja::Environment`] is
//! created per render call.

use ifthen_core::{ActionParam, TargetAgentAction};

use crate::traits::{target_env_var, DispatchContext, TargetError};

/// Renders param templates using minijinja.
#[derive(Debug)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Build a configured minijinja environment with custom filters and globals.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env.add_function("env", env_function);
        env
    }

    /// Render a template string with the given context.
    pub fn render(&self, template_str: &str, ctx: &DispatchContext) -> Result<String, TargetError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| TargetError::Template(e.to_string()))
    }

    /// Validate that a template string parses without errors.
    pub fn validate(&self, template_str: &str) -> Result<(), TargetError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| TargetError::Template(e.to_string()))?;
        Ok(())
    }

    /// Render every templated param of `action`, keeping order.
    ///
    /// Plain values are copied through untouched.
    pub fn resolve_action(
        &self,
        action: &TargetAgentAction,
        ctx: &DispatchContext,
    ) -> Result<TargetAgentAction, TargetError> {
        let mut params = Vec::with_capacity(action.params.len());
        for param in &action.params {
            let value = if is_template(&param.value) {
                self.render(&param.value, ctx).map_err(|e| {
                    TargetError::Template(format!("param '{}': {e}", param.key))
                })?
            } else {
                param.value.clone()
            };
            params.push(ActionParam {
                key: param.key.clone(),
                value,
            });
        }
        Ok(TargetAgentAction {
            action_type: action.action_type.clone(),
            params,
        })
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_template(value: &str) -> bool {
    value.contains("{{") || value.contains("{%")
}

/// Custom filter: round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// Global function: read an `IFTHEN_TARGET_*` environment variable.
///
/// Unset or non-allowlisted names render as an empty string.
fn env_function(name: String) -> String {
    match target_env_var(&name) {
        Ok(val) => val,
        Err(e) => {
            tracing::warn!(var = %name, error = %e, "env() lookup refused, rendering empty string");
            String::new()
        }
    }
}
