use crate::context::Context;
use crate::engine::Interpreter;
use crate::error::Result;
use crate::service::Rule;
use crate::value::is_truthy;
use tracing::debug;

impl Interpreter {
    /// First rule whose condition is absent or truthy.
    ///
    /// Conditions are evaluated in order and evaluation stops at the first
    /// match, so later conditions never run.
    pub fn resolve<'r>(&self, rules: &'r [Rule], ctx: &Context) -> Result<Option<&'r Rule>> {
        for (idx, rule) in rules.iter().enumerate() {
            let matched = match rule.condition() {
                None => true,
                Some(code) => is_truthy(&self.evaluator().evaluate_expression(code, ctx)?),
            };
            if matched {
                debug!(rule = idx, "rule matched");
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }
}
