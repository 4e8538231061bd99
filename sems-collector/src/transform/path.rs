//! JMESPath lookups into a status snapshot, e.g. `inverter[0].d.vpv1` or
//! ``inverter[?sn=='58500MSU123X9876'] | [0].d.vpv1``.

use serde_json::Value;

/// Error for an expression that does not compile.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid field path `{path}`: {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: String,
}

/// Check that `path` is a valid JMESPath expression.
pub fn validate(path: &str) -> Result<(), PathError> {
    jmespath::compile(path).map(|_| ()).map_err(|e| PathError {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Evaluate `path` against `root`. Invalid expressions, evaluation errors and
/// `null` results all resolve to `None`.
pub fn resolve(root: &Value, path: &str) -> Option<Value> {
    let expr = jmespath::compile(path).ok()?;
    let found = expr.search(root).ok()?;
    match serde_json::to_value(&*found).ok()? {
        Value::Null => None,
        value => Some(value),
    }
}
