use std::path::Path;
use std::sync::Arc;

use hauler_core::error::AppError;
use hauler_core::traits::Transform;
use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, RcIter};
use jaq_json::Val;
use serde_json::Value;

/// jq transform backed by jaq.
///
/// The script is compiled once in [`JqTransform::new`] so a bad script is
/// rejected at startup. Compiled filters are not thread-safe, so each
/// [`apply`](Transform::apply) recompiles from the stored text.
#[derive(Debug, Clone)]
pub struct JqTransform {
    script: Arc<str>,
}

impl JqTransform {
    pub fn new(script: &str) -> Result<Self, AppError> {
        evaluate(script, None)?;
        Ok(Self {
            script: Arc::from(script),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let script = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read jq script {}: {e}", path.display()))
        })?;
        Self::new(&script)
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}

impl Transform for JqTransform {
    fn apply(&self, input: &Value) -> Result<Option<Value>, AppError> {
        evaluate(&self.script, Some(input))
    }
}

/// Compile `script` and, given an input, run it and return the first
/// output. With no input only compilation is checked.
fn evaluate(script: &str, input: Option<&Value>) -> Result<Option<Value>, AppError> {
    let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let arena = Arena::default();
    let program = File {
        code: script,
        path: (),
    };

    let modules = loader.load(&arena, program).map_err(|errs| {
        AppError::TransformError(format!("jq script has {} parse error(s)", errs.len()))
    })?;

    let filter = Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
        .map_err(|errs| {
            let undefined: Vec<&str> = errs
                .iter()
                .flat_map(|(_, names)| names.iter().map(|(name, _)| *name))
                .collect();
            AppError::TransformError(format!("jq script uses undefined {}", undefined.join(", ")))
        })?;

    let Some(input) = input else {
        return Ok(None);
    };

    let inputs = RcIter::new(core::iter::empty());
    let mut out = filter.run((Ctx::new([], &inputs), Val::from(input.clone())));

    match out.next() {
        None => Ok(None),
        Some(Ok(val)) => Ok(Some(Value::from(val))),
        Some(Err(e)) => Err(AppError::TransformError(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ITEMS: &str = ".response_body | fromjson | .items";

    #[test]
    fn test_extracts_items_from_embedded_json() {
        let jq = JqTransform::new(ITEMS).unwrap();

        let full = json!({"response_body": "{\"items\": [1,2,3]}"});
        assert_eq!(jq.apply(&full).unwrap(), Some(json!([1, 2, 3])));

        let empty = json!({"response_body": "{\"items\": []}"});
        assert_eq!(jq.apply(&empty).unwrap(), Some(json!([])));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let jq = JqTransform::new("{title: .name, tags: [.tags[] | ascii_upcase]}").unwrap();
        let input = json!({"name": "Aspirin", "tags": ["otc", "pain"]});

        let first = jq.apply(&input).unwrap();
        let second = jq.apply(&input).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Some(json!({"title": "Aspirin", "tags": ["OTC", "PAIN"]})));
    }

    #[test]
    fn test_empty_output_is_none() {
        let jq = JqTransform::new("empty").unwrap();
        assert_eq!(jq.apply(&json!({"a": 1})).unwrap(), None);

        let jq = JqTransform::new(".[]").unwrap();
        assert_eq!(jq.apply(&json!([])).unwrap(), None);
    }

    #[test]
    fn test_invalid_script_rejected_at_construction() {
        assert!(matches!(
            JqTransform::new(".items | ]["),
            Err(AppError::TransformError(_))
        ));
        let err = JqTransform::new("no_such_function(1)").unwrap_err();
        assert!(err.to_string().contains("no_such_function"));
    }

    #[test]
    fn test_runtime_error_is_transform_error() {
        let jq = JqTransform::new(".response_body | fromjson").unwrap();
        let err = jq.apply(&json!({"response_body": "not json"})).unwrap_err();
        assert!(matches!(err, AppError::TransformError(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jq");
        std::fs::write(&path, ITEMS).unwrap();

        let jq = JqTransform::from_file(&path).unwrap();
        assert_eq!(jq.script(), ITEMS);
        assert!(JqTransform::from_file(&dir.path().join("missing.jq")).is_err());
    }
}
