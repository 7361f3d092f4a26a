//! Model loading: the `load_model(path)` boundary.

use crate::model::{Model, ModelError};
use std::fs;
use std::path::Path;

/// Parse and validate a model from JSON text.
pub fn parse_model(text: &str) -> Result<Model, ModelError> {
    let model: Model = serde_json::from_str(text).map_err(|e| ModelError::Malformed {
        message: e.to_string(),
        line: e.line(),
        column: e.column(),
    })?;
    model.validate()?;
    Ok(model)
}

/// Load a compiled model from disk. Fatal on any failure: a model that
/// does not load is surfaced immediately, never retried.
pub fn load_model(path: impl AsRef<Path>) -> Result<Model, ModelError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_model(&text)
}
