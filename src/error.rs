#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("key is not excluded from cascade: {0}")]
    KeyNotExcluded(String),
    #[error("link not found")]
    LinkNotFound,
    #[error("cannot link object: expected {expected}")]
    TypeMismatch { expected: &'static str },
}
