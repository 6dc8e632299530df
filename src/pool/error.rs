/// Pool error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The manager failed to build a new object.
    #[error(transparent)]
    Backend(anyhow::Error),
    #[error("Could not create a validated object")]
    Validation,
    #[error("The pool has been closed")]
    Closed,
}
