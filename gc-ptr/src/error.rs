use thiserror::Error;

/// Returned when rooting a handle that does not point to an object.
#[derive(Debug, Error)]
#[error("Handle does not point to an object")]
pub struct DetachedError(());

impl DetachedError
{
    pub (crate) fn new() -> Self
    {
        Self(())
    }
}
