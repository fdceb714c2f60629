#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// Missing/invalid url or method. Reported immediately, never retried.
    #[error("invalid input: {0}")]
    Input(String),

    /// DNS/connection/timeout failure that survived the whole attempt budget.
    #[error("transport error after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    pub fn input(msg: impl Into<String>) -> Self {
        FetchError::Input(msg.into())
    }
}
