/// A named unit of work that runs until shutdown or an unrecoverable startup failure.
pub trait Runner {
    type Error: std::fmt::Display + Send;

    /// Human readable worker name used in logs.
    fn name(&self) -> &str;

    fn run(self) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send
    where
        Self: Sized;
}
