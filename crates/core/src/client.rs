/// A client that becomes usable only after connecting to its backing service.
///
/// `connect` consumes the unconnected value and hands back the connected one,
/// so a half-initialised client can never be used by accident.
pub trait Client {
    type Error;
    fn connect(self) -> impl std::future::Future<Output = Result<Self, Self::Error>> + Send
    where
        Self: Sized;
}
