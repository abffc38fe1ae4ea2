/// Why a connection session ended or could not start.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("no pong within the read deadline")]
    ReadTimeout,
    #[error("write deadline exceeded")]
    WriteTimeout,
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },
}

/// Failures while attaching a new connection to the hub.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("secret store lookup failed: {0}")]
    SecretLookup(String),
    #[error(transparent)]
    Otp(#[from] parley_otp::OtpError),
    #[error(transparent)]
    Protocol(#[from] parley_protocol::ProtocolError),
    #[error("enrollment frame not delivered: {0}")]
    Enrollment(#[source] SessionError),
}
