use thiserror::Error;

/// Error kinds surfaced by the tunnel engine.
///
/// Per-datagram errors are logged and swallowed by the receiver/dispatcher
/// loops; only the variants documented on each component's operation ever
/// propagate synchronously to a caller.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("interface name `{0}` already registered")]
    DuplicateName(String),

    #[error("remote peer {0} already bound to an interface")]
    DuplicatePeer(std::net::SocketAddrV4),

    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("failed to bind socket to {0}: {1}")]
    BindError(std::net::SocketAddrV4, std::io::Error),

    #[error("could not create socket: {0}")]
    InvalidSocket(std::io::Error),

    #[error("send failed: {0}")]
    SendError(std::io::Error),

    #[error("receive failed: {0}")]
    ReceiveError(std::io::Error),

    #[error("codec error: {0}")]
    CodecError(String),

    #[error("key too short: need at least {need} bytes, got {got}")]
    KeyTooShort { need: usize, got: usize },

    #[error("cipher error: {0}")]
    CipherError(String),

    #[error("outbound queue congested")]
    Congested,

    #[error("packet slab pool exhausted")]
    PoolExhausted,

    #[error("out of memory")]
    OutOfMemory,

    #[error("interface `{0}` is down")]
    InterfaceDown(String),

    #[error("no such interface: {0}")]
    NoSuchInterface(String),

    #[error("operation would block")]
    WouldBlock,
}

pub type EngineResult<T> = Result<T, EngineError>;
