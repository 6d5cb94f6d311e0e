use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocktestError {
    #[error("docker command failed: {command}: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("port {port} is not published on {image}")]
    PortNotPublished { port: u16, image: String },

    #[error("unsupported protocol '{protocol}' published for port {port}")]
    UnsupportedProtocol { protocol: String, port: u16 },

    #[error("port {port} on {image} not ready after {secs:.1}s: {detail}", secs = .elapsed.as_secs_f64())]
    WaitTimeout {
        port: u16,
        image: String,
        elapsed: Duration,
        detail: String,
    },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DocktestError>;
