use thiserror::Error;

/// Main error type for the pacgate proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    /// PAC script execution failed
    #[error("PAC evaluation error: {message}")]
    Evaluation { message: String },

    /// The evaluator returned a directive outside the supported grammar
    #[error("unsupported proxy directive: {directive}")]
    UnsupportedDirective { directive: String },

    /// An upstream address could not be reached
    #[error("failed to dial {addr}: {message}")]
    Dial { addr: String, message: String },

    /// An upstream proxy answered a tunnel request with a non-success status
    #[error("proxy {proxy} rejected tunnel: {message}")]
    ProxyRejected { proxy: String, message: String },

    /// The PAC script could not be fetched
    #[error("failed to fetch PAC script: {message}")]
    PacFetch { message: String },

    /// Configuration related errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Malformed wire data on the proxy or SOCKS5 front door
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// IO related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Create a PAC evaluation error
    pub fn evaluation<S: Into<String>>(message: S) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Create an unsupported-directive error
    pub fn unsupported_directive<S: Into<String>>(directive: S) -> Self {
        Self::UnsupportedDirective {
            directive: directive.into(),
        }
    }

    /// Create a dial error
    pub fn dial<A: Into<String>, S: Into<String>>(addr: A, message: S) -> Self {
        Self::Dial {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Create a proxy-rejected error
    pub fn proxy_rejected<P: Into<String>, S: Into<String>>(proxy: P, message: S) -> Self {
        Self::ProxyRejected {
            proxy: proxy.into(),
            message: message.into(),
        }
    }

    /// Create a PAC fetch error
    pub fn pac_fetch<S: Into<String>>(message: S) -> Self {
        Self::PacFetch {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Result type alias using ProxyError
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProxyError::evaluation("script threw");
        assert_eq!(err.to_string(), "PAC evaluation error: script threw");

        let err = ProxyError::unsupported_directive("FTP gateway:21");
        assert!(err.to_string().contains("FTP gateway:21"));

        let err = ProxyError::proxy_rejected("10.0.0.1:8080", "HTTP/1.1 407");
        assert!(err.to_string().contains("10.0.0.1:8080"));
        assert!(err.to_string().contains("407"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: ProxyError = io_err.into();
        assert!(matches!(err, ProxyError::Io(_)));
    }
}
