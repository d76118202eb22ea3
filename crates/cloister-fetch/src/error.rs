use std::{io, net::IpAddr};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("failed to resolve `{host}`: {source}")]
    Dns {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("`{host}` resolves to private address {ip}")]
    PrivateAddress { host: String, ip: IpAddr },

    #[error("response body is not JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("expected a URL string as the first argument")]
    InvalidArgument(#[source] Option<cloister::value::Error>),

    #[error("value conversion error: {0}")]
    Value(#[from] cloister::value::Error),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
