use hyper::http;
use std::{fmt::Display, io};

#[derive(Debug)]
pub enum Error {
    EmptyMethod,
    EmptyPath,
    InvalidStatusCode(u16),
    DuplicateOption(&'static str),
    StartupTimeout,
    ShutdownTimeout,
    HyperError(hyper::Error),
    HttpError(http::Error),
    JsonError(serde_json::Error),
    XmlError(quick_xml::Error),
    IoError(io::Error),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::EmptyMethod => write!(f, "The interaction method must not be empty"),
            Error::EmptyPath => write!(f, "The interaction path must not be empty"),
            Error::InvalidStatusCode(code) => {
                write!(f, "{} is not a valid HTTP status code", code)
            }
            Error::DuplicateOption(name) => {
                write!(f, "The option '{}' was specified more than once", name)
            }
            Error::StartupTimeout => write!(f, "Timed out waiting for the stub server to start"),
            Error::ShutdownTimeout => {
                write!(f, "Timed out waiting for the stub server to shut down")
            }
            Error::HyperError(e) => write!(f, "Hyper error: {}", e),
            Error::HttpError(e) => write!(f, "Http error: {}", e),
            Error::JsonError(e) => write!(f, "Json serialization error: {}", e),
            Error::XmlError(e) => write!(f, "Xml serialization error: {}", e),
            Error::IoError(e) => write!(f, "IoError: {}", e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Self {
        Error::HyperError(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::HttpError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::JsonError(e)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::XmlError(e)
    }
}
