use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start the BLE worker: {source}")]
    Worker { #[from] source: io::Error },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to connect: {source}")]
    Connect { #[from] source: ConnectError },

    #[error("Failed to scan: {source}")]
    Scan { #[from] source: TransportError },
}

/// Failures reported by the BLE stack underneath the session.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Error communicating with device (btleplug): {0}")]
    Btle(String),

    #[error("No peripheral is connected")]
    NotConnected,

    #[error("No peripheral with address {0} was found")]
    UnknownDevice(String),

    #[error("Handle {0} does not belong to the current connection")]
    UnknownHandle(u16),

    #[error("The transport operation took too long")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl From<btleplug::Error> for TransportError {
    fn from(source: btleplug::Error) -> Self {
        TransportError::Btle(source.to_string())
    }
}

/// Failures of the worker handoff itself, independent of the operation submitted.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("The session worker is shutting down")]
    SessionClosed,

    #[error("Timed out waiting for the session worker")]
    Timeout,

    #[error("The session worker dropped the operation")]
    WorkerGone,
}

#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    #[error("The peripheral exposes no GATT services")]
    NoServices,

    #[error("Service discovery failed: {0}")]
    Transport(TransportError),

    #[error("Service discovery took too long")]
    Timeout,
}

#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    #[error("Connecting took too long")]
    Timeout,

    #[error("Connecting failed: {0}")]
    Transport(TransportError),

    #[error("Connected, but {0}")]
    Discovery(DiscoveryError),

    #[error("The session is closed")]
    SessionClosed,
}

#[derive(Error, Debug, Clone)]
pub enum ReadError {
    #[error("Characteristic {0} is not part of the current session")]
    UnknownCharacteristic(String),

    #[error("Characteristic {0} does not support read")]
    NotReadable(String),

    #[error("Read failed: {0}")]
    Transport(TransportError),

    #[error("Read took too long")]
    Timeout,

    #[error("The session is closed")]
    SessionClosed,
}

#[derive(Error, Debug, Clone)]
pub enum WriteError {
    #[error("Characteristic {0} is not part of the current session")]
    UnknownCharacteristic(String),

    #[error("Characteristic {0} does not support write")]
    NotWritable(String),

    #[error("Write failed: {0}")]
    Transport(TransportError),

    #[error("Write took too long")]
    Timeout,

    #[error("The session is closed")]
    SessionClosed,
}

#[derive(Error, Debug, Clone)]
pub enum NotifyError {
    #[error("Characteristic {0} is not part of the current session")]
    UnknownCharacteristic(String),

    #[error("Characteristic {0} supports neither notify nor indicate")]
    NotNotifiable(String),

    #[error("Changing the subscription failed: {0}")]
    Transport(TransportError),

    #[error("The session is closed")]
    SessionClosed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Unknown variable {0}")]
    UnknownVariable(String),

    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(String),

    #[error("Arithmetic error: {0}")]
    ArithmeticError(String),
}

impl From<BridgeError> for ConnectError {
    fn from(source: BridgeError) -> Self {
        match source {
            BridgeError::Timeout => ConnectError::Timeout,
            BridgeError::SessionClosed | BridgeError::WorkerGone => ConnectError::SessionClosed,
        }
    }
}

impl From<BridgeError> for ReadError {
    fn from(source: BridgeError) -> Self {
        match source {
            BridgeError::Timeout => ReadError::Timeout,
            BridgeError::SessionClosed | BridgeError::WorkerGone => ReadError::SessionClosed,
        }
    }
}

impl From<BridgeError> for WriteError {
    fn from(source: BridgeError) -> Self {
        match source {
            BridgeError::Timeout => WriteError::Timeout,
            BridgeError::SessionClosed | BridgeError::WorkerGone => WriteError::SessionClosed,
        }
    }
}

impl From<BridgeError> for NotifyError {
    fn from(source: BridgeError) -> Self {
        match source {
            BridgeError::Timeout => NotifyError::Transport(TransportError::Timeout),
            BridgeError::SessionClosed | BridgeError::WorkerGone => NotifyError::SessionClosed,
        }
    }
}

impl From<BridgeError> for TransportError {
    fn from(source: BridgeError) -> Self {
        match source {
            BridgeError::Timeout => TransportError::Timeout,
            BridgeError::SessionClosed | BridgeError::WorkerGone => TransportError::Other(source.to_string()),
        }
    }
}
