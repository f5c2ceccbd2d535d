use thiserror::Error;

use crate::checkout::CheckoutError;
use crate::config::ConfigError;
use crate::pricing::controller::ControllerError;
use crate::pricing::fetch::QuoteFetchError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("quote service failure: {0}")]
    QuoteService(#[from] QuoteFetchError),
    #[error("checkout handoff failure: {0}")]
    Checkout(#[from] CheckoutError),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("pricing controller stopped before the session settled")]
    ControllerStopped,
}

impl From<ControllerError> for ApplicationError {
    fn from(value: ControllerError) -> Self {
        match value {
            ControllerError::Stopped => Self::ControllerStopped,
        }
    }
}

impl From<ConfigError> for ApplicationError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The pricing request could not be processed. Check the selection and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "Prices are temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Checkout(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id }
            }
            ApplicationError::QuoteService(error) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
            ApplicationError::ControllerStopped => Self::Internal {
                message: "pricing controller stopped".to_owned(),
                correlation_id,
            },
        }
    }
}
