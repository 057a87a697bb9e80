//! AWS provider error types

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use reconflow_cloud::CloudError;
use std::fmt;
use thiserror::Error;

/// Error codes meaning the credentials themselves are unusable
const AUTH_CODES: &[&str] = &[
    "AuthFailure",
    "UnauthorizedOperation",
    "RequestExpired",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
];

#[derive(Error, Debug)]
pub enum AwsError {
    #[error("AWS unreachable during {operation}: {message}")]
    Unreachable { operation: String, message: String },

    #[error("AWS rejected credentials during {operation}: {code}")]
    Unauthorized { operation: String, code: String },

    #[error("{operation} failed ({code}): {message}")]
    Api {
        operation: String,
        code: String,
        message: String,
    },

    #[error("{operation} response has no {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    #[error("invalid listener {0}")]
    InvalidListener(String),
}

impl AwsError {
    /// Classify an SDK failure of one operation
    pub fn from_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
        R: fmt::Debug + Send + Sync + 'static,
    {
        let operation = operation.to_string();
        match &err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => AwsError::Unreachable {
                operation,
                message: DisplayErrorContext(&err).to_string(),
            },
            _ => {
                let code = err.code().unwrap_or("Unknown").to_string();
                if AUTH_CODES.contains(&code.as_str()) {
                    AwsError::Unauthorized { operation, code }
                } else {
                    let message = err
                        .message()
                        .map(str::to_string)
                        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
                    AwsError::Api {
                        operation,
                        code,
                        message,
                    }
                }
            }
        }
    }

    /// Provider error code, when the provider answered
    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Unauthorized { code, .. } | AwsError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the provider reported the looked-up object as missing
    pub fn is_not_found(&self) -> bool {
        self.code().is_some_and(|code| code.ends_with("NotFound"))
    }
}

impl From<AwsError> for CloudError {
    fn from(err: AwsError) -> Self {
        match err {
            AwsError::Unreachable { .. } | AwsError::Unauthorized { .. } => {
                CloudError::ProviderUnavailable(err.to_string())
            }
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

/// Attach the operation name to an SDK failure
pub(crate) trait SdkResultExt<T> {
    fn for_op(self, operation: &'static str) -> reconflow_cloud::Result<T>;
}

impl<T, E, R> SdkResultExt<T> for std::result::Result<T, SdkError<E, R>>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: fmt::Debug + Send + Sync + 'static,
{
    fn for_op(self, operation: &'static str) -> reconflow_cloud::Result<T> {
        self.map_err(|err| AwsError::from_sdk(operation, err).into())
    }
}

pub(crate) fn missing(operation: &'static str, field: &'static str) -> CloudError {
    AwsError::MissingField { operation, field }.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: &str) -> AwsError {
        AwsError::Api {
            operation: "DescribeKeyPairs".to_string(),
            code: code.to_string(),
            message: "not here".to_string(),
        }
    }

    #[test]
    fn test_not_found_codes() {
        assert!(api("InvalidKeyPair.NotFound").is_not_found());
        assert!(api("LoadBalancerNotFound").is_not_found());
        assert!(api("AccessPointNotFound").is_not_found());
        assert!(!api("DependencyViolation").is_not_found());
    }

    #[test]
    fn test_unreachable_maps_to_provider_unavailable() {
        let err: CloudError = AwsError::Unreachable {
            operation: "DescribeVpcs".to_string(),
            message: "connection refused".to_string(),
        }
        .into();
        assert!(matches!(err, CloudError::ProviderUnavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_api_error_keeps_code() {
        let err: CloudError = api("DependencyViolation").into();
        match err {
            CloudError::ApiError(message) => {
                assert!(message.contains("DependencyViolation"));
                assert!(message.contains("DescribeKeyPairs"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
