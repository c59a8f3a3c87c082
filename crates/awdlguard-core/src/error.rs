use thiserror::Error;

/// Errors surfaced by the guardian and its components.
///
/// Every variant that reaches a public entry point is also reported once on
/// the event channel as `GuardianEvent::ErrorOccurred`, using the text from
/// [`GuardianError::user_message`].
#[derive(Error, Debug)]
pub enum GuardianError {
    #[error("Failed to create authorization context (status {status})")]
    AuthorizationCreationFailed { status: i32 },

    #[error("Authorization canceled by user")]
    AuthorizationCanceled,

    #[error("Authorization denied (status {status})")]
    AuthorizationDenied { status: i32 },

    #[error("Failed to open kernel event monitor during {operation}: {source}")]
    MonitorSetupFailed {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No valid authorization for privileged command on '{interface}'")]
    NoAuthorization { interface: String },

    #[error("Privileged dispatch of {tool} {args:?} failed with status {status}")]
    CommandDispatchFailed {
        tool: String,
        args: Vec<String>,
        status: i32,
    },

    #[error("Invalid interface name '{name}': {reason}")]
    InvalidInterfaceName { name: String, reason: String },

    #[error("Guardian control loop is not running")]
    ControlClosed,
}

pub type Result<T> = std::result::Result<T, GuardianError>;

impl GuardianError {
    /// Create a monitor setup error with context
    pub fn monitor_setup(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::MonitorSetupFailed {
            operation: operation.into(),
            source,
        }
    }

    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInterfaceName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Short text shown to the surrounding application.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthorizationCreationFailed { .. } => "Failed to create authorization".to_string(),
            Self::AuthorizationCanceled => "Authorization canceled".to_string(),
            Self::AuthorizationDenied { .. } => "Failed to obtain admin privileges".to_string(),
            Self::MonitorSetupFailed { .. } => "Failed to setup network monitoring".to_string(),
            Self::NoAuthorization { interface } => {
                format!("No authorization for {interface} control")
            }
            Self::CommandDispatchFailed { status, .. } => {
                format!("Failed to run interface command (status {status})")
            }
            Self::InvalidInterfaceName { name, .. } => format!("Invalid interface name: {name}"),
            Self::ControlClosed => "Guardian is not running".to_string(),
        }
    }
}
