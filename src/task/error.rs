use crate::node::NodeError;
use crate::protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    /// Missing or invalid parameters; fatal at bootstrap, never retried
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bus error: {0}")]
    Node(#[from] NodeError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A bounded wait on the peer expired
    #[error("Liveness failure: {0}")]
    Liveness(String),

    #[error("Record sink error: {0}")]
    Sink(String),

    /// Building the statistics or the live display failed
    #[error("Report error: {0}")]
    Report(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_errors_are_not_sink_errors() {
        let report = TaskError::Report("Failed to create histogram: bad bounds".into());
        assert_eq!(
            report.to_string(),
            "Report error: Failed to create histogram: bad bounds"
        );
        assert!(!matches!(report, TaskError::Sink(_)));
        assert_eq!(
            TaskError::Sink("disk full".into()).to_string(),
            "Record sink error: disk full"
        );
    }
}
