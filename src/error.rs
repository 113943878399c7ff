use thiserror::Error;

pub type Result<T> = std::result::Result<T, SylvaError>;

/// Error surface of the simulation core.
///
/// Setup-time failures (configuration, input files) are distinguished from
/// runtime failures so that host binaries can map them to exit codes.
/// Expression errors carry the offending source text; worker errors carry
/// the resource unit they were raised on.
#[derive(Error, Debug)]
pub enum SylvaError {
    #[error("configuration: {0}")]
    Config(String),
    #[error("input file: {0}")]
    Input(String),
    #[error("expression `{expression}`: {message}")]
    Expression { expression: String, message: String },
    #[error("grid index ({x}, {y}) out of range ({nx} x {ny})")]
    GridIndex {
        x: isize,
        y: isize,
        nx: usize,
        ny: usize,
    },
    #[error("consistency: {0}")]
    Consistency(String),
    #[error("resource unit {ru}: {source}")]
    Worker {
        ru: usize,
        #[source]
        source: Box<SylvaError>,
    },
    #[error("canceled")]
    Canceled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SylvaError {
    pub fn config(message: impl Into<String>) -> Self {
        SylvaError::Config(message.into())
    }
    pub fn input(message: impl Into<String>) -> Self {
        SylvaError::Input(message.into())
    }
    pub fn consistency(message: impl Into<String>) -> Self {
        SylvaError::Consistency(message.into())
    }
    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        SylvaError::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }
    /// process exit code for host binaries: 2 setup, 3 runtime, 4 canceled
    pub fn exit_code(&self) -> i32 {
        match self {
            SylvaError::Config(_) | SylvaError::Input(_) => 2,
            SylvaError::Canceled => 4,
            SylvaError::Worker { source, .. } => source.exit_code(),
            _ => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn exit_codes() {
        assert_eq!(SylvaError::config("x").exit_code(), 2);
        assert_eq!(SylvaError::input("x").exit_code(), 2);
        assert_eq!(SylvaError::Canceled.exit_code(), 4);
        assert_eq!(SylvaError::consistency("x").exit_code(), 3);
        let wrapped = SylvaError::Worker {
            ru: 7,
            source: Box::new(SylvaError::Canceled),
        };
        assert_eq!(wrapped.exit_code(), 4);
    }
}
