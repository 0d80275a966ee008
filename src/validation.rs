use thiserror::Error;

/// Field-level rejection of an event or booking write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("{field} cannot exceed {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("title must contain at least one letter or digit")]
    UnsluggableTitle,

    #[error("invalid date")]
    InvalidDate,

    #[error("invalid time")]
    InvalidTime,

    #[error("mode must be either online, offline, or hybrid (got '{0}')")]
    InvalidMode(String),

    #[error("event not found")]
    EventNotFound,

    #[error("empty email")]
    EmptyEmail,

    #[error("invalid email")]
    InvalidEmail,
}

impl ValidationError {
    /// Name of the field the rejection is about.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Empty { field } | Self::TooLong { field, .. } => *field,
            Self::UnsluggableTitle => "title",
            Self::InvalidDate => "date",
            Self::InvalidTime => "time",
            Self::InvalidMode(_) => "mode",
            Self::EventNotFound => "eventId",
            Self::EmptyEmail | Self::InvalidEmail => "email",
        }
    }
}
