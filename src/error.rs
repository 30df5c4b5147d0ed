#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("batch save for subject {subject_id} rejected: {message}")]
    SinkRejected { subject_id: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
