use serde_json::json;
use thiserror::Error;

/// Everything that can stop a submission before the arithmetic starts.
///
/// Rows are 1-based. For mark sheets they count header rows; for JSON
/// documents they are the position in `responses`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttainmentError {
    #[error("no questions declared")]
    NoQuestions,

    #[error("question #{index} has an empty id")]
    EmptyQuestionId { index: usize },

    #[error("duplicate question id: {question_id}")]
    DuplicateQuestion { question_id: String },

    #[error("question {question_id}: max_mark must be a positive number, got {max_mark}")]
    InvalidMaxMark { question_id: String, max_mark: f64 },

    #[error("question {question_id}: threshold_fraction must be in (0, 1], got {fraction}")]
    InvalidThreshold { question_id: String, fraction: f64 },

    #[error("row {row}: missing student id")]
    MissingStudentId { row: usize },

    #[error("row {row}: duplicate student id {student_id}")]
    DuplicateStudent { row: usize, student_id: String },

    #[error("row {row}: score {value} for {question_id} is outside 0..={max_mark}")]
    ScoreOutOfRange {
        row: usize,
        column: Option<usize>,
        student_id: String,
        question_id: String,
        value: f64,
        max_mark: f64,
    },

    #[error("row {row}: more than one score for {question_id}")]
    DuplicateScore {
        row: usize,
        student_id: String,
        question_id: String,
    },

    #[error("row {row}: score for undeclared question {question_id}")]
    UndeclaredScore {
        row: usize,
        student_id: String,
        question_id: String,
    },

    #[error("declared question {question_id} has no column in the sheet")]
    MissingQuestionColumn { question_id: String },

    #[error("evaluation context is missing {field}")]
    MissingContextField { field: &'static str },

    #[error("question_co_map references undeclared question {question_id}")]
    UnknownMappedQuestion { question_id: String },

    #[error("question_co_map lists {question_id} more than once")]
    DuplicateMappedQuestion { question_id: String },

    #[error("question {question_id} maps to no course outcome")]
    EmptyCoMapping { question_id: String },

    #[error("co_po_matrix references undeclared course outcome {co_id}")]
    UndeclaredCourseOutcome { co_id: String },

    #[error("co_po_matrix lists course outcome {co_id} more than once")]
    DuplicateMatrixRow { co_id: String },

    #[error("co_po_matrix row {co_id} lists {po_id} more than once")]
    DuplicateCorrelation { co_id: String, po_id: String },

    #[error("correlation {co_id}/{po_id} must be 0..=3, got {strength}")]
    InvalidCorrelation {
        co_id: String,
        po_id: String,
        strength: i64,
    },

    #[error("column {column} is mapped to undeclared question {question_id}")]
    UndeclaredColumnQuestion { column: usize, question_id: String },

    #[error("column 0 holds the student id and cannot be mapped to {question_id}")]
    StudentIdColumnMapped { question_id: String },

    #[error("question {question_id} is mapped to more than one column")]
    DuplicateColumnMapping { question_id: String },
}

impl AttainmentError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownMappedQuestion { .. }
                | Self::DuplicateMappedQuestion { .. }
                | Self::EmptyCoMapping { .. }
                | Self::UndeclaredCourseOutcome { .. }
                | Self::DuplicateMatrixRow { .. }
                | Self::DuplicateCorrelation { .. }
                | Self::InvalidCorrelation { .. }
                | Self::UndeclaredColumnQuestion { .. }
                | Self::StudentIdColumnMapped { .. }
                | Self::DuplicateColumnMapping { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        if self.is_configuration() {
            "configuration_error"
        } else {
            "validation_failed"
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::NoQuestions => "no_questions",
            Self::EmptyQuestionId { .. } => "empty_question_id",
            Self::DuplicateQuestion { .. } => "duplicate_question",
            Self::InvalidMaxMark { .. } => "invalid_max_mark",
            Self::InvalidThreshold { .. } => "invalid_threshold",
            Self::MissingStudentId { .. } => "missing_student_id",
            Self::DuplicateStudent { .. } => "duplicate_student",
            Self::ScoreOutOfRange { .. } => "score_out_of_range",
            Self::DuplicateScore { .. } => "duplicate_score",
            Self::UndeclaredScore { .. } => "undeclared_score",
            Self::MissingQuestionColumn { .. } => "missing_question_column",
            Self::MissingContextField { .. } => "missing_context_field",
            Self::UnknownMappedQuestion { .. } => "unknown_mapped_question",
            Self::DuplicateMappedQuestion { .. } => "duplicate_mapped_question",
            Self::EmptyCoMapping { .. } => "empty_co_mapping",
            Self::UndeclaredCourseOutcome { .. } => "undeclared_course_outcome",
            Self::DuplicateMatrixRow { .. } => "duplicate_matrix_row",
            Self::DuplicateCorrelation { .. } => "duplicate_correlation",
            Self::InvalidCorrelation { .. } => "invalid_correlation",
            Self::UndeclaredColumnQuestion { .. } => "undeclared_column_question",
            Self::StudentIdColumnMapped { .. } => "student_id_column_mapped",
            Self::DuplicateColumnMapping { .. } => "duplicate_column_mapping",
        }
    }

    /// Structured context for the `error.details` field of an IPC reply.
    pub fn details(&self) -> serde_json::Value {
        let mut d = match self {
            Self::NoQuestions => json!({}),
            Self::EmptyQuestionId { index } => json!({ "index": index }),
            Self::DuplicateQuestion { question_id }
            | Self::MissingQuestionColumn { question_id }
            | Self::UnknownMappedQuestion { question_id }
            | Self::DuplicateMappedQuestion { question_id }
            | Self::EmptyCoMapping { question_id }
            | Self::StudentIdColumnMapped { question_id }
            | Self::DuplicateColumnMapping { question_id } => {
                json!({ "questionId": question_id })
            }
            Self::InvalidMaxMark {
                question_id,
                max_mark,
            } => json!({ "questionId": question_id, "maxMark": max_mark }),
            Self::InvalidThreshold {
                question_id,
                fraction,
            } => json!({ "questionId": question_id, "thresholdFraction": fraction }),
            Self::MissingStudentId { row } => json!({ "row": row }),
            Self::DuplicateStudent { row, student_id } => {
                json!({ "row": row, "studentId": student_id })
            }
            Self::ScoreOutOfRange {
                row,
                column,
                student_id,
                question_id,
                value,
                max_mark,
            } => json!({
                "row": row,
                "column": column,
                "studentId": student_id,
                "questionId": question_id,
                "value": value,
                "maxMark": max_mark,
            }),
            Self::UndeclaredScore {
                row,
                student_id,
                question_id,
            }
            | Self::DuplicateScore {
                row,
                student_id,
                question_id,
            } => json!({ "row": row, "studentId": student_id, "questionId": question_id }),
            Self::MissingContextField { field } => json!({ "field": field }),
            Self::UndeclaredCourseOutcome { co_id } | Self::DuplicateMatrixRow { co_id } => {
                json!({ "coId": co_id })
            }
            Self::DuplicateCorrelation { co_id, po_id } => {
                json!({ "coId": co_id, "poId": po_id })
            }
            Self::InvalidCorrelation {
                co_id,
                po_id,
                strength,
            } => json!({ "coId": co_id, "poId": po_id, "strength": strength }),
            Self::UndeclaredColumnQuestion {
                column,
                question_id,
            } => json!({ "column": column, "questionId": question_id }),
        };
        d["kind"] = json!(self.kind());
        d
    }
}
