use serde::{Deserialize, Serialize};

use crate::token::Token;

/// Student identity fields found on a marks card. `None` means the field was
/// never matched; it is serialized as `null`, distinct from an empty string.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudentInfo {
    pub name: Option<String>,
    pub roll_number: Option<String>,
    pub registration_number: Option<String>,
    pub parentage: Option<String>,
    pub program: Option<String>,
    pub semester: Option<String>,
    pub batch_or_session: Option<String>,
}

/// One subject line. Marks stay as recognized strings so OCR artifacts
/// (`O7`, `l2`, …) survive for audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectRow {
    pub course_code: Option<String>,
    pub course_title: Option<String>,
    pub continuous_assessment: Option<String>,
    pub theory_marks: Option<String>,
    pub total_marks: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryFields {
    pub total_marks: Option<String>,
    pub result: Option<String>,
    pub division: Option<String>,
}

/// The assembled result of one extraction run.
///
/// Fields are private: a record is produced by [`DocumentRecord::assemble`]
/// (or deserialized from a saved artifact) and only read afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    issuing_authority: Option<String>,
    document_type: Option<String>,
    student: StudentInfo,
    subjects: Vec<SubjectRow>,
    total_marks: Option<String>,
    result: Option<String>,
    division: Option<String>,
    raw_tokens: Vec<Token>,
}

impl DocumentRecord {
    /// Merge the pass outputs with the filtered token list.
    ///
    /// The first retained token names the issuing authority and the second the
    /// document type; marks cards print both above everything else.
    pub fn assemble(
        raw_tokens: Vec<Token>,
        student: StudentInfo,
        subjects: Vec<SubjectRow>,
        summary: SummaryFields,
    ) -> Self {
        let issuing_authority = raw_tokens.first().map(|t| t.text.clone());
        let document_type = raw_tokens.get(1).map(|t| t.text.clone());
        Self {
            issuing_authority,
            document_type,
            student,
            subjects,
            total_marks: summary.total_marks,
            result: summary.result,
            division: summary.division,
            raw_tokens,
        }
    }

    pub fn issuing_authority(&self) -> Option<&str> {
        self.issuing_authority.as_deref()
    }

    pub fn document_type(&self) -> Option<&str> {
        self.document_type.as_deref()
    }

    pub fn student(&self) -> &StudentInfo {
        &self.student
    }

    pub fn subjects(&self) -> &[SubjectRow] {
        &self.subjects
    }

    pub fn total_marks(&self) -> Option<&str> {
        self.total_marks.as_deref()
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn division(&self) -> Option<&str> {
        self.division.as_deref()
    }

    pub fn raw_tokens(&self) -> &[Token] {
        &self.raw_tokens
    }
}
