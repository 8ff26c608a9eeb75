use std::sync::OnceLock;

use marksheet_core::{DocumentRecord, ExtractionConfig, StudentInfo, SubjectRow, SummaryFields, Token};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_name,
    r"(?i)NAME\s*[:.\-]*\s*([A-Z][A-Z\s\-·.]*)");
re!(re_roll,
    r"(?i)ROLL?\s*(?:NO|NUMBER|N)?\s*\.?\s*[:.\-#]*\s*([A-Z0-9\-/]*[0-9][A-Z0-9\-/]*)");
re!(re_registration,
    r"(?i)REG(?:ISTRATION|D)?\s*\.?\s*(?:NO|NUMBER)?\s*\.?\s*[:.\-#]*\s*([A-Z0-9\-/]*[0-9][A-Z0-9\-/]*)");
re!(re_parentage,
    r"(?i)PARENTAGE\s*[:.\-]*\s*([A-Z][A-Z\s\-·.]*)");
re!(re_semester,
    r"(?i)SEMESTER\s*[:.\-]*\s*([A-Z0-9][A-Z0-9\s]*)");
re!(re_batch,
    r"(?i)(?:BATCH|SESSION)\s*[:.\-]*\s*([A-Z0-9][A-Z0-9\s\-]*)");

// Anchored at the token start and case-sensitive: course codes are printed in capitals.
re!(re_course_code,
    r"^[A-Z]{2,4}[0-9]{3,4}");
re!(re_digits,
    r"[0-9]+");

const PROGRAM_KEYWORDS: &[&str] = &["MASTER", "BACHELOR", "MBA"];
const RESULT_VOCABULARY: &[&str] = &["PASS", "FAIL", "FIRST CLASS", "SECOND CLASS"];
const DIVISION_ORDINALS: &[&str] = &["IST", "IIND", "IIIRD"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("No tokens survived confidence filtering")]
    Empty,
}

/// Whether the token starts with a course code such as `MBA401`.
pub fn is_course_code(text: &str) -> bool {
    re_course_code().is_match(text)
}

// ── Public extraction API ─────────────────────────────────────────────────────

/// Turns a filtered token sequence into a [`DocumentRecord`].
///
/// Three independent passes read the same slice: student info, subject rows and
/// summary fields. No pass reorders or edits tokens, and nothing is kept between
/// documents.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    config: ExtractionConfig,
}

impl Extractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Run all three passes and assemble the record.
    pub fn extract(&self, tokens: Vec<Token>) -> Result<DocumentRecord, ExtractError> {
        if tokens.is_empty() {
            return Err(ExtractError::Empty);
        }

        let student = Self::student_info(&tokens);
        let subjects = self.subjects(&tokens);
        let summary = Self::summary(&tokens);
        log_absent_fields(&student, &summary);

        Ok(DocumentRecord::assemble(tokens, student, subjects, summary))
    }

    // ── Pass A: student info ──────────────────────────────────────────────────

    /// First match wins per field: marks cards repeat their header block, and
    /// the first copy is the one nearest the top of the page.
    pub fn student_info(tokens: &[Token]) -> StudentInfo {
        let mut info = StudentInfo::default();

        for token in tokens {
            let upper = token.normalized();
            let text = token.text.as_str();

            if upper.contains("NAME") {
                fill_first(&mut info.name, capture(re_name(), text));
            }
            if upper.contains("ROL") {
                fill_first(&mut info.roll_number, capture(re_roll(), text));
            }
            if upper.contains("REG") {
                fill_first(&mut info.registration_number, capture(re_registration(), text));
            }
            if upper.contains("PARENTAGE") {
                fill_first(&mut info.parentage, capture(re_parentage(), text));
            }
            // The program is the whole line, e.g. "Master of Business Administration".
            if PROGRAM_KEYWORDS.iter().any(|k| upper.contains(k)) {
                fill_first(&mut info.program, Some(text.to_string()));
            }
            if upper.contains("SEMESTER") {
                fill_first(&mut info.semester, capture(re_semester(), text));
            }
            if upper.contains("BATCH") || upper.contains("SESSION") {
                fill_first(&mut info.batch_or_session, capture(re_batch(), text));
            }
        }

        info
    }

    // ── Pass B: subject rows ──────────────────────────────────────────────────

    /// One row per course-code anchor, in anchor order.
    ///
    /// The title is the first wordy token shortly after the anchor; marks are the
    /// short numeric tokens in a slightly longer window, assigned positionally
    /// once at least two are found.
    pub fn subjects(&self, tokens: &[Token]) -> Vec<SubjectRow> {
        let cfg = &self.config;
        let mut rows = Vec::new();

        for (i, anchor) in tokens.iter().enumerate() {
            if !is_course_code(&anchor.text) {
                continue;
            }

            let title = following(tokens, i, cfg.title_window)
                .iter()
                .find(|t| {
                    !t.is_numeric() && !is_course_code(&t.text) && t.char_len() > cfg.min_title_len
                })
                .map(|t| t.text.clone());

            let marks: Vec<&str> = following(tokens, i, cfg.marks_window)
                .iter()
                .filter(|t| t.is_numeric() && t.char_len() <= cfg.max_mark_len)
                .map(|t| t.text.as_str())
                .collect();

            // Fewer than two candidates leaves every mark unset.
            let (continuous_assessment, theory_marks, total_marks) = match marks.as_slice() {
                [ca, th, rest @ ..] => (
                    Some(ca.to_string()),
                    Some(th.to_string()),
                    rest.first().map(|t| t.to_string()),
                ),
                _ => (None, None, None),
            };

            rows.push(SubjectRow {
                course_code: Some(anchor.text.clone()),
                course_title: title,
                continuous_assessment,
                theory_marks,
                total_marks,
            });
        }

        debug!(subjects = rows.len(), "Subject rows extracted");
        rows
    }

    // ── Pass C: summary ───────────────────────────────────────────────────────

    /// Result and division keep the first qualifying token. Total marks does the
    /// opposite twice over: the last digit run inside the token (so a label like
    /// "TOTAL (SEM 2) 487" gives 487), and a later TOTAL token replaces an earlier one.
    pub fn summary(tokens: &[Token]) -> SummaryFields {
        let mut summary = SummaryFields::default();

        for token in tokens {
            let upper = token.normalized();

            if upper.contains("TOTAL") {
                if let Some(last) = re_digits().find_iter(&upper).last() {
                    summary.total_marks = Some(last.as_str().to_string());
                }
            }
            if RESULT_VOCABULARY.contains(&upper.as_str()) {
                fill_first(&mut summary.result, Some(token.text.clone()));
            }
            if upper.contains("DIVISION") || DIVISION_ORDINALS.contains(&upper.as_str()) {
                fill_first(&mut summary.division, Some(token.text.clone()));
            }
        }

        summary
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Up to `window` tokens after position `i`, clipped at the end of the sequence.
fn following(tokens: &[Token], i: usize, window: usize) -> &[Token] {
    let start = (i + 1).min(tokens.len());
    let end = (i + 1).saturating_add(window).min(tokens.len());
    &tokens[start..end]
}

/// Trimmed first capture group, if it is non-empty.
fn capture(re: &Regex, text: &str) -> Option<String> {
    let value = re.captures(text)?.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn fill_first(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn log_absent_fields(student: &StudentInfo, summary: &SummaryFields) {
    let fields = [
        ("name", student.name.is_none()),
        ("roll_number", student.roll_number.is_none()),
        ("registration_number", student.registration_number.is_none()),
        ("parentage", student.parentage.is_none()),
        ("program", student.program.is_none()),
        ("semester", student.semester.is_none()),
        ("batch_or_session", student.batch_or_session.is_none()),
        ("total_marks", summary.total_marks.is_none()),
        ("result", summary.result.is_none()),
        ("division", summary.division.is_none()),
    ];
    for (field, absent) in fields {
        if absent {
            debug!(field, "Field not found");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(texts: &[&str]) -> Vec<Token> {
        texts.iter().enumerate().map(|(i, t)| Token::new(i, t, 0.9)).collect()
    }

    fn subjects(texts: &[&str]) -> Vec<SubjectRow> {
        Extractor::default().subjects(&tokens(texts))
    }

    // ── Student info ──────────────────────────────────────────────────────────

    #[test]
    fn roll_number_after_label() {
        let info = Extractor::student_info(&tokens(&["Roll No: 2023CS045"]));
        assert_eq!(info.roll_number.as_deref(), Some("2023CS045"));
    }

    #[test]
    fn roll_number_variants() {
        for (text, expected) in [
            ("ROLL NO. 4521", "4521"),
            ("RollNo:17-MBA-22", "17-MBA-22"),
            ("Roll Number 88123", "88123"),
            ("ROL 5521", "5521"),
        ] {
            let info = Extractor::student_info(&tokens(&[text]));
            assert_eq!(info.roll_number.as_deref(), Some(expected), "input {text}");
        }
    }

    #[test]
    fn roll_value_needs_a_digit() {
        let info = Extractor::student_info(&tokens(&["CONTROLLER OF EXAMINATIONS"]));
        assert_eq!(info.roll_number, None);
    }

    #[test]
    fn name_keeps_recognized_casing() {
        let info = Extractor::student_info(&tokens(&["Name: Tahir Ahmad Khan"]));
        assert_eq!(info.name.as_deref(), Some("Tahir Ahmad Khan"));
    }

    #[test]
    fn name_glued_to_label() {
        let info = Extractor::student_info(&tokens(&["NameTAHIRAHMAD·KHAN"]));
        assert_eq!(info.name.as_deref(), Some("TAHIRAHMAD·KHAN"));
    }

    #[test]
    fn bare_label_leaves_field_unset() {
        let info = Extractor::student_info(&tokens(&["Name:", "Name: Zoya"]));
        assert_eq!(info.name.as_deref(), Some("Zoya"));
    }

    #[test]
    fn first_match_wins_for_student_fields() {
        let info = Extractor::student_info(&tokens(&[
            "Name: Zoya Bashir",
            "Roll No: 1001",
            "Name: Someone Else",
            "Roll No: 2002",
        ]));
        assert_eq!(info.name.as_deref(), Some("Zoya Bashir"));
        assert_eq!(info.roll_number.as_deref(), Some("1001"));
    }

    #[test]
    fn registration_parentage_semester_batch() {
        let info = Extractor::student_info(&tokens(&[
            "Regd. No: 16-KU-2019",
            "Parentage: Bashir Ahmad",
            "Semester: 4TH",
            "Batch 2021-2023",
        ]));
        assert_eq!(info.registration_number.as_deref(), Some("16-KU-2019"));
        assert_eq!(info.parentage.as_deref(), Some("Bashir Ahmad"));
        assert_eq!(info.semester.as_deref(), Some("4TH"));
        assert_eq!(info.batch_or_session.as_deref(), Some("2021-2023"));
    }

    #[test]
    fn session_fills_batch_field() {
        let info = Extractor::student_info(&tokens(&["Session: 2022-24"]));
        assert_eq!(info.batch_or_session.as_deref(), Some("2022-24"));
    }

    #[test]
    fn program_taken_verbatim() {
        let info = Extractor::student_info(&tokens(&["Master of Business Administration"]));
        assert_eq!(info.program.as_deref(), Some("Master of Business Administration"));
    }

    #[test]
    fn first_keyword_token_is_the_program() {
        let info = Extractor::student_info(&tokens(&["MBA401", "Master of Business Administration"]));
        assert_eq!(info.program.as_deref(), Some("MBA401"));
    }

    #[test]
    fn unmatched_fields_stay_unset() {
        let info = Extractor::student_info(&tokens(&["UNIVERSITY OF KASHMIR", "MARKS CARD"]));
        assert_eq!(info, StudentInfo::default());
    }

    // ── Subjects ──────────────────────────────────────────────────────────────

    #[test]
    fn subject_row_with_two_marks() {
        let rows = subjects(&["MBA401", "Financial Management", "78", "82", "N/A"]);
        assert_eq!(
            rows,
            vec![SubjectRow {
                course_code: Some("MBA401".into()),
                course_title: Some("Financial Management".into()),
                continuous_assessment: Some("78".into()),
                theory_marks: Some("82".into()),
                total_marks: None,
            }]
        );
    }

    #[test]
    fn third_mark_is_total() {
        let rows = subjects(&["CSE1203", "Data Structures", "24", "51", "75"]);
        assert_eq!(rows[0].total_marks.as_deref(), Some("75"));
    }

    #[test]
    fn anchor_without_marks_still_emits_row() {
        let rows = subjects(&["MBA405", "Business Ethics"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].course_title.as_deref(), Some("Business Ethics"));
        assert_eq!(rows[0].continuous_assessment, None);
        assert_eq!(rows[0].theory_marks, None);
    }

    #[test]
    fn single_mark_leaves_all_marks_unset() {
        let rows = subjects(&["MBA401", "Financial Management", "78", "N/A"]);
        assert_eq!(rows[0].course_title.as_deref(), Some("Financial Management"));
        assert_eq!(rows[0].continuous_assessment, None);
        assert_eq!(rows[0].theory_marks, None);
        assert_eq!(rows[0].total_marks, None);
    }

    #[test]
    fn title_must_be_long_and_not_numeric() {
        // "Lab" is too short and "45" numeric; the title window ends before "Operations Research".
        let rows = subjects(&["MBA403", "Lab", "45", "Operations Research", "60"]);
        assert_eq!(rows[0].course_title, None);
        assert_eq!(rows[0].continuous_assessment.as_deref(), Some("45"));
        assert_eq!(rows[0].theory_marks.as_deref(), Some("60"));
    }

    #[test]
    fn long_numbers_are_not_marks() {
        let rows = subjects(&["MBA404", "Human Resources", "2023", "56", "1234", "61"]);
        assert_eq!(rows[0].continuous_assessment.as_deref(), Some("56"));
        assert_eq!(rows[0].theory_marks.as_deref(), Some("61"));
    }

    #[test]
    fn marks_window_is_bounded() {
        // Only "88" falls inside the window; "99" would make a second mark if it counted.
        let rows = subjects(&["MBA406", "Strategic Management", "88", "b", "c", "d", "99"]);
        assert_eq!(rows[0].continuous_assessment, None);
    }

    #[test]
    fn rows_follow_anchor_order() {
        let rows = subjects(&[
            "MBA401", "Financial Management", "78", "82",
            "MBA402", "Marketing Management", "65", "70",
        ]);
        let codes: Vec<_> = rows.iter().map(|r| r.course_code.clone().unwrap()).collect();
        assert_eq!(codes, vec!["MBA401", "MBA402"]);
        assert_eq!(rows[1].continuous_assessment.as_deref(), Some("65"));
    }

    #[test]
    fn following_code_is_not_a_title() {
        let rows = subjects(&["MBA401", "MBA402", "Marketing Management"]);
        assert_eq!(rows[0].course_title.as_deref(), Some("Marketing Management"));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn lowercase_code_is_not_an_anchor() {
        assert!(subjects(&["mba401", "Financial Management", "78"]).is_empty());
    }

    #[test]
    fn windows_are_configurable() {
        let extractor = Extractor::new(ExtractionConfig { marks_window: 3, ..Default::default() });
        let rows = extractor.subjects(&tokens(&["MBA401", "Financial Management", "78", "82", "160"]));
        assert_eq!(rows[0].continuous_assessment.as_deref(), Some("78"));
        assert_eq!(rows[0].theory_marks.as_deref(), Some("82"));
        assert_eq!(rows[0].total_marks, None);
    }

    #[test]
    fn window_clips_at_sequence_end() {
        let rows = subjects(&["MBA401"]);
        assert_eq!(rows[0].course_title, None);
    }

    // ── Summary ───────────────────────────────────────────────────────────────

    #[test]
    fn total_marks_takes_last_digit_run() {
        let s = Extractor::summary(&tokens(&["TOTAL MARKS 487"]));
        assert_eq!(s.total_marks.as_deref(), Some("487"));
        let s = Extractor::summary(&tokens(&["Total (Sem 2) 487"]));
        assert_eq!(s.total_marks.as_deref(), Some("487"));
    }

    #[test]
    fn total_without_digits_is_ignored() {
        let s = Extractor::summary(&tokens(&["Total", "487"]));
        assert_eq!(s.total_marks, None);
    }

    #[test]
    fn later_total_replaces_earlier_but_first_result_stays() {
        // Deliberately asymmetric: totals keep the last qualifying token,
        // result and division keep the first.
        let s = Extractor::summary(&tokens(&[
            "Total 450",
            "PASS",
            "IST",
            "Grand Total 487",
            "FAIL",
            "2nd Division",
        ]));
        assert_eq!(s.total_marks.as_deref(), Some("487"));
        assert_eq!(s.result.as_deref(), Some("PASS"));
        assert_eq!(s.division.as_deref(), Some("IST"));
    }

    #[test]
    fn result_needs_exact_vocabulary_match() {
        let s = Extractor::summary(&tokens(&["PASSED WITH DISTINCTION", "First Class"]));
        assert_eq!(s.result.as_deref(), Some("First Class"));
    }

    #[test]
    fn division_by_keyword() {
        let s = Extractor::summary(&tokens(&["First Division"]));
        assert_eq!(s.division.as_deref(), Some("First Division"));
    }

    // ── Whole engine ──────────────────────────────────────────────────────────

    #[test]
    fn empty_token_list_is_an_error() {
        assert_eq!(Extractor::default().extract(vec![]).unwrap_err(), ExtractError::Empty);
    }

    #[test]
    fn extract_assembles_full_record() {
        let record = Extractor::default()
            .extract(tokens(&[
                "UNIVERSITY OF KASHMIR",
                "MARKS CERTIFICATE",
                "Name: Zoya Bashir",
                "Roll No: 2023CS045",
                "Master of Business Administration",
                "MBA401",
                "Financial Management",
                "78",
                "82",
                "TOTAL MARKS 487",
                "PASS",
            ]))
            .unwrap();

        assert_eq!(record.issuing_authority(), Some("UNIVERSITY OF KASHMIR"));
        assert_eq!(record.document_type(), Some("MARKS CERTIFICATE"));
        assert_eq!(record.student().name.as_deref(), Some("Zoya Bashir"));
        assert_eq!(record.student().program.as_deref(), Some("Master of Business Administration"));
        assert_eq!(record.subjects().len(), 1);
        assert_eq!(record.total_marks(), Some("487"));
        assert_eq!(record.result(), Some("PASS"));
        assert_eq!(record.division(), None);
    }

    #[test]
    fn extract_keeps_token_order() {
        let input: Vec<Token> = [(4, "B"), (1, "MBA401"), (9, "A"), (2, "PASS")]
            .iter()
            .map(|(i, t)| Token::new(*i, t, 0.8))
            .collect();
        let record = Extractor::default().extract(input.clone()).unwrap();
        assert_eq!(record.raw_tokens(), input.as_slice());
    }

    #[test]
    fn garbage_input_does_not_panic() {
        let _ = Extractor::default().extract(tokens(&["!@#$%^&*()", "\0\x01", "TOTAL", "ROL", "REG"]));
    }
}
