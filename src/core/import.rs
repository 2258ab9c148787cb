//! CSV / TSV import for master tables and patients.
//!
//! The header line decides everything: the delimiter is sniffed from it and
//! every header is normalised and matched against the aliases of the target's
//! columns. Unknown columns are ignored; a missing required column rejects the
//! file before any row is looked at.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use validator::Validate;

use crate::models::{Gender, MasterKind, NewPatient};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import file is empty")]
    Empty,

    #[error("missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("{} row(s) rejected: {}", .0.len(), describe_rows(.0))]
    InvalidRows(Vec<RowError>),

    #[error("malformed import file: {0}")]
    Malformed(#[from] csv::Error),
}

fn describe_rows(rows: &[RowError]) -> String {
    rows.iter()
        .map(|r| format!("line {}: {}", r.line, r.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A row that could not be imported, by 1-based line number in the file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    /// Any bad row fails the whole import.
    #[default]
    Abort,
    /// Import the good rows, report the bad ones.
    Skip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    Comma,
    Tab,
}

impl Delimiter {
    fn byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
        }
    }

    /// Tab wins when the header has at least as many tabs as commas.
    pub fn sniff(header_line: &str) -> Self {
        let tabs = header_line.matches('\t').count();
        let commas = header_line.matches(',').count();
        if tabs > 0 && tabs >= commas {
            Delimiter::Tab
        } else {
            Delimiter::Comma
        }
    }
}

/// Import options, taken from the query string.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ImportOptions {
    #[serde(default)]
    pub delimiter: Option<Delimiter>,
    #[serde(default)]
    pub on_error: ErrorHandling,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub total_rows: usize,
    pub skipped: Vec<RowError>,
}

/// Rows that passed parsing and validation, plus the ones that were skipped.
#[derive(Debug)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub skipped: Vec<RowError>,
    pub total_rows: usize,
}

impl<T> Parsed<T> {
    pub fn report(&self, imported: usize) -> ImportReport {
        ImportReport {
            imported,
            total_rows: self.total_rows,
            skipped: self.skipped.clone(),
        }
    }
}

// ===== Column mapping =====

#[derive(Clone, Copy, Debug, PartialEq)]
enum CellType {
    Text,
    Number,
    Integer,
    Date,
    Gender,
}

#[derive(Clone, Copy, Debug)]
struct ColumnSpec {
    field: &'static str,
    aliases: &'static [&'static str],
    required: bool,
    cell: CellType,
}

const fn column(field: &'static str, aliases: &'static [&'static str], cell: CellType) -> ColumnSpec {
    ColumnSpec {
        field,
        aliases,
        required: false,
        cell,
    }
}

const fn required(field: &'static str, aliases: &'static [&'static str]) -> ColumnSpec {
    ColumnSpec {
        field,
        aliases,
        required: true,
        cell: CellType::Text,
    }
}

/// Lowercase, `_`/`-` to spaces, collapse whitespace, drop a UTF-8 BOM.
pub fn normalize_header(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .replace(['_', '-', '.'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn master_name_aliases(kind: MasterKind) -> &'static [&'static str] {
    match kind {
        MasterKind::Diagnosis => &["name", "diagnosis", "diagnosis name"],
        MasterKind::Complication => &["name", "complication", "complication name"],
        MasterKind::Surgery => &["name", "surgery", "surgery name", "procedure", "procedure name"],
        MasterKind::Medication => &["name", "medication", "medicine", "drug", "drug name"],
        MasterKind::Lab => &["name", "test", "test name", "lab test", "investigation"],
        MasterKind::Radiology => &["name", "study", "radiology", "investigation"],
        MasterKind::HopeSurgeon | MasterKind::EsicSurgeon => &["name", "surgeon", "doctor", "doctor name"],
        MasterKind::HopeConsultant => &["name", "consultant", "doctor", "doctor name"],
        MasterKind::Referee => &["name", "referee", "referral doctor", "referred by"],
    }
}

fn master_column(field: &'static str) -> ColumnSpec {
    match field {
        "icd_code" => column(field, &["icd code", "icd", "icd10", "icd 10 code"], CellType::Text),
        "code" => column(field, &["code", "surgery code", "cghs code", "package code"], CellType::Text),
        "nabh_rate" => column(field, &["nabh rate", "nabh", "rate nabh"], CellType::Number),
        "non_nabh_rate" => column(field, &["non nabh rate", "non nabh", "rate non nabh"], CellType::Number),
        "price" => column(field, &["price", "rate", "cost", "amount"], CellType::Number),
        "generic_name" => column(field, &["generic name", "generic"], CellType::Text),
        "category" => column(field, &["category", "type", "speciality category"], CellType::Text),
        "dosage" => column(field, &["dosage", "dose", "strength"], CellType::Text),
        "specialty" => column(field, &["specialty", "speciality", "specialization"], CellType::Text),
        "department" => column(field, &["department", "dept"], CellType::Text),
        "institution" => column(field, &["institution", "hospital", "clinic"], CellType::Text),
        "contact_info" => column(field, &["contact info", "contact", "phone", "mobile"], CellType::Text),
        "description" => column(field, &["description", "details", "notes", "remarks"], CellType::Text),
        other => column(other, &[], CellType::Text),
    }
}

fn master_columns(kind: MasterKind) -> Vec<ColumnSpec> {
    kind.columns()
        .iter()
        .map(|&field| match field {
            "name" => required("name", master_name_aliases(kind)),
            other => master_column(other),
        })
        .collect()
}

const PATIENT_COLUMNS: &[ColumnSpec] = &[
    required("name", &["name", "patient name", "full name", "patient"]),
    column("age", &["age", "age years"], CellType::Integer),
    column("gender", &["gender", "sex"], CellType::Gender),
    column("phone", &["phone", "mobile", "phone number", "mobile number", "contact"], CellType::Text),
    column("address", &["address", "residence"], CellType::Text),
    column("date_of_birth", &["date of birth", "dob", "birth date"], CellType::Date),
    column(
        "insurance_person_no",
        &["insurance person no", "insurance no", "insurance number", "ip no", "ipno"],
        CellType::Text,
    ),
    column("corporate", &["corporate", "payer", "scheme", "panel"], CellType::Text),
];

fn parse_date(value: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

fn convert_cell(spec: &ColumnSpec, raw: &str) -> Result<Value, String> {
    match spec.cell {
        CellType::Text => Ok(Value::String(raw.to_string())),
        CellType::Number => raw
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("{} '{}' is not a number", spec.field, raw)),
        CellType::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("{} '{}' is not a whole number", spec.field, raw)),
        CellType::Date => parse_date(raw)
            .map(|d| Value::String(d.to_string()))
            .ok_or_else(|| format!("{} '{}' is not a date", spec.field, raw)),
        CellType::Gender => Gender::parse(raw)
            .map(|g| Value::String(g.as_str().to_string()))
            .ok_or_else(|| format!("{} '{}' is not a recognised gender", spec.field, raw)),
    }
}

// ===== Parsing =====

fn parse_with<T>(
    data: &str,
    specs: &[ColumnSpec],
    options: &ImportOptions,
    convert: impl Fn(Map<String, Value>) -> Result<T, String>,
) -> Result<Parsed<T>, ImportError> {
    let data = data.trim_start_matches('\u{feff}');
    let header_line = data.lines().find(|l| !l.trim().is_empty()).ok_or(ImportError::Empty)?;
    let delimiter = options.delimiter.unwrap_or_else(|| Delimiter::sniff(header_line));

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter.byte())
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();

    // Column index for each spec; first matching header wins.
    let mapping: Vec<(ColumnSpec, Option<usize>)> = specs
        .iter()
        .map(|spec| {
            let index = headers.iter().position(|h| {
                h == &normalize_header(spec.field) || spec.aliases.iter().any(|alias| h == alias)
            });
            (*spec, index)
        })
        .collect();

    let missing: Vec<String> = mapping
        .iter()
        .filter(|(spec, index)| spec.required && index.is_none())
        .map(|(spec, _)| spec.field.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ImportError::MissingColumns(missing));
    }

    let mut records = Vec::new();
    let mut errors = Vec::new();
    let mut total_rows = 0;

    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        total_rows += 1;
        let line = record.position().map_or(total_rows + 1, |p| p.line() as usize);

        let mut doc = Map::new();
        let mut problems = Vec::new();
        for (spec, index) in &mapping {
            let raw = index.and_then(|i| record.get(i)).unwrap_or_default();
            if raw.is_empty() {
                if spec.required {
                    problems.push(format!("{} is required", spec.field));
                }
                continue;
            }
            match convert_cell(spec, raw) {
                Ok(value) => {
                    doc.insert(spec.field.to_string(), value);
                }
                Err(message) => problems.push(message),
            }
        }

        let outcome = if problems.is_empty() {
            convert(doc)
        } else {
            Err(problems.join(", "))
        };
        match outcome {
            Ok(value) => records.push(value),
            Err(message) => errors.push(RowError { line, message }),
        }
    }

    if options.on_error == ErrorHandling::Abort && !errors.is_empty() {
        return Err(ImportError::InvalidRows(errors));
    }
    Ok(Parsed {
        records,
        skipped: errors,
        total_rows,
    })
}

/// Parse a master table file into documents already normalised for `kind`.
pub fn parse_masters(kind: MasterKind, data: &str, options: &ImportOptions) -> Result<Parsed<Value>, ImportError> {
    parse_with(data, &master_columns(kind), options, |doc| {
        kind.normalize(Value::Object(doc)).map_err(|e| e.to_string())
    })
}

/// Parse a patient file into validated registration forms.
pub fn parse_patients(data: &str, options: &ImportOptions) -> Result<Parsed<NewPatient>, ImportError> {
    parse_with(data, PATIENT_COLUMNS, options, |doc| {
        let patient: NewPatient = serde_json::from_value(Value::Object(doc)).map_err(|e| e.to_string())?;
        let patient = patient.normalized();
        patient
            .validate()
            .map_err(|e| crate::error::AppError::from(e).to_string())?;
        Ok(patient)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn skip() -> ImportOptions {
        ImportOptions {
            delimiter: None,
            on_error: ErrorHandling::Skip,
        }
    }

    #[test_case("Surgery Name", "surgery name" ; "spaces and case")]
    #[test_case("NON_NABH_RATE", "non nabh rate" ; "underscores")]
    #[test_case("\u{feff}  ICD-Code ", "icd code" ; "bom and dashes")]
    fn headers_are_normalised(raw: &str, expected: &str) {
        assert_eq!(normalize_header(raw), expected);
    }

    #[test_case("name\tcode\tcategory", Delimiter::Tab ; "tab separated")]
    #[test_case("name,code,category", Delimiter::Comma ; "comma separated")]
    #[test_case("name", Delimiter::Comma ; "single column")]
    fn delimiter_is_sniffed_from_header(header: &str, expected: Delimiter) {
        assert_eq!(Delimiter::sniff(header), expected);
    }

    #[test]
    fn missing_required_column_imports_nothing() {
        let data = "code,category\nS-1,General\nS-2,Ortho\n";
        let err = parse_masters(MasterKind::Surgery, data, &skip()).unwrap_err();
        match err {
            ImportError::MissingColumns(columns) => assert_eq!(columns, vec!["name".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tsv_surgeries_map_aliases_and_numbers() {
        let data = "Surgery Name\tCGHS Code\tCategory\tNABH Rate\tNon NABH Rate\tColour\n\
                    Lap Cholecystectomy\tS-101\tGeneral Surgery\t\"25,000\"\t21250.5\tred\n";
        let parsed = parse_masters(MasterKind::Surgery, data, &ImportOptions::default()).unwrap();
        assert_eq!(parsed.total_rows, 1);
        let doc = &parsed.records[0];
        assert_eq!(doc["name"], "Lap Cholecystectomy");
        assert_eq!(doc["code"], "S-101");
        assert_eq!(doc["nabh_rate"], 25000.0);
        assert_eq!(doc["non_nabh_rate"], 21250.5);
        assert!(doc.get("colour").is_none());
    }

    #[test]
    fn abort_rejects_whole_file_on_bad_row() {
        let data = "name,price\nCBC,350\n,120\nLFT,abc\n";
        let err = parse_masters(MasterKind::Lab, data, &ImportOptions::default()).unwrap_err();
        match err {
            ImportError::InvalidRows(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0].line, 3);
                assert_eq!(rows[1].line, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn skip_keeps_good_rows_and_reports_bad_ones() {
        let data = "name,price\nCBC,350\n,120\nLFT,abc\nKFT,600\n";
        let parsed = parse_masters(MasterKind::Lab, data, &skip()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.total_rows, 4);
        assert_eq!(parsed.skipped.len(), 2);
        assert!(parsed.skipped[1].message.contains("price"));
    }

    #[test]
    fn blank_lines_are_not_rows() {
        let data = "name\nFever\n\n\nBleeding\n";
        let parsed = parse_masters(MasterKind::Complication, data, &ImportOptions::default()).unwrap();
        assert_eq!(parsed.total_rows, 2);
    }

    #[test]
    fn empty_file_is_an_error() {
        assert!(matches!(
            parse_masters(MasterKind::Diagnosis, "  \n", &ImportOptions::default()),
            Err(ImportError::Empty)
        ));
    }

    #[test]
    fn patients_are_validated_per_row() {
        let data = "Patient Name,Age,Sex,Mobile,DOB,Payer\n\
                    Ravi Kumar,42,M,9876543210,15/08/1982,ESIC\n\
                    Asha Rao,29,F,12345,,CGHS\n\
                    Kiran,abc,F,,,\n";
        let parsed = parse_patients(data, &skip()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        let ravi = &parsed.records[0];
        assert_eq!(ravi.gender, Some(Gender::Male));
        assert_eq!(ravi.date_of_birth, NaiveDate::from_ymd_opt(1982, 8, 15));
        assert_eq!(ravi.corporate.as_deref(), Some("ESIC"));

        let lines: Vec<usize> = parsed.skipped.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![3, 4]);
        assert!(parsed.skipped[0].message.contains("phone"));
    }

    #[test]
    fn explicit_delimiter_overrides_sniffing() {
        let options = ImportOptions {
            delimiter: Some(Delimiter::Tab),
            on_error: ErrorHandling::Abort,
        };
        let data = "name,icd code\nFever,R50\n";
        assert!(matches!(
            parse_masters(MasterKind::Diagnosis, data, &options),
            Err(ImportError::MissingColumns(_))
        ));
    }
}
