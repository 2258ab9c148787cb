//! Printable documents: discharge summary, gate pass and PVI (patient visit
//! intimation). Each form is a plain struct assembled from a visit graph and
//! rendered to print-ready HTML.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::Serialize;

use crate::core::data::{NOT_AVAILABLE, NO_DIAGNOSIS, NO_SURGERY};
use crate::error::AppError;
use crate::models::{GatePass, Patient, VisitGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    DischargeSummary,
    GatePass,
    Pvi,
}

impl FromStr for FormKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discharge-summary" => Ok(FormKind::DischargeSummary),
            "gate-pass" => Ok(FormKind::GatePass),
            "pvi" => Ok(FormKind::Pvi),
            other => Err(AppError::NotFound(format!("unknown form '{}'", other))),
        }
    }
}

/// Escape text for HTML element and attribute content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn text_or_na(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(NOT_AVAILABLE)
        .to_string()
}

fn date_or_na(value: Option<chrono::NaiveDate>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |d| d.format("%d-%m-%Y").to_string())
}

const PRINT_CSS: &str = "body{font-family:Arial,sans-serif;font-size:13px;margin:24px}\
h1{text-align:center;font-size:18px;margin-bottom:4px}\
h2{font-size:14px;border-bottom:1px solid #444;margin-top:18px}\
table{width:100%;border-collapse:collapse}\
td{padding:3px 6px;vertical-align:top}td.k{width:30%;font-weight:bold}\
.sign{margin-top:48px;display:flex;justify-content:space-between}\
@media print{body{margin:0}}";

/// Minimal HTML page builder; every piece of text goes through `escape_html`.
struct Page {
    html: String,
}

impl Page {
    fn new(title: &str) -> Self {
        let title = escape_html(title);
        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title>\
             <style>{PRINT_CSS}</style></head><body><h1>{title}</h1>"
        );
        Self { html }
    }

    fn section(&mut self, heading: &str) -> &mut Self {
        let _ = write!(self.html, "<h2>{}</h2>", escape_html(heading));
        self
    }

    fn fields(&mut self, rows: &[(&str, &str)]) -> &mut Self {
        self.html.push_str("<table>");
        for (key, value) in rows {
            let _ = write!(
                self.html,
                "<tr><td class=\"k\">{}</td><td>{}</td></tr>",
                escape_html(key),
                escape_html(value)
            );
        }
        self.html.push_str("</table>");
        self
    }

    fn list(&mut self, items: &[String], empty: &str) -> &mut Self {
        if items.is_empty() {
            let _ = write!(self.html, "<p>{}</p>", escape_html(empty));
            return self;
        }
        self.html.push_str("<ol>");
        for item in items {
            let _ = write!(self.html, "<li>{}</li>", escape_html(item));
        }
        self.html.push_str("</ol>");
        self
    }

    fn signatures(&mut self, left: &str, right: &str) -> &mut Self {
        let _ = write!(
            self.html,
            "<div class=\"sign\"><span>{}</span><span>{}</span></div>",
            escape_html(left),
            escape_html(right)
        );
        self
    }

    fn finish(&mut self) -> String {
        self.html.push_str("</body></html>");
        std::mem::take(&mut self.html)
    }
}

// ===== Discharge summary =====

#[derive(Debug, Clone, Serialize)]
pub struct DischargeSummary {
    pub patient_name: String,
    pub uhid: String,
    pub age: String,
    pub gender: String,
    pub visit_id: String,
    pub visit_type: String,
    pub admission_date: String,
    pub discharge_date: String,
    pub surgery_date: String,
    pub diagnoses: Vec<String>,
    pub surgeries: Vec<String>,
    pub complications: Vec<String>,
    pub medications: Vec<String>,
    pub investigations: Vec<String>,
    pub surgeon: String,
    pub consultant: String,
    pub referee: String,
}

impl DischargeSummary {
    pub fn build(patient: &Patient, graph: &VisitGraph) -> Self {
        let visit = &graph.visit;
        let diagnoses = graph
            .diagnoses
            .iter()
            .map(|d| match &d.diagnosis.icd_code {
                Some(code) => format!("{} ({})", d.diagnosis.name, code),
                None => d.diagnosis.name.clone(),
            })
            .collect();
        let surgeries = graph
            .surgeries
            .iter()
            .map(|s| format!("{} [{}]", s.surgery.name, s.sanction_status))
            .collect();
        let medications = graph
            .medications
            .iter()
            .map(|m| {
                let mut line = m.medication.name.clone();
                for part in [m.dose.as_deref(), m.frequency.as_deref()].into_iter().flatten() {
                    line.push_str(" - ");
                    line.push_str(part);
                }
                if let Some(days) = m.days {
                    let _ = write!(line, " x {} days", days);
                }
                line
            })
            .collect();
        let investigations = graph
            .labs
            .iter()
            .map(|l| format!("Lab: {}", l.name))
            .chain(graph.radiology.iter().map(|r| format!("Radiology: {}", r.name)))
            .collect();

        Self {
            patient_name: patient.name.clone(),
            uhid: patient.patients_id.clone(),
            age: patient.age.map_or_else(|| NOT_AVAILABLE.to_string(), |a| a.to_string()),
            gender: text_or_na(patient.gender.map(|g| g.as_str())),
            visit_id: visit.visit_id.clone(),
            visit_type: visit.visit_type.as_str().to_string(),
            admission_date: date_or_na(visit.admission_date),
            discharge_date: date_or_na(visit.discharge_date),
            surgery_date: date_or_na(visit.surgery_date),
            diagnoses,
            surgeries,
            complications: graph.complications.iter().map(|c| c.name.clone()).collect(),
            medications,
            investigations,
            surgeon: text_or_na(
                graph
                    .hope_surgeon
                    .as_ref()
                    .or(graph.esic_surgeon.as_ref())
                    .map(|s| s.name.as_str()),
            ),
            consultant: text_or_na(graph.hope_consultant.as_ref().map(|c| c.name.as_str())),
            referee: text_or_na(graph.referee.as_ref().map(|r| r.name.as_str())),
        }
    }

    pub fn render_html(&self) -> String {
        Page::new("Discharge Summary")
            .section("Patient")
            .fields(&[
                ("Name", self.patient_name.as_str()),
                ("UHID", self.uhid.as_str()),
                ("Age / Gender", format!("{} / {}", self.age, self.gender).as_str()),
                ("Visit ID", self.visit_id.as_str()),
                ("Visit Type", self.visit_type.as_str()),
            ])
            .section("Dates")
            .fields(&[
                ("Admission", self.admission_date.as_str()),
                ("Surgery", self.surgery_date.as_str()),
                ("Discharge", self.discharge_date.as_str()),
            ])
            .section("Diagnosis")
            .list(&self.diagnoses, NO_DIAGNOSIS)
            .section("Procedures")
            .list(&self.surgeries, NO_SURGERY)
            .section("Complications")
            .list(&self.complications, "None")
            .section("Medication on Discharge")
            .list(&self.medications, "None")
            .section("Investigations")
            .list(&self.investigations, "None")
            .section("Treating Doctors")
            .fields(&[
                ("Surgeon", self.surgeon.as_str()),
                ("Consultant", self.consultant.as_str()),
                ("Referred By", self.referee.as_str()),
            ])
            .signatures("Patient / Attendant", "Treating Doctor")
            .finish()
    }
}

// ===== Gate pass =====

#[derive(Debug, Clone, Serialize)]
pub struct GatePassForm {
    pub gate_pass_no: String,
    pub issued_at: String,
    pub issued_by: String,
    pub patient_name: String,
    pub uhid: String,
    pub visit_id: String,
    pub admission_date: String,
    pub discharge_date: String,
    pub bill_status: String,
    pub bill_cleared: bool,
    pub attendant_name: String,
    pub vehicle_no: String,
    pub remarks: String,
}

impl GatePassForm {
    pub fn build(patient: &Patient, graph: &VisitGraph, pass: &GatePass) -> Self {
        let visit = &graph.visit;
        let bill_status = match (&visit.billing_status, &visit.billing_sub_status) {
            (Some(status), Some(sub)) => format!("{} - {}", status, sub),
            (Some(status), None) => status.clone(),
            _ => NOT_AVAILABLE.to_string(),
        };
        Self {
            gate_pass_no: pass.gate_pass_no.clone(),
            issued_at: pass.issued_at.format("%d-%m-%Y %H:%M").to_string(),
            issued_by: pass.issued_by.clone(),
            patient_name: patient.name.clone(),
            uhid: patient.patients_id.clone(),
            visit_id: visit.visit_id.clone(),
            admission_date: date_or_na(visit.admission_date),
            discharge_date: date_or_na(visit.discharge_date),
            bill_status,
            bill_cleared: pass.bill_cleared,
            attendant_name: text_or_na(pass.attendant_name.as_deref()),
            vehicle_no: text_or_na(pass.vehicle_no.as_deref()),
            remarks: text_or_na(pass.remarks.as_deref()),
        }
    }

    pub fn render_html(&self) -> String {
        Page::new("Gate Pass")
            .fields(&[
                ("Gate Pass No", self.gate_pass_no.as_str()),
                ("Issued", self.issued_at.as_str()),
                ("Issued By", self.issued_by.as_str()),
            ])
            .section("Patient")
            .fields(&[
                ("Name", self.patient_name.as_str()),
                ("UHID", self.uhid.as_str()),
                ("Visit ID", self.visit_id.as_str()),
                ("Admission", self.admission_date.as_str()),
                ("Discharge", self.discharge_date.as_str()),
            ])
            .section("Billing")
            .fields(&[
                ("Bill Status", self.bill_status.as_str()),
                ("Bill Cleared", if self.bill_cleared { "Yes" } else { "No" }),
            ])
            .section("Exit")
            .fields(&[
                ("Attendant", self.attendant_name.as_str()),
                ("Vehicle No", self.vehicle_no.as_str()),
                ("Remarks", self.remarks.as_str()),
            ])
            .signatures("Billing Department", "Security")
            .finish()
    }
}

// ===== PVI =====

/// Patient visit intimation sent to the payer before a planned procedure.
#[derive(Debug, Clone, Serialize)]
pub struct PviForm {
    pub patient_name: String,
    pub uhid: String,
    pub age: String,
    pub gender: String,
    pub phone: String,
    pub corporate: String,
    pub insurance_person_no: String,
    pub visit_id: String,
    pub visit_date: String,
    pub reason_for_visit: String,
    pub referee: String,
    pub diagnosis: String,
    pub surgery: String,
    pub surgery_code: String,
    pub sanction_status: String,
    pub surgeon: String,
}

impl PviForm {
    pub fn build(patient: &Patient, graph: &VisitGraph) -> Self {
        let visit = &graph.visit;
        let surgery = graph.primary_surgery();
        Self {
            patient_name: patient.name.clone(),
            uhid: patient.patients_id.clone(),
            age: patient.age.map_or_else(|| NOT_AVAILABLE.to_string(), |a| a.to_string()),
            gender: text_or_na(patient.gender.map(|g| g.as_str())),
            phone: text_or_na(patient.phone.as_deref()),
            corporate: text_or_na(patient.corporate.as_deref()),
            insurance_person_no: text_or_na(patient.insurance_person_no.as_deref()),
            visit_id: visit.visit_id.clone(),
            visit_date: visit.visit_date.format("%d-%m-%Y").to_string(),
            reason_for_visit: text_or_na(visit.reason_for_visit.as_deref()),
            referee: text_or_na(graph.referee.as_ref().map(|r| r.name.as_str())),
            diagnosis: graph
                .primary_diagnosis()
                .map_or_else(|| NO_DIAGNOSIS.to_string(), |d| d.name.clone()),
            surgery: surgery.map_or_else(|| NO_SURGERY.to_string(), |s| s.surgery.name.clone()),
            surgery_code: text_or_na(surgery.and_then(|s| s.surgery.code.as_deref())),
            sanction_status: surgery
                .map(|s| s.sanction_status)
                .unwrap_or_default()
                .to_string(),
            surgeon: text_or_na(
                graph
                    .esic_surgeon
                    .as_ref()
                    .or(graph.hope_surgeon.as_ref())
                    .map(|s| s.name.as_str()),
            ),
        }
    }

    pub fn render_html(&self) -> String {
        Page::new("Patient Visit Intimation")
            .section("Beneficiary")
            .fields(&[
                ("Name", self.patient_name.as_str()),
                ("UHID", self.uhid.as_str()),
                ("Age / Gender", format!("{} / {}", self.age, self.gender).as_str()),
                ("Phone", self.phone.as_str()),
                ("Corporate", self.corporate.as_str()),
                ("Insurance Person No", self.insurance_person_no.as_str()),
            ])
            .section("Visit")
            .fields(&[
                ("Visit ID", self.visit_id.as_str()),
                ("Visit Date", self.visit_date.as_str()),
                ("Reason", self.reason_for_visit.as_str()),
                ("Referred By", self.referee.as_str()),
            ])
            .section("Proposed Treatment")
            .fields(&[
                ("Diagnosis", self.diagnosis.as_str()),
                ("Procedure", self.surgery.as_str()),
                ("Package Code", self.surgery_code.as_str()),
                ("Sanction Status", self.sanction_status.as_str()),
                ("Surgeon", self.surgeon.as_str()),
            ])
            .signatures("Medical Superintendent", "Treating Surgeon")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::master::Surgery;
    use crate::models::visit::VisitSurgery;
    use crate::models::{NewPatient, NewVisit, SanctionStatus, VisitType};
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn fixture() -> (Patient, VisitGraph) {
        let patient = NewPatient {
            name: "Ravi <Kumar>".into(),
            age: Some(42),
            corporate: Some("ESIC".into()),
            ..Default::default()
        }
        .into_patient("UHID2406150001".into());
        let mut visit = NewVisit {
            patient_id: patient.id,
            visit_type: VisitType::Ipd,
            visit_date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            admission_date: NaiveDate::from_ymd_opt(2024, 6, 15),
            surgery_date: None,
            reason_for_visit: Some("Pain abdomen".into()),
            appointment_with: None,
            referee_id: None,
            hope_surgeon_id: None,
            hope_consultant_id: None,
            esic_surgeon_id: None,
        }
        .into_visit("IH24061501".into());
        visit.discharge_date = NaiveDate::from_ymd_opt(2024, 6, 20);
        (patient, VisitGraph::bare(visit))
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>\"A&B\"</b>"), "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;");
    }

    #[test]
    fn form_kind_parses_route_segments() {
        assert_eq!("pvi".parse::<FormKind>().unwrap(), FormKind::Pvi);
        assert!("invoice".parse::<FormKind>().is_err());
    }

    #[test]
    fn discharge_summary_escapes_patient_text() {
        let (patient, graph) = fixture();
        let html = DischargeSummary::build(&patient, &graph).render_html();
        assert!(html.contains("Ravi &lt;Kumar&gt;"));
        assert!(!html.contains("<Kumar>"));
        assert!(html.contains("20-06-2024"));
        assert!(html.contains(NO_SURGERY));
    }

    #[test]
    fn pvi_uses_primary_surgery() {
        let (patient, mut graph) = fixture();
        graph.surgeries.push(VisitSurgery {
            surgery: Surgery {
                id: None,
                name: "Lap Appendicectomy".into(),
                code: Some("CGHS-412".into()),
                category: None,
                nabh_rate: None,
                non_nabh_rate: None,
                description: None,
                created_at: None,
            },
            sanction_status: SanctionStatus::Pending,
            is_primary: true,
        });
        let form = PviForm::build(&patient, &graph);
        assert_eq!(form.surgery, "Lap Appendicectomy");
        assert_eq!(form.sanction_status, "Pending");
        assert_eq!(form.corporate, "ESIC");
        assert_eq!(form.surgeon, NOT_AVAILABLE);
        assert!(form.render_html().contains("CGHS-412"));
    }

    #[test]
    fn gate_pass_shows_bill_state() {
        let (patient, mut graph) = fixture();
        graph.visit.billing_status = Some("Paid".into());
        graph.visit.billing_sub_status = Some("Payment Received".into());
        let pass = GatePass {
            id: Uuid::new_v4(),
            visit_id: graph.visit.id,
            gate_pass_no: "GP-20240620-001".into(),
            issued_at: Utc::now(),
            issued_by: "billing".into(),
            bill_cleared: true,
            attendant_name: None,
            vehicle_no: Some("MH31 AB 1234".into()),
            remarks: None,
        };
        let form = GatePassForm::build(&patient, &graph, &pass);
        assert_eq!(form.bill_status, "Paid - Payment Received");
        let html = form.render_html();
        assert!(html.contains("GP-20240620-001"));
        assert!(html.contains("MH31 AB 1234"));
    }
}
