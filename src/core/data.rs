//! Flattening of the nested patient graph into per-visit rows.

use std::collections::BTreeMap;

use crate::models::{PatientGraph, VisitGraph, VisitRow};

pub const NOT_AVAILABLE: &str = "N/A";
pub const NO_SURGERY: &str = "No Surgery Assigned";
pub const UNCATEGORIZED: &str = "Uncategorized";
pub const NO_DIAGNOSIS: &str = "No Diagnosis";
pub const NO_COMPLICATIONS: &str = "None";

fn or_na(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn joined<'a>(names: impl Iterator<Item = &'a str>, empty: &str) -> String {
    let names: Vec<&str> = names.filter(|n| !n.trim().is_empty()).collect();
    if names.is_empty() {
        empty.to_string()
    } else {
        names.join(", ")
    }
}

fn visit_row(graph: &PatientGraph, visit: &VisitGraph) -> VisitRow {
    let patient = &graph.patient;
    let v = &visit.visit;
    let surgery = visit.primary_surgery();

    // Primary diagnosis leads, the rest follow in stored order.
    let primary = visit.primary_diagnosis();
    let diagnoses = primary
        .into_iter()
        .chain(
            visit
                .diagnoses
                .iter()
                .map(|d| &d.diagnosis)
                .filter(|d| !primary.map_or(false, |p| std::ptr::eq(p, *d))),
        )
        .map(|d| d.name.as_str());

    VisitRow {
        patient_uuid: patient.id,
        visit_uuid: v.id,
        patients_id: patient.patients_id.clone(),
        visit_id: v.visit_id.clone(),
        patient_name: or_na(Some(patient.name.as_str())),
        age: patient.age.map_or_else(|| NOT_AVAILABLE.to_string(), |a| a.to_string()),
        gender: or_na(patient.gender.as_ref().map(|g| g.as_str())),
        phone: or_na(patient.phone.as_deref()),
        corporate: or_na(patient.corporate.as_deref()),
        insurance_person_no: or_na(patient.insurance_person_no.as_deref()),
        visit_type: v.visit_type.as_str().to_string(),
        visit_date: v.visit_date,
        admission_date: or_na(v.admission_date.map(|d| d.to_string()).as_deref()),
        discharge_date: or_na(v.discharge_date.map(|d| d.to_string()).as_deref()),
        status: v.status.as_str().to_string(),
        diagnosis: joined(diagnoses, NO_DIAGNOSIS),
        surgery: surgery.map_or_else(|| NO_SURGERY.to_string(), |s| or_na(Some(s.surgery.name.as_str()))),
        surgery_code: or_na(surgery.and_then(|s| s.surgery.code.as_deref())),
        surgery_category: match surgery {
            Some(s) => match s.surgery.category.as_deref().map(str::trim) {
                Some(c) if !c.is_empty() => c.to_string(),
                _ => UNCATEGORIZED.to_string(),
            },
            None => UNCATEGORIZED.to_string(),
        },
        sanction_status: surgery
            .map(|s| s.sanction_status)
            .unwrap_or_default()
            .to_string(),
        complications: joined(visit.complications.iter().map(|c| c.name.as_str()), NO_COMPLICATIONS),
        referee: or_na(visit.referee.as_ref().map(|r| r.name.as_str())),
        surgeon: or_na(
            visit
                .hope_surgeon
                .as_ref()
                .or(visit.esic_surgeon.as_ref())
                .map(|s| s.name.as_str()),
        ),
        consultant: or_na(visit.hope_consultant.as_ref().map(|c| c.name.as_str())),
        billing_status: or_na(v.billing_status.as_deref()),
        billing_sub_status: or_na(v.billing_sub_status.as_deref()),
    }
}

/// One row per (patient, visit); patients without visits produce nothing.
/// Rows come back newest visit first, ties broken by visit id.
pub fn transform_patients_data(patients: &[PatientGraph]) -> Vec<VisitRow> {
    let mut rows: Vec<VisitRow> = patients
        .iter()
        .flat_map(|graph| graph.visits.iter().map(move |visit| visit_row(graph, visit)))
        .collect();
    rows.sort_by(|a, b| {
        b.visit_date
            .cmp(&a.visit_date)
            .then_with(|| a.visit_id.cmp(&b.visit_id))
    });
    rows
}

/// Bucket rows by surgery category, keeping row order within each bucket.
pub fn group_by_surgery_category(rows: Vec<VisitRow>) -> BTreeMap<String, Vec<VisitRow>> {
    let mut groups: BTreeMap<String, Vec<VisitRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.surgery_category.clone()).or_default().push(row);
    }
    groups
}

/// Case-insensitive match on name, UHID, visit id and phone.
pub fn filter_rows(rows: Vec<VisitRow>, search: &str) -> Vec<VisitRow> {
    let needle = search.trim().to_lowercase();
    if needle.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| {
            [&row.patient_name, &row.patients_id, &row.visit_id, &row.phone]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .collect()
}
