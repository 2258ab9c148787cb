//! Benchmarks for the visit flattening pipeline and CSV import
//!
//! Run with: cargo bench --bench api_benchmarks

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fake::faker::address::en::CityName;
use fake::faker::name::en::Name;
use fake::Fake;
use uuid::Uuid;

use hmis::core::data::{group_by_surgery_category, transform_patients_data};
use hmis::core::import::{parse_masters, parse_patients, ImportOptions};
use hmis::models::master::Surgery;
use hmis::models::visit::VisitSurgery;
use hmis::models::{
    MasterKind, NewPatient, NewVisit, PatientGraph, SanctionStatus, VisitGraph, VisitType,
};

const CATEGORIES: [&str; 4] = ["General Surgery", "Orthopaedics", "Urology", "ENT"];

fn surgery(i: usize) -> VisitSurgery {
    VisitSurgery {
        surgery: Surgery {
            id: Some(Uuid::new_v4()),
            name: format!("Procedure {}", i),
            code: Some(format!("S-{:03}", i)),
            category: Some(CATEGORIES[i % CATEGORIES.len()].to_string()),
            nabh_rate: Some(25000.0),
            non_nabh_rate: Some(21000.0),
            description: None,
            created_at: None,
        },
        sanction_status: SanctionStatus::Sanctioned,
        is_primary: true,
    }
}

fn patient_graphs(patients: usize, visits_per_patient: usize) -> Vec<PatientGraph> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..patients)
        .map(|p| {
            let patient = NewPatient {
                name: Name().fake(),
                age: Some((1..90).fake()),
                address: Some(CityName().fake()),
                ..Default::default()
            }
            .into_patient(format!("UHID240101{:04}", p));
            let visits = (0..visits_per_patient)
                .map(|v| {
                    let visit_date = start + Duration::days(((p * visits_per_patient + v) % 365) as i64);
                    let visit = NewVisit {
                        patient_id: patient.id,
                        visit_type: VisitType::Ipd,
                        visit_date,
                        admission_date: Some(visit_date),
                        surgery_date: None,
                        reason_for_visit: None,
                        appointment_with: None,
                        referee_id: None,
                        hope_surgeon_id: None,
                        hope_consultant_id: None,
                        esic_surgeon_id: None,
                    }
                    .into_visit(format!("IH{:06}{:02}", p, v));
                    let mut graph = VisitGraph::bare(visit);
                    // Every third visit has no surgery to exercise the defaults.
                    if v % 3 != 0 {
                        graph.surgeries.push(surgery(p + v));
                    }
                    graph
                })
                .collect();
            PatientGraph { patient, visits }
        })
        .collect()
}

fn bench_flattening(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten_visits");
    for patients in [100usize, 1_000, 5_000] {
        let graphs = patient_graphs(patients, 3);
        group.bench_with_input(BenchmarkId::from_parameter(patients), &graphs, |b, graphs| {
            b.iter(|| group_by_surgery_category(transform_patients_data(black_box(graphs))))
        });
    }
    group.finish();
}

fn master_csv(rows: usize) -> String {
    let mut csv = String::from("Name,Code,Category,NABH Rate,Non NABH Rate\n");
    for i in 0..rows {
        csv.push_str(&format!(
            "Procedure {},S-{:04},{},{}.00,{}.50\n",
            i,
            i,
            CATEGORIES[i % CATEGORIES.len()],
            20000 + i,
            18000 + i
        ));
    }
    csv
}

fn patient_tsv(rows: usize) -> String {
    let mut tsv = String::from("Patient Name\tAge\tGender\tPhone\n");
    for i in 0..rows {
        let name: String = Name().fake();
        tsv.push_str(&format!(
            "{}\t{}\t{}\t98{:08}\n",
            name,
            20 + i % 60,
            if i % 2 == 0 { "M" } else { "F" },
            i
        ));
    }
    tsv
}

fn bench_import(c: &mut Criterion) {
    let options = ImportOptions::default();

    let mut group = c.benchmark_group("import");
    for rows in [1_000usize, 10_000] {
        let csv = master_csv(rows);
        group.bench_with_input(BenchmarkId::new("surgery_csv", rows), &csv, |b, csv| {
            b.iter(|| parse_masters(MasterKind::Surgery, black_box(csv), &options).unwrap())
        });

        let tsv = patient_tsv(rows);
        group.bench_with_input(BenchmarkId::new("patient_tsv", rows), &tsv, |b, tsv| {
            b.iter(|| parse_patients(black_box(tsv), &options).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_flattening, bench_import);
criterion_main!(benches);
