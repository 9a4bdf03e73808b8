//! Seed records written by Bootstrap

use crate::types::{Approval, Issuer, Payload, Record};

fn certificate_url(id: &str) -> String {
    format!("https://example.com/certificates/{}", id)
}

/// The fixed reference data set
pub fn seed_records() -> Vec<Record> {
    vec![
        Record {
            record_id: "CERT-2025-ORG1-00001".into(),
            subject_id: Some("learner001".into()),
            issuer: Some(Issuer::new("issuer123", "2025-11-29T10:30:00Z")),
            approval: Some(Approval {
                approver_ids: vec!["approver77".into()],
                stages: vec!["Issued".into()],
                approved: true,
                approved_at: Some("2025-11-30T14:00:00Z".into()),
                ..Default::default()
            }),
            payload: Some(
                Payload::new()
                    .with("name", "National Apprenticeship Certificate")
                    .with("category", "Master of Agriculture")
                    .with("institution", "Skill Institute of Agriculture")
                    .with("level", "Level 4"),
            ),
            status: Some("Issued".into()),
            url: Some(certificate_url("CERT-2025-ORG1-00001")),
            ..Default::default()
        },
        Record {
            record_id: "CERT-2025-ORG1-00002".into(),
            subject_id: Some("learner002".into()),
            issuer: Some(Issuer::new("issuer456", "2025-12-01T09:00:00Z")),
            approval: Some(Approval {
                approver_ids: vec!["approver88".into()],
                stages: vec!["Pending".into()],
                approved: false,
                approved_at: None,
                ..Default::default()
            }),
            payload: Some(
                Payload::new()
                    .with("name", "Software Development Certificate")
                    .with("category", "Full Stack Development")
                    .with("institution", "Tech Academy")
                    .with("level", "Level 5"),
            ),
            status: Some("Pending".into()),
            url: Some(certificate_url("CERT-2025-ORG1-00002")),
            ..Default::default()
        },
        Record {
            record_id: "CERT-2025-ORG1-00003".into(),
            subject_id: Some("learner003".into()),
            issuer: Some(Issuer::new("issuer789", "2025-12-02T11:15:00Z")),
            approval: Some(Approval {
                approver_ids: vec!["approver77".into(), "approver88".into()],
                stages: vec!["Approved".into(), "Approved".into()],
                approved: true,
                approved_at: Some("2025-12-02T12:00:00Z".into()),
                ..Default::default()
            }),
            payload: Some(
                Payload::new()
                    .with("name", "Professional Data Science Certificate")
                    .with("category", "Machine Learning and AI")
                    .with("institution", "Data Science Institute")
                    .with("level", "Level 6")
                    .with("duration", "12 months")
                    .with("grade", "A+"),
            ),
            status: Some("Issued".into()),
            url: Some(certificate_url("CERT-2025-ORG1-00003")),
            ..Default::default()
        },
    ]
}
