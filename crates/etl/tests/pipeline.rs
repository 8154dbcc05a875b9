#![forbid(unsafe_code)]

use sdb_core::{ColumnValue, FileIdentity, Section, SidecarDocument};
use sdb_etl::{MappingSet, SidecarSet, extract, load, read_script, transform, write_script};
use sdb_core::mapping::MappingTable;
use sdb_storage::{DEFAULT_SCHEMA, Gateway};
use serde_json::json;
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("sdb_etl_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn mapping_set() -> MappingSet {
    let mut set = MappingSet::new();
    set.insert(
        Section::Files,
        MappingTable::parse(
            "Attribute,field_name\n\
             file_id,file_id\n\
             file_path,file_path\n\
             subject_id,AUTO\n\
             transform_id,AUTO\n\
             file_type,file_type\n\
             file_origin,file_origin\n",
        )
        .expect("files mapping"),
    );
    set.insert(
        Section::Bids,
        MappingTable::parse(
            "Attribute,field_name\n\
             file_id,file_id\n\
             bids_subject,bids_subject\n\
             bids_session,bids_session\n\
             bids_acquisition,FUNC(protocol_name;'MR-'+protocol_name)\n",
        )
        .expect("bids mapping"),
    );
    set.insert(
        Section::Labels,
        MappingTable::parse(
            "file_id,file_id\n\
             hemisphere,hemisphere\n\
             structure,structure\n",
        )
        .expect("labels mapping"),
    );
    set
}

fn scan_document(content: &[u8], path: &str, protocol: &str) -> SidecarDocument {
    let id = FileIdentity::of_bytes(content).to_string();
    SidecarDocument::from_value(&json!({
        "files": { "file_id": id, "file_path": path, "file_type": "Raw image" },
        "bids": {
            "file_id": id,
            "bids_subject": "CF07",
            "bids_session": "Pre",
            "protocol_name": protocol
        }
    }))
    .expect("document")
}

#[test]
fn sibling_writes_stay_grouped_per_record() {
    let mut docs = SidecarSet::new();
    docs.insert(
        PathBuf::from("a_sidecar.json"),
        scan_document(b"bytes-a", "sub-CF07/anat/sub-CF07_T1w.nii.gz", "WAIR"),
    );
    let id = FileIdentity::of_bytes(b"bytes-b").to_string();
    docs.insert(
        PathBuf::from("b_sidecar.json"),
        SidecarDocument::from_value(&json!({
            "files": { "file_id": id, "file_path": "sub-CF07/sub-CF07_R-STN_label.nii.gz" },
            "bids": { "file_id": id, "bids_subject": "CF07", "protocol_name": "WAIR" },
            "labels": { "file_id": id, "hemisphere": "R", "structure": "STN" }
        }))
        .expect("label document"),
    );

    let records = extract(&docs).expect("extract");
    let batches = transform(&records, &mapping_set(), 4).expect("transform");
    assert_eq!(batches.len(), 2);

    let plain = batches
        .iter()
        .find(|b| b.source == PathBuf::from("a_sidecar.json"))
        .expect("plain record");
    let tables: Vec<&str> = plain.writes.iter().map(|w| w.table.as_str()).collect();
    assert_eq!(tables, vec!["files", "bids"]);

    let labeled = batches
        .iter()
        .find(|b| b.source == PathBuf::from("b_sidecar.json"))
        .expect("labeled record");
    let tables: Vec<&str> = labeled.writes.iter().map(|w| w.table.as_str()).collect();
    assert_eq!(tables, vec!["files", "bids", "labels"]);
}

#[test]
fn auto_resolves_to_null_and_misses_do_not_abort_the_row() {
    let mut docs = SidecarSet::new();
    // No `file_origin` anywhere in the document: the pass-through misses.
    docs.insert(
        PathBuf::from("a_sidecar.json"),
        scan_document(b"bytes-a", "sub-CF07/anat/sub-CF07_T1w.nii.gz", "WAIR"),
    );

    let records = extract(&docs).expect("extract");
    let batches = transform(&records, &mapping_set(), 1).expect("transform");
    let files = &batches[0].writes[0];
    assert_eq!(files.table, "files");
    assert_eq!(files.values.get("subject_id"), Some(&ColumnValue::Null));
    assert_eq!(files.values.get("file_origin"), Some(&ColumnValue::Null));
    assert_eq!(
        files.values.get("file_type"),
        Some(&ColumnValue::Text("Raw image".to_string()))
    );

    let bids = &batches[0].writes[1];
    assert_eq!(
        bids.values.get("bids_acquisition"),
        Some(&ColumnValue::Text("MR-WAIR".to_string()))
    );
}

#[test]
fn failed_expression_yields_null_but_the_row_is_still_emitted() {
    let mut set = MappingSet::new();
    set.insert(
        Section::Files,
        MappingTable::parse(
            "file_id,file_id\n\
             file_path,file_path\n\
             file_type,FUNC(file_path;file_path*2)\n",
        )
        .expect("mapping"),
    );
    set.insert(
        Section::Bids,
        MappingTable::parse("file_id,file_id\n").expect("mapping"),
    );

    let mut docs = SidecarSet::new();
    docs.insert(
        PathBuf::from("a_sidecar.json"),
        scan_document(b"bytes-a", "sub-CF07/anat/sub-CF07_T1w.nii.gz", "WAIR"),
    );
    let records = extract(&docs).expect("extract");
    let batches = transform(&records, &set, 1).expect("transform");

    let files = &batches[0].writes[0];
    assert_eq!(files.values.get("file_type"), Some(&ColumnValue::Null));
    assert!(files.values.get("file_id").is_some());
}

#[test]
fn script_round_trips_through_json_lines() {
    let dir = temp_dir("script_round_trip");
    let mut docs = SidecarSet::new();
    docs.insert(
        PathBuf::from("a_sidecar.json"),
        scan_document(b"bytes-a", "sub-CF07/anat/sub-CF07_T1w.nii.gz", "WAIR"),
    );
    let records = extract(&docs).expect("extract");
    let batches = transform(&records, &mapping_set(), 1).expect("transform");

    let script = dir.join("write_script.jsonl");
    write_script(&script, &batches).expect("write script");
    let back = read_script(&script).expect("read script");
    assert_eq!(back, batches);
}

#[test]
fn load_is_idempotent_and_counts_failures_without_aborting() {
    let dir = temp_dir("load_counts");
    let mut gateway = Gateway::open(dir.join("sidecar.db")).expect("open");
    gateway.install_schema(DEFAULT_SCHEMA).expect("schema");

    let mut docs = SidecarSet::new();
    docs.insert(
        PathBuf::from("a_sidecar.json"),
        scan_document(b"bytes-a", "sub-CF07/anat/sub-CF07_T1w.nii.gz", "WAIR"),
    );
    let records = extract(&docs).expect("extract");
    let mut batches = transform(&records, &mapping_set(), 1).expect("transform");

    // Poison one write with a table the schema does not define.
    let poison_values = batches[0].writes[0].values.clone();
    batches[0].writes.push(sdb_etl::RowWrite {
        table: "misc".to_string(),
        values: poison_values,
    });

    let report = load(&mut gateway, &batches).expect("load");
    assert_eq!(report.attempted, 3);
    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed, 1);

    let (rows, exists) = gateway.find_rows("files", &[]).expect("find");
    assert!(exists);
    assert_eq!(rows.len(), 1);

    // Second run changes nothing; nothing is ever counted as updated
    // since the load never passes `allow_update`.
    let report = load(&mut gateway, &batches).expect("reload");
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 0);
    assert_eq!(report.already_existing, 2);
    assert_eq!(report.failed, 1);
}

#[test]
fn missing_entities_are_derived_from_the_file_name() {
    let id = FileIdentity::of_bytes(b"bytes-a").to_string();
    let mut docs = SidecarSet::new();
    // No `bids_session` in the document; the filename carries `ses-Pre`.
    // The explicit `bids_subject` must win over the filename token.
    docs.insert(
        PathBuf::from("a_sidecar.json"),
        SidecarDocument::from_value(&json!({
            "files": {
                "file_id": id,
                "file_path": "sub-CF07/anat/sub-CF07_ses-Pre_T1w.nii.gz"
            },
            "bids": { "file_id": id, "bids_subject": "CF-07-renamed" }
        }))
        .expect("document"),
    );

    let records = extract(&docs).expect("extract");
    let batches = transform(&records, &mapping_set(), 1).expect("transform");
    let bids = batches[0]
        .writes
        .iter()
        .find(|w| w.table == "bids")
        .expect("bids write");
    assert_eq!(
        bids.values.get("bids_session"),
        Some(&ColumnValue::Text("Pre".to_string()))
    );
    assert_eq!(
        bids.values.get("bids_subject"),
        Some(&ColumnValue::Text("CF-07-renamed".to_string()))
    );
}

#[test]
fn extract_aborts_on_an_empty_document_set() {
    let docs = SidecarSet::new();
    assert!(matches!(
        extract(&docs),
        Err(sdb_etl::EtlError::EmptyInput(_))
    ));
}

#[test]
fn malformed_documents_are_skipped_not_fatal() {
    let dir = temp_dir("malformed_docs");
    std::fs::write(dir.join("broken_sidecar.json"), "{ not json").expect("broken");
    std::fs::write(dir.join("unknown_sidecar.json"), r#"{ "misc": {} }"#).expect("unknown");
    std::fs::write(
        dir.join("nested_sidecar.json"),
        r#"{ "files": { "file_id": { "nested": true } } }"#,
    )
    .expect("nested");
    let good = scan_document(b"bytes-a", "sub-CF07/anat/sub-CF07_T1w.nii.gz", "WAIR");
    let mut text = serde_json::to_string_pretty(&good.to_value()).expect("serialize");
    text.push('\n');
    std::fs::write(dir.join("good_sidecar.json"), text).expect("good");

    let docs = SidecarSet::load(vec![
        dir.join("broken_sidecar.json"),
        dir.join("unknown_sidecar.json"),
        dir.join("nested_sidecar.json"),
        dir.join("missing_sidecar.json"),
        dir.join("good_sidecar.json"),
    ]);
    assert_eq!(docs.len(), 1);
    assert!(docs.get(&dir.join("good_sidecar.json")).is_some());

    let records = extract(&docs).expect("extract");
    assert_eq!(records.len(), 1);
}

#[test]
fn extract_skips_documents_without_identity() {
    let mut docs = SidecarSet::new();
    docs.insert(
        PathBuf::from("broken_sidecar.json"),
        SidecarDocument::from_value(&json!({
            "files": { "file_path": "sub-CF07_T1w.nii.gz" }
        }))
        .expect("document"),
    );
    docs.insert(
        PathBuf::from("ok_sidecar.json"),
        scan_document(b"bytes-a", "sub-CF07/anat/sub-CF07_T1w.nii.gz", "WAIR"),
    );

    let records = extract(&docs).expect("extract");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source_path, PathBuf::from("ok_sidecar.json"));
}
