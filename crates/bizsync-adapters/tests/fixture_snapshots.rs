// Recorded upstream payloads parsed through the public adapter API.

use std::path::{Path, PathBuf};

use bizsync_adapters::a8::{extract_records, normalize_record, parse_csv_records};
use bizsync_adapters::notion::product_from_page;
use bizsync_core::{ProductType, SyncRecord};
use chrono::NaiveDate;
use serde_json::Value as JsonValue;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn read_fixture(name: &str) -> String {
    std::fs::read_to_string(fixture(name)).unwrap()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
}

#[test]
fn a8_json_fixture_normalizes_every_alias() {
    let payload: JsonValue = serde_json::from_str(&read_fixture("a8_report.json")).unwrap();
    let reports: Vec<_> = extract_records(&payload)
        .iter()
        .map(|record| normalize_record(record, today()))
        .collect();

    let keys: Vec<String> = reports.iter().map(|r| r.natural_key().to_string()).collect();
    assert_eq!(
        keys,
        vec![
            "2026-03-09:Sample Shop A",
            "2026-03-09:Test Campaign B",
            "2026-03-10:Unknown Program",
        ]
    );
    assert_eq!(reports[0].status, "approved");
    assert_eq!(reports[0].reward, 1200.0);
    assert_eq!(reports[0].result, "order #1234");
    assert_eq!(reports[1].status, "pending");
    assert_eq!(reports[1].reward, 450.0);
    assert_eq!(reports[2].reward, 0.0);
    assert_eq!(reports[2].status, "pending");
}

#[test]
fn a8_csv_fixture_matches_json_semantics() {
    let rows = parse_csv_records(&read_fixture("a8_report.csv")).unwrap();
    let reports: Vec<_> = rows.iter().map(|row| normalize_record(row, today())).collect();

    assert_eq!(reports.len(), 2);
    assert_eq!(
        reports[0].summary(),
        "2026-03-08 Shop C / approved / reward 1,500"
    );
    assert_eq!(reports[1].status, "pending");
    assert_eq!(reports[1].reward, 0.0);
    assert_eq!(reports[1].result, "");
}

#[test]
fn notion_products_fixture_yields_typed_products() {
    let payload: JsonValue = serde_json::from_str(&read_fixture("notion_products.json")).unwrap();
    let products: Vec<_> = payload["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(product_from_page)
        .collect();

    let ids: Vec<&str> = products.iter().map(|p| p.page_id.as_str()).collect();
    assert_eq!(ids, vec!["page-linked", "page-sub", "page-draft"]);

    let linked = &products[0];
    assert_eq!(linked.description, "PDF guide");
    assert!(!linked.needs_link());

    let sub = &products[1];
    assert_eq!(sub.product_type, ProductType::Subscription);
    assert_eq!(sub.currency, "JPY");
    assert!(sub.needs_link());

    let draft = &products[2];
    assert_eq!(draft.product_type, ProductType::OneTime);
    assert!(!draft.needs_link());
}
