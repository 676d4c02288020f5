//! Golden fixture tests for the `UserOperationEvent` decoder.
//!
//! The fixture holds an `eth_getLogs` entry and the field values the decoder
//! must produce for it.

use chrono::{TimeZone, Utc};
use opindex_core::{IndexerError, RawLog, DEFAULT_ENTRYPOINT};
use opindex_evm::UserOperationDecoder;

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn fixture() -> serde_json::Value {
    let mut p = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    p.push("tests/fixtures/user_operation_event.json");
    let json = std::fs::read_to_string(&p).expect("fixture not found");
    serde_json::from_str(&json).expect("invalid fixture JSON")
}

fn fixture_log(f: &serde_json::Value) -> RawLog {
    serde_json::from_value(f["log"].clone()).expect("fixture log does not parse as RawLog")
}

fn decoder() -> UserOperationDecoder {
    UserOperationDecoder::new(DEFAULT_ENTRYPOINT).unwrap()
}

// ─── Golden ───────────────────────────────────────────────────────────────────

#[test]
fn user_operation_event_golden() {
    let f = fixture();
    let expected = &f["expected"];
    let indexed_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    let ev = decoder().decode(&fixture_log(&f), indexed_at).unwrap();

    assert_eq!(ev.operation_hash, expected["userOpHash"].as_str().unwrap());
    assert_eq!(ev.sender, expected["sender"].as_str().unwrap());
    assert_eq!(ev.paymaster, expected["paymaster"].as_str().unwrap());
    assert_eq!(ev.nonce, expected["nonce"].as_str().unwrap());
    assert_eq!(ev.success, expected["success"].as_bool().unwrap());
    assert_eq!(ev.actual_gas_cost, expected["actualGasCost"].as_str().unwrap());
    assert_eq!(ev.actual_gas_used, expected["actualGasUsed"].as_str().unwrap());
    assert_eq!(ev.block_number, expected["blockNumber"].as_u64().unwrap());
    assert_eq!(ev.transaction_hash, expected["transactionHash"].as_str().unwrap());
    assert_eq!(ev.log_index, expected["logIndex"].as_u64().unwrap());
    assert_eq!(ev.indexed_at, indexed_at);
    assert_eq!(ev.indexed_at_string(), "2024-03-01T12:00:00.000Z");
}

#[test]
fn serialized_event_uses_wire_names() {
    let f = fixture();
    let ev = decoder().decode(&fixture_log(&f), Utc::now()).unwrap();
    let json = serde_json::to_value(&ev).unwrap();

    assert_eq!(json["userOpHash"], f["expected"]["userOpHash"]);
    assert!(json.get("timestamp").is_some());
    assert!(json.get("operation_hash").is_none());
}

#[test]
fn decoder_for_other_contract_rejects_fixture() {
    let f = fixture();
    let other = UserOperationDecoder::new("0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789").unwrap();
    let err = other.decode(&fixture_log(&f), Utc::now()).unwrap_err();
    assert!(matches!(err, IndexerError::Decode(_)));
}

#[test]
fn truncated_data_is_rejected() {
    let f = fixture();
    let mut log = fixture_log(&f);
    log.data.truncate(log.data.len() - 64);
    let err = decoder().decode(&log, Utc::now()).unwrap_err();
    assert!(matches!(err, IndexerError::Decode(_)));
}
