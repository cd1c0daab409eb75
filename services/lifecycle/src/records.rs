//! Repository documents produced by the lifecycle managers
//!
//! Records are schemaless JSON documents keyed by a path-like id:
//! `records/functions/<instance_id>`, `records/services/<instance_id>` and
//! `records/cloud-services/<instance_id>`.

use serde_json::{json, Map, Value};
use types::{DocumentStore, ServiceInstance};

pub type RecordStore = dyn DocumentStore<Value>;

/// Table of [`ServiceInstance`] documents
pub type InstanceStore = dyn DocumentStore<ServiceInstance>;

pub const FUNCTION_OPERATIONAL: &str = "normal operation";

pub fn function_record_key(instance_id: &str) -> String {
    format!("records/functions/{}", instance_id)
}

pub fn service_record_key(instance_id: &str) -> String {
    format!("records/services/{}", instance_id)
}

pub fn cloud_service_record_key(instance_id: &str) -> String {
    format!("records/cloud-services/{}", instance_id)
}

/// Mark a function record operational and bump its version.
///
/// Versions are stored as decimal strings; a numeric version is accepted and
/// rewritten as a string.
pub fn mark_function_operational(record: &mut Value) -> Result<(), String> {
    let fields = record
        .as_object_mut()
        .ok_or_else(|| "function record is not a document".to_string())?;

    let version = match fields.get("version") {
        Some(Value::String(v)) => v.parse::<u64>().ok(),
        Some(Value::Number(v)) => v.as_u64(),
        _ => None,
    }
    .ok_or_else(|| "function record has no valid version".to_string())?;

    fields.insert("status".into(), json!(FUNCTION_OPERATIONAL));
    fields.insert("version".into(), json!((version + 1).to_string()));
    Ok(())
}

/// Service record: the descriptor plus instance bookkeeping
pub fn build_service_record(instance: &ServiceInstance) -> Value {
    let mut record = match &instance.descriptor {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };

    let descriptor_reference = record.remove("uuid").or_else(|| record.get("id").cloned());
    record.insert("id".into(), json!(instance.id));
    record.insert("status".into(), json!(FUNCTION_OPERATIONAL));
    record.insert("version".into(), json!("1"));
    record.insert(
        "descriptor_reference".into(),
        descriptor_reference.unwrap_or(Value::Null),
    );
    record.insert(
        "network_functions".into(),
        Value::Array(
            instance
                .functions
                .iter()
                .map(|f| json!({ "vnfr_id": f.instance_id }))
                .collect(),
        ),
    );
    Value::Object(record)
}

/// Cloud-service record from the adapter's record and the descriptor
pub fn build_cloud_service_record(instance_id: &str, adapter_record: &Value, csd: &Value) -> Value {
    let mut record = match adapter_record {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };

    record.insert("id".into(), json!(instance_id));
    record.insert("status".into(), json!(FUNCTION_OPERATIONAL));
    record.insert("version".into(), json!("1"));
    record.insert(
        "descriptor_reference".into(),
        csd.get("uuid")
            .or_else(|| csd.get("id"))
            .cloned()
            .unwrap_or(Value::Null),
    );
    if let Some(flavor) = csd.get("descriptor_flavor") {
        record.insert("descriptor_flavor".into(), flavor.clone());
    }
    Value::Object(record)
}
