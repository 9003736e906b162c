use tracing::info;

/// One audit entry per handled query, emitted after the response is fully
/// assembled. Audit failures never affect the response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditRecord {
    pub query_id: String,
    pub patient_id: String,
    pub intent: Option<String>,
    pub success: bool,
    pub error_code: Option<String>,
    pub total_time_ms: u64,
    pub candidate_count: usize,
    pub extraction_count: usize,
    pub confidence: Option<f32>,
}

pub trait AuditLogger: Send + Sync {
    fn log(&self, record: &AuditRecord);
}

/// Default sink: structured tracing events under the `audit` target. The
/// durable audit store is an external collaborator behind this trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log(&self, record: &AuditRecord) {
        info!(
            target: "audit",
            query_id = %record.query_id,
            patient_id = %record.patient_id,
            intent = record.intent.as_deref().unwrap_or("-"),
            success = record.success,
            error_code = record.error_code.as_deref().unwrap_or("-"),
            total_time_ms = record.total_time_ms,
            candidates = record.candidate_count,
            extractions = record.extraction_count,
            "query handled"
        );
    }
}
