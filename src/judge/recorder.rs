//! Judge result persistence.
//!
//! Writes each evaluation to the shared KV store under
//! `judge:result:<request_id>` with a bounded TTL and maintains the running
//! total/failed counters. KV failures are logged and swallowed.

use super::JudgeResult;
use crate::kv::KvStore;
use std::sync::Arc;
use uuid::Uuid;

pub const KEY_RESULT_PREFIX: &str = "judge:result:";
pub const KEY_TOTAL_EVALUATIONS: &str = "judge:total_evaluations";
pub const KEY_FAILED_EVALUATIONS: &str = "judge:failed_evaluations";

/// Seven days.
const DEFAULT_TTL_SECONDS: u64 = 7 * 24 * 3600;

pub struct JudgeRecorder {
    kv: Arc<dyn KvStore>,
    ttl_seconds: u64,
}

impl JudgeRecorder {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Persist one evaluation. Best-effort.
    pub async fn record(&self, request_id: Uuid, result: &JudgeResult) {
        if let Err(err) = self.try_record(request_id, result).await {
            tracing::warn!(
                request_id = %request_id,
                error = %err,
                "failed to record judge evaluation"
            );
        }
    }

    async fn try_record(&self, request_id: Uuid, result: &JudgeResult) -> crate::error::Result<()> {
        let key = format!("{}{}", KEY_RESULT_PREFIX, request_id);
        self.kv
            .set_ex(&key, &result.to_json().to_string(), self.ttl_seconds)
            .await?;
        self.kv.incr(KEY_TOTAL_EVALUATIONS).await?;
        if !result.passed() {
            self.kv.incr(KEY_FAILED_EVALUATIONS).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{JudgeDimension, PASS_THRESHOLD};
    use crate::kv::MemoryKv;
    use chrono::Utc;

    fn passing_result() -> JudgeResult {
        JudgeResult {
            dimensions: JudgeDimension::ALL
                .iter()
                .map(|d| (*d, PASS_THRESHOLD + 2.0))
                .collect(),
            flags: Vec::new(),
            reasoning: "good".to_string(),
            evaluated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_persists_result_and_counts() {
        let kv = Arc::new(MemoryKv::new());
        let recorder = JudgeRecorder::new(kv.clone());
        let request_id = Uuid::new_v4();

        recorder.record(request_id, &passing_result()).await;

        let stored = kv
            .get(&format!("{}{}", KEY_RESULT_PREFIX, request_id))
            .await
            .unwrap()
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(parsed["passed"], true);
        assert_eq!(
            kv.get(KEY_TOTAL_EVALUATIONS).await.unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(kv.get(KEY_FAILED_EVALUATIONS).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_evaluation_bumps_failed_counter() {
        let kv = Arc::new(MemoryKv::new());
        let recorder = JudgeRecorder::new(kv.clone());

        recorder
            .record(Uuid::new_v4(), &JudgeResult::safe_default())
            .await;
        recorder.record(Uuid::new_v4(), &passing_result()).await;

        assert_eq!(
            kv.get(KEY_TOTAL_EVALUATIONS).await.unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(
            kv.get(KEY_FAILED_EVALUATIONS).await.unwrap().as_deref(),
            Some("1")
        );
    }
}
