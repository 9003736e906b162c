use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use common::error::AppError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{DateRange, Entity, Intent, StructuredQuery, TemporalFilter};

/// One completed exchange within a session.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub structured_query: StructuredQuery,
    pub response_summary: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded per-session state: the five most recent turns plus the slots a
/// follow-up may inherit. Contexts are immutable snapshots; updates replace
/// the stored value rather than editing it in place, so concurrent readers
/// always observe a consistent context.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub patient_id: String,
    pub turns: Vec<ConversationTurn>,
    pub last_entities: Vec<Entity>,
    pub last_temporal_filter: Option<TemporalFilter>,
    pub last_intent: Option<Intent>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

const FOLLOW_UP_PREFIXES: &[&str] = &[
    "what about",
    "and ",
    "when did",
    "how about",
    "also",
    "additionally",
    "tell me more",
    "what else",
    "more about",
    "what happened after",
];

/// Session lifecycle, follow-up detection and slot inheritance.
pub struct ConversationManager {
    sessions: RwLock<HashMap<String, Arc<ConversationContext>>>,
    window_turns: usize,
    expiry: Duration,
}

impl ConversationManager {
    pub fn new(window_turns: usize, expiry_ms: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            window_turns: window_turns.max(1),
            expiry: Duration::milliseconds(i64::try_from(expiry_ms).unwrap_or(1_800_000)),
        }
    }

    pub fn create_session(&self, patient_id: &str) -> Arc<ConversationContext> {
        let now = Utc::now();
        let context = Arc::new(ConversationContext {
            session_id: Uuid::new_v4().to_string(),
            patient_id: patient_id.to_owned(),
            turns: Vec::new(),
            last_entities: Vec::new(),
            last_temporal_filter: None,
            last_intent: None,
            created_at: now,
            expires_at: now + self.expiry,
        });

        self.write()
            .insert(context.session_id.clone(), Arc::clone(&context));
        info!(session_id = %context.session_id, "Conversation session created");

        context
    }

    /// Live context lookup; expired sessions read as absent.
    pub fn get_context(&self, session_id: &str) -> Option<Arc<ConversationContext>> {
        let context = self.read().get(session_id).cloned()?;
        if context.is_expired_at(Utc::now()) {
            return None;
        }
        Some(context)
    }

    /// Appends a turn and rolls the window forward. Rejects expired or
    /// unknown sessions with `SESSION_EXPIRED`.
    pub fn update_context(
        &self,
        session_id: &str,
        turn: ConversationTurn,
    ) -> Result<Arc<ConversationContext>, AppError> {
        let current = self
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::SessionExpired(session_id.to_owned()))?;

        if current.is_expired_at(Utc::now()) {
            self.write().remove(session_id);
            return Err(AppError::SessionExpired(session_id.to_owned()));
        }

        let mut updated = (*current).clone();
        updated.last_entities = turn.structured_query.entities.clone();
        updated.last_temporal_filter = turn.structured_query.temporal_filter.clone();
        updated.last_intent = Some(turn.structured_query.intent);
        updated.turns.push(turn);
        if updated.turns.len() > self.window_turns {
            let excess = updated.turns.len() - self.window_turns;
            updated.turns.drain(..excess);
        }

        let replacement = Arc::new(updated);
        self.write()
            .insert(session_id.to_owned(), Arc::clone(&replacement));

        Ok(replacement)
    }

    pub fn delete_session(&self, session_id: &str) -> bool {
        self.write().remove(session_id).is_some()
    }

    /// Drops expired sessions. Idempotent; safe to run periodically and
    /// concurrently with reads and writes.
    pub fn cleanup_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, context| !context.is_expired_at(now));
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "Expired conversation sessions cleaned up");
        }
        removed
    }

    pub fn is_follow_up(query: &str) -> bool {
        let lower = query.trim().to_ascii_lowercase();
        FOLLOW_UP_PREFIXES.iter().any(|p| lower.starts_with(p))
            || is_bare_pronoun_question(&lower)
    }

    /// Fills missing slots of a follow-up query from the previous turn:
    /// entities when none were extracted, the temporal filter when none was
    /// parsed, and the intent when classification fell through to a
    /// fallback. Non-follow-ups pass through untouched.
    pub fn resolve_follow_up(
        &self,
        mut sq: StructuredQuery,
        context: &ConversationContext,
    ) -> StructuredQuery {
        if !Self::is_follow_up(&sq.original_query) || context.turns.is_empty() {
            return sq;
        }

        if sq.entities.is_empty() && !context.last_entities.is_empty() {
            debug!(
                inherited = context.last_entities.len(),
                "Follow-up inherits entities from previous turn"
            );
            sq.entities = context.last_entities.clone();
        }

        if sq.temporal_filter.is_none() {
            if let Some(last_temporal) = &context.last_temporal_filter {
                sq.temporal_filter = Some(last_temporal.clone());
                sq.filters.date_range = Some(DateRange {
                    from: last_temporal.date_from,
                    to: last_temporal.date_to,
                });
            }
        }

        let fallback_intent =
            matches!(sq.intent, Intent::Unknown | Intent::RetrieveAll);
        if fallback_intent {
            if let Some(last_intent) = context.last_intent {
                sq.intent = last_intent;
                if sq.filters.artifact_types.is_none() {
                    sq.filters.artifact_types = crate::agent::default_artifact_types(last_intent);
                }
            }
        }

        sq
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ConversationContext>>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ConversationContext>>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// "when does it", "what were they" and similar anaphoric one-liners.
fn is_bare_pronoun_question(lower: &str) -> bool {
    let words: Vec<&str> = lower.split_whitespace().collect();
    words.len() <= 7
        && words
            .iter()
            .any(|w| matches!(*w, "it" | "it?" | "they" | "they?" | "that" | "that?"))
        && matches!(words.first(), Some(&"when" | &"what" | &"how" | &"why"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::QueryUnderstanding;
    use chrono::TimeZone;

    fn clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 15, 9, 0, 0).single().expect("clock")
    }

    fn manager() -> ConversationManager {
        ConversationManager::new(5, 1_800_000)
    }

    fn turn_for(query: &str) -> ConversationTurn {
        let sq = QueryUnderstanding::new()
            .understand(query, "patient_1", clock())
            .expect("structured query");
        ConversationTurn {
            query: query.to_owned(),
            structured_query: sq,
            response_summary: "answered".to_owned(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn session_window_keeps_five_most_recent_turns_in_order() {
        let manager = manager();
        let session = manager.create_session("patient_1");

        for i in 0..8 {
            manager
                .update_context(&session.session_id, turn_for(&format!("query number {i}")))
                .expect("update");
        }

        let context = manager.get_context(&session.session_id).expect("context");
        assert_eq!(context.turns.len(), 5);
        let queries: Vec<&str> = context.turns.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(
            queries,
            vec![
                "query number 3",
                "query number 4",
                "query number 5",
                "query number 6",
                "query number 7"
            ]
        );
    }

    #[test]
    fn expired_session_reads_as_absent_and_rejects_updates() {
        let manager = ConversationManager::new(5, 0);
        let session = manager.create_session("patient_1");
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(manager.get_context(&session.session_id).is_none());
        let err = manager
            .update_context(&session.session_id, turn_for("anything"))
            .expect_err("expired session must reject updates");
        assert!(matches!(err, AppError::SessionExpired(_)));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let manager = ConversationManager::new(5, 0);
        manager.create_session("patient_1");
        manager.create_session("patient_2");
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert_eq!(manager.cleanup_expired_sessions(), 2);
        assert_eq!(manager.cleanup_expired_sessions(), 0);
    }

    #[test]
    fn follow_up_detection_matches_pattern_table() {
        for query in [
            "what about the blood pressure?",
            "and the labs?",
            "when did they start taking it?",
            "tell me more",
            "Also, any allergies?",
        ] {
            assert!(ConversationManager::is_follow_up(query), "{query}");
        }
        assert!(!ConversationManager::is_follow_up(
            "What medications is the patient taking?"
        ));
    }

    #[test]
    fn follow_up_inherits_entities_temporal_and_intent() {
        let manager = manager();
        let session = manager.create_session("patient_1");

        manager
            .update_context(
                &session.session_id,
                turn_for("What is the dosage of ibuprofen in the last 3 months?"),
            )
            .expect("turn 1");
        let context = manager.get_context(&session.session_id).expect("context");

        let follow_up = QueryUnderstanding::new()
            .understand("when did they start taking it?", "patient_1", clock())
            .expect("structured query");
        assert!(follow_up.entities.is_empty());

        let resolved = manager.resolve_follow_up(follow_up, &context);
        assert_eq!(resolved.entities.len(), 1);
        assert_eq!(resolved.entities[0].normalized, "ibuprofen");
        assert!(resolved.temporal_filter.is_some());
        assert_eq!(resolved.intent, Intent::RetrieveMedications);
        assert!(resolved.filters.artifact_types.is_some());
    }

    #[test]
    fn follow_up_keeps_newly_extracted_slots() {
        let manager = manager();
        let session = manager.create_session("patient_1");
        manager
            .update_context(&session.session_id, turn_for("What is the dosage of ibuprofen?"))
            .expect("turn 1");
        let context = manager.get_context(&session.session_id).expect("context");

        let follow_up = QueryUnderstanding::new()
            .understand("what about metformin?", "patient_1", clock())
            .expect("structured query");
        let resolved = manager.resolve_follow_up(follow_up, &context);

        // The new entity wins over the inherited one.
        assert_eq!(resolved.entities.len(), 1);
        assert_eq!(resolved.entities[0].normalized, "metformin");
    }

    #[test]
    fn non_follow_up_passes_through_untouched() {
        let manager = manager();
        let session = manager.create_session("patient_1");
        manager
            .update_context(&session.session_id, turn_for("What is the dosage of ibuprofen?"))
            .expect("turn 1");
        let context = manager.get_context(&session.session_id).expect("context");

        let fresh = QueryUnderstanding::new()
            .understand("Summarize the care plan", "patient_1", clock())
            .expect("structured query");
        let resolved = manager.resolve_follow_up(fresh.clone(), &context);
        assert_eq!(resolved, fresh);
    }

    #[test]
    fn last_slots_track_latest_turn() {
        let manager = manager();
        let session = manager.create_session("patient_1");

        manager
            .update_context(&session.session_id, turn_for("What is the dosage of ibuprofen?"))
            .expect("turn 1");
        manager
            .update_context(&session.session_id, turn_for("Any notes about hypertension?"))
            .expect("turn 2");

        let context = manager.get_context(&session.session_id).expect("context");
        assert!(context
            .last_entities
            .iter()
            .any(|e| e.normalized == "hypertension"));
        assert!(context
            .last_entities
            .iter()
            .all(|e| e.normalized != "ibuprofen"));
    }
}
