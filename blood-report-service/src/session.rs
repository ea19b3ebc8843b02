use graph_flow::{Session, SessionStorage};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::chat::personalized_chat;
use crate::config::{ModelSettings, ServiceConfig};
use crate::error::{ReportError, Result};
use crate::llm::LanguageModel;
use crate::models::ChatTurn;
use crate::orchestrator::{AnalysisOutcome, ReportOrchestrator};
use crate::sections::ReportSections;
use crate::tasks::session_keys;

/// Everything the UI shows for one uploaded report
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub report_text: String,
    pub agent_response: Option<String>,
    pub sections: Option<ReportSections>,
    pub analysis_complete: bool,
    pub status_message: Option<String>,
    pub chat_history: Vec<ChatTurn>,
}

/// Per-report session lifecycle: create, analyze, chat, clear, delete
#[derive(Clone)]
pub struct ReportSessions {
    orchestrator: ReportOrchestrator,
    model: Arc<dyn LanguageModel>,
    chat_settings: ModelSettings,
}

impl ReportSessions {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        config: &ServiceConfig,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        let orchestrator = ReportOrchestrator::new(
            model.clone(),
            config.analysis.clone(),
            config.max_agent_steps,
            storage,
        );
        Self {
            orchestrator,
            model,
            chat_settings: config.chat.clone(),
        }
    }

    pub fn orchestrator(&self) -> &ReportOrchestrator {
        &self.orchestrator
    }

    pub async fn create(&self, report_text: String) -> Result<String> {
        self.orchestrator.create_session(report_text).await
    }

    pub async fn analyze(&self, session_id: &str) -> Result<AnalysisOutcome> {
        self.orchestrator.run_analysis(session_id).await
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot> {
        let session = self.orchestrator.load(session_id).await?;
        let context = &session.context;

        Ok(SessionSnapshot {
            session_id: session.id.clone(),
            report_text: context
                .get(session_keys::REPORT_TEXT)
                .await
                .unwrap_or_default(),
            agent_response: context.get(session_keys::AGENT_RESPONSE).await,
            sections: context.get(session_keys::SECTIONS).await,
            analysis_complete: context
                .get(session_keys::ANALYSIS_COMPLETE)
                .await
                .unwrap_or(false),
            status_message: session.status_message.clone(),
            chat_history: context
                .get(session_keys::CHAT_HISTORY)
                .await
                .unwrap_or_default(),
        })
    }

    /// Answer a follow-up question about the analyzed report.
    ///
    /// The question is recorded before the model is called, so a failed call
    /// leaves it in the history and the caller may retry.
    pub async fn ask(&self, session_id: &str, question: &str) -> Result<String> {
        let session = self.orchestrator.load(session_id).await?;

        let report_analysis: String = session
            .context
            .get(session_keys::AGENT_RESPONSE)
            .await
            .ok_or_else(|| ReportError::AnalysisMissing(session_id.to_string()))?;
        let report_text: String = session
            .context
            .get(session_keys::REPORT_TEXT)
            .await
            .unwrap_or_default();

        self.append_turn(&session, ChatTurn::user(question)).await?;

        let answer = personalized_chat(
            self.model.as_ref(),
            &self.chat_settings,
            question,
            &report_text,
            &report_analysis,
        )
        .await?;

        self.append_turn(&session, ChatTurn::ai(answer.clone())).await?;
        info!(session_id = %session_id, "Follow-up question answered");

        Ok(answer)
    }

    pub async fn chat_history(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        let session = self.orchestrator.load(session_id).await?;
        Ok(session
            .context
            .get(session_keys::CHAT_HISTORY)
            .await
            .unwrap_or_default())
    }

    pub async fn clear_chat_history(&self, session_id: &str) -> Result<()> {
        let session = self.orchestrator.load(session_id).await?;
        session
            .context
            .set(session_keys::CHAT_HISTORY, Vec::<ChatTurn>::new())
            .await;
        self.orchestrator.storage().save(session).await?;
        Ok(())
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        // Surface unknown ids instead of silently succeeding
        self.orchestrator.load(session_id).await?;
        self.orchestrator.storage().delete(session_id).await?;
        info!(session_id = %session_id, "Report session deleted");
        Ok(())
    }

    async fn append_turn(&self, session: &Session, turn: ChatTurn) -> Result<()> {
        let mut history: Vec<ChatTurn> = session
            .context
            .get(session_keys::CHAT_HISTORY)
            .await
            .unwrap_or_default();
        history.push(turn);
        session.context.set(session_keys::CHAT_HISTORY, history).await;
        self.orchestrator.storage().save(session.clone()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::models::ChatRole;
    use graph_flow::InMemorySessionStorage;

    fn sessions(model: Arc<ScriptedModel>) -> ReportSessions {
        let mut config = ServiceConfig::new("test-key");
        config.chat = ModelSettings::new("chat-model", 0.5);
        ReportSessions::new(model, &config, Arc::new(InMemorySessionStorage::new()))
    }

    #[tokio::test]
    async fn question_before_analysis_is_rejected() {
        let sessions = sessions(Arc::new(ScriptedModel::default()));
        let id = sessions.create("LDL 160 mg/dL".to_string()).await.unwrap();

        let err = sessions.ask(&id, "Is this bad?").await.unwrap_err();

        assert!(matches!(err, ReportError::AnalysisMissing(_)));
        assert!(sessions.chat_history(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_turns_are_appended_in_order() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"summary": "High LDL", "abnormal_values": []}"#,
            r#"{"potential_health_issues": []}"#,
            r#"{"lifestyle_recommendations": []}"#,
            " LDL above 130 mg/dL is considered high. ",
        ]));
        let sessions = sessions(model.clone());
        let id = sessions.create("LDL 160 mg/dL".to_string()).await.unwrap();
        sessions.analyze(&id).await.unwrap();

        let answer = sessions.ask(&id, "Is my LDL high?").await.unwrap();

        assert_eq!(answer, "LDL above 130 mg/dL is considered high.");
        let history = sessions.chat_history(&id).await.unwrap();
        assert_eq!(
            history,
            vec![
                ChatTurn::user("Is my LDL high?"),
                ChatTurn::ai("LDL above 130 mg/dL is considered high."),
            ]
        );

        let requests = model.requests.lock().unwrap();
        let chat_request = requests.last().unwrap();
        assert_eq!(chat_request.settings.model, "chat-model");
        assert!(chat_request.prompt.contains("Additional Context:\nLDL 160 mg/dL"));
        assert!(chat_request.prompt.contains("1. Blood Test Analysis"));
    }

    #[tokio::test]
    async fn failed_answer_keeps_question() {
        let model = Arc::new(ScriptedModel::new([
            r#"{"summary": "ok", "abnormal_values": []}"#,
            r#"{"potential_health_issues": []}"#,
            r#"{"lifestyle_recommendations": []}"#,
        ]));
        let sessions = sessions(model.clone());
        let id = sessions.create("report".to_string()).await.unwrap();
        sessions.analyze(&id).await.unwrap();
        model.push_error(ReportError::Upstream {
            status: 429,
            body: "rate limited".to_string(),
        });

        let err = sessions.ask(&id, "Why?").await.unwrap_err();

        assert!(matches!(err, ReportError::Upstream { status: 429, .. }));
        let history = sessions.chat_history(&id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, ChatRole::User);
    }

    #[tokio::test]
    async fn clear_and_delete() {
        let sessions = sessions(Arc::new(ScriptedModel::default()));
        let id = sessions.create("report".to_string()).await.unwrap();

        let snapshot = sessions.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.report_text, "report");
        assert!(snapshot.agent_response.is_none());
        assert!(!snapshot.analysis_complete);

        sessions.clear_chat_history(&id).await.unwrap();
        assert!(sessions.chat_history(&id).await.unwrap().is_empty());

        sessions.delete(&id).await.unwrap();
        assert!(matches!(
            sessions.snapshot(&id).await.unwrap_err(),
            ReportError::SessionNotFound(_)
        ));
        assert!(matches!(
            sessions.delete(&id).await.unwrap_err(),
            ReportError::SessionNotFound(_)
        ));
    }
}
