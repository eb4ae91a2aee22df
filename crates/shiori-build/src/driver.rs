use crate::batch::{run_batch, BatchDetailRequest};
use crate::error::BuildError;
use crate::prompts;
use std::sync::Arc;
use tracing::info;

use shiori_core::{
    itinerary_update_from_value, merge_itinerary_data, parse_ai_response, DayDetailTask,
    ItineraryDocument, ItineraryStatus, PhaseState, PlanningPhase,
};
use shiori_llm::{LLMProvider, Message};

/// Observer for a running build. All methods default to no-ops so
/// callers implement only what they care about.
pub trait BuildObserver: Send + Sync {
    fn on_state_change(&self, _phase: PlanningPhase, _current_step: &str, _progress: f64) {}
    fn on_message(&self, _message: &str) {}
    fn on_itinerary_update(&self, _itinerary: &ItineraryDocument) {}
    fn on_complete(&self, _itinerary: &ItineraryDocument) {}
    fn on_error(&self, _error: &BuildError) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl BuildObserver for NoopObserver {}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub brief: String,
    pub days: u32,
    /// Concurrent day-detail calls for the parallel strategy.
    pub parallel_count: usize,
}

/// Drives a full itinerary build end to end: skeleton first, then one
/// detailing pass per day, sequentially or through the batch
/// orchestrator.
pub struct BuildDriver {
    llm: Arc<dyn LLMProvider>,
}

impl BuildDriver {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self { llm }
    }

    /// Detail days strictly in order, one model call each. Progress
    /// runs 30 after the skeleton, then `30 + i * (60 / N)` after day
    /// `i`, then 100.
    pub async fn build_sequential(
        &self,
        request: &BuildRequest,
        observer: &dyn BuildObserver,
    ) -> Result<ItineraryDocument, BuildError> {
        let mut state = PhaseState::new();
        match self.run_sequential(request, observer, &mut state).await {
            Ok(doc) => {
                observer.on_complete(&doc);
                Ok(doc)
            }
            Err(e) => {
                observer.on_state_change(state.phase, "error", 0.0);
                observer.on_error(&e);
                Err(e)
            }
        }
    }

    /// Skeleton at 40, then the batch orchestrator details all days
    /// concurrently, its completion rate mapped onto `[40, 90]`, then
    /// 100.
    pub async fn build_parallel(
        &self,
        request: &BuildRequest,
        observer: &dyn BuildObserver,
    ) -> Result<ItineraryDocument, BuildError> {
        let mut state = PhaseState::new();
        match self.run_parallel(request, observer, &mut state).await {
            Ok(doc) => {
                observer.on_complete(&doc);
                Ok(doc)
            }
            Err(e) => {
                observer.on_state_change(state.phase, "error", 0.0);
                observer.on_error(&e);
                Err(e)
            }
        }
    }

    async fn run_sequential(
        &self,
        request: &BuildRequest,
        observer: &dyn BuildObserver,
        state: &mut PhaseState,
    ) -> Result<ItineraryDocument, BuildError> {
        let mut doc = self.build_skeleton(request, observer, 30.0, state).await?;

        let total = doc.total_days().max(1);
        let per_day = 60.0 / total as f64;

        for day in 1..=total {
            state.proceed(total);
            doc.phase = Some(PlanningPhase::Detailing);
            doc.current_day = Some(day);

            let task = DayDetailTask {
                day,
                theme: doc.day(day).and_then(|d| d.theme.clone()),
                additional_info: None,
                priority: day,
            };
            let messages = vec![
                Message::system(prompts::system_prompt()),
                Message::user(prompts::day_detail_prompt(&task, Some(&doc))),
            ];
            let response = self.llm.generate_with_context(messages).await?;

            let parsed = parse_ai_response(&response.content);
            observer.on_message(&parsed.message);
            if let Some(update) = parsed.itinerary_data.and_then(itinerary_update_from_value) {
                doc = merge_itinerary_data(Some(&doc), &update);
            }
            observer.on_itinerary_update(&doc);

            observer.on_state_change(
                PlanningPhase::Detailing,
                &format!("day-{}", day),
                30.0 + day as f64 * per_day,
            );
        }

        state.proceed(total);
        Ok(self.finish(doc, observer))
    }

    async fn run_parallel(
        &self,
        request: &BuildRequest,
        observer: &dyn BuildObserver,
        state: &mut PhaseState,
    ) -> Result<ItineraryDocument, BuildError> {
        let skeleton = self.build_skeleton(request, observer, 40.0, state).await?;
        let total = skeleton.total_days().max(1);

        let tasks: Vec<DayDetailTask> = skeleton
            .schedule
            .iter()
            .map(|d| DayDetailTask {
                day: d.day,
                theme: d.theme.clone(),
                additional_info: None,
                priority: d.day,
            })
            .collect();

        let mut rx = run_batch(
            Arc::clone(&self.llm),
            BatchDetailRequest {
                days: tasks,
                chat_history: Vec::new(),
                current_itinerary: Some(skeleton.clone()),
                max_parallel: Some(request.parallel_count),
            },
        );

        let mut doc = skeleton;
        while let Some(chunk) = rx.recv().await {
            use shiori_core::MultiStreamChunk::*;
            match chunk {
                Message { content, .. } => observer.on_message(&content),
                Itinerary { itinerary, .. } => {
                    doc = itinerary;
                    observer.on_itinerary_update(&doc);
                }
                DayComplete { .. } | DayError { .. } => state.proceed(total),
                Progress { progress, .. } => observer.on_state_change(
                    PlanningPhase::Detailing,
                    "detailing",
                    40.0 + f64::from(progress.progress_rate) * 0.5,
                ),
                Done { .. } => break,
                Error { error, .. } => return Err(BuildError::Provider(anyhow::anyhow!(error))),
                DayStart { .. } => {}
            }
        }

        while !state.is_completed() {
            state.proceed(total);
        }
        Ok(self.finish(doc, observer))
    }

    async fn build_skeleton(
        &self,
        request: &BuildRequest,
        observer: &dyn BuildObserver,
        progress: f64,
        state: &mut PhaseState,
    ) -> Result<ItineraryDocument, BuildError> {
        info!("Building {}-day skeleton", request.days);
        while state.phase != PlanningPhase::Skeleton && !state.is_completed() {
            state.proceed(request.days);
        }
        observer.on_state_change(PlanningPhase::Skeleton, "skeleton", progress);

        let messages = vec![
            Message::system(prompts::system_prompt()),
            Message::user(prompts::skeleton_prompt(&request.brief, request.days)),
        ];
        let response = self.llm.generate_with_context(messages).await?;

        let parsed = parse_ai_response(&response.content);
        observer.on_message(&parsed.message);
        let update = parsed
            .itinerary_data
            .and_then(itinerary_update_from_value)
            .ok_or_else(|| {
                BuildError::Provider(anyhow::anyhow!("skeleton reply contained no itinerary data"))
            })?;

        let mut doc = merge_itinerary_data(None, &update);
        if doc.duration.is_none() {
            doc.duration = Some(request.days);
        }
        doc.phase = Some(PlanningPhase::Skeleton);
        observer.on_itinerary_update(&doc);
        Ok(doc)
    }

    fn finish(&self, mut doc: ItineraryDocument, observer: &dyn BuildObserver) -> ItineraryDocument {
        doc.phase = Some(PlanningPhase::Completed);
        doc.current_day = None;
        doc.status = ItineraryStatus::Completed;
        observer.on_state_change(PlanningPhase::Completed, "completed", 100.0);
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use shiori_llm::{ChatStream, ChatStreamChunk, LLMResponse};
    use std::sync::Mutex;

    struct PlannerLLM;

    impl PlannerLLM {
        fn skeleton_reply(days: u32) -> String {
            let schedule: Vec<serde_json::Value> = (1..=days)
                .map(|day| {
                    json!({
                        "day": day,
                        "theme": format!("Theme {}", day),
                        "spots": [{"name": format!("Spot {}", day)}]
                    })
                })
                .collect();
            let block = json!({
                "title": "Kyoto trip",
                "destination": "Kyoto",
                "duration": days,
                "schedule": schedule,
            });
            format!("Here is the skeleton.\n```json\n{}\n```", block)
        }

        fn detail_reply(day: u32) -> String {
            let block = json!({
                "schedule": [{
                    "day": day,
                    "spots": [{
                        "name": format!("Spot {}", day),
                        "description": "Full detail",
                        "scheduledTime": "09:00",
                        "duration": 90
                    }]
                }]
            });
            format!("Day {} detailed.\n```json\n{}\n```", day, block)
        }

        fn reply_for(messages: &[Message]) -> String {
            let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            if prompt.contains("skeleton itinerary") {
                Self::skeleton_reply(3)
            } else {
                let day = (1..=31)
                    .find(|d| prompt.contains(&format!("Flesh out day {} ", d)))
                    .unwrap_or(1);
                Self::detail_reply(day)
            }
        }
    }

    #[async_trait]
    impl LLMProvider for PlannerLLM {
        async fn generate(&self, _prompt: &str) -> Result<LLMResponse> {
            unimplemented!("drivers use generate_with_context")
        }

        async fn generate_with_context(&self, messages: Vec<Message>) -> Result<LLMResponse> {
            Ok(LLMResponse {
                content: Self::reply_for(&messages),
                finish_reason: None,
            })
        }

        async fn stream_chat(&self, messages: Vec<Message>) -> Result<ChatStream> {
            let reply = Self::reply_for(&messages);
            let parsed = parse_ai_response(&reply);
            let mut chunks: Vec<Result<ChatStreamChunk>> = vec![Ok(ChatStreamChunk::Message {
                content: parsed.message,
            })];
            if let Some(update) = parsed.itinerary_data.and_then(itinerary_update_from_value) {
                chunks.push(Ok(ChatStreamChunk::Itinerary { itinerary: update }));
            }
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        progress: Mutex<Vec<f64>>,
        steps: Mutex<Vec<String>>,
        completed: Mutex<bool>,
        errors: Mutex<usize>,
    }

    impl BuildObserver for RecordingObserver {
        fn on_state_change(&self, _phase: PlanningPhase, step: &str, progress: f64) {
            self.progress.lock().unwrap().push(progress);
            self.steps.lock().unwrap().push(step.to_string());
        }

        fn on_complete(&self, _itinerary: &ItineraryDocument) {
            *self.completed.lock().unwrap() = true;
        }

        fn on_error(&self, _error: &BuildError) {
            *self.errors.lock().unwrap() += 1;
        }
    }

    fn request() -> BuildRequest {
        BuildRequest {
            brief: "Temples and food in Kyoto".to_string(),
            days: 3,
            parallel_count: 2,
        }
    }

    #[tokio::test]
    async fn test_sequential_progress_schedule() {
        let driver = BuildDriver::new(Arc::new(PlannerLLM));
        let observer = RecordingObserver::default();
        let doc = driver
            .build_sequential(&request(), &observer)
            .await
            .unwrap();

        assert_eq!(doc.status, ItineraryStatus::Completed);
        assert_eq!(doc.phase, Some(PlanningPhase::Completed));
        assert_eq!(doc.schedule.len(), 3);
        assert!(*observer.completed.lock().unwrap());

        // 30 (skeleton), 50/70/90 (days), 100 (completed).
        let progress = observer.progress.lock().unwrap().clone();
        assert_eq!(progress, vec![30.0, 50.0, 70.0, 90.0, 100.0]);
    }

    /// Provider that never produces a JSON block, so the skeleton call
    /// cannot yield an itinerary.
    struct ProselessLLM;

    #[async_trait]
    impl LLMProvider for ProselessLLM {
        async fn generate(&self, _prompt: &str) -> Result<LLMResponse> {
            unimplemented!("drivers use generate_with_context")
        }

        async fn generate_with_context(&self, _messages: Vec<Message>) -> Result<LLMResponse> {
            Ok(LLMResponse {
                content: "I would love to help, tell me more about the trip!".to_string(),
                finish_reason: None,
            })
        }

        async fn stream_chat(&self, _messages: Vec<Message>) -> Result<ChatStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    #[tokio::test]
    async fn test_skeleton_failure_reports_error_and_stops() {
        let driver = BuildDriver::new(Arc::new(ProselessLLM));
        let observer = RecordingObserver::default();

        let result = driver.build_sequential(&request(), &observer).await;
        assert!(matches!(result, Err(BuildError::Provider(_))));

        // The observer sees exactly one error and a terminal error
        // step; the build never completes.
        assert_eq!(*observer.errors.lock().unwrap(), 1);
        assert!(!*observer.completed.lock().unwrap());
        let steps = observer.steps.lock().unwrap().clone();
        assert_eq!(steps.last().map(String::as_str), Some("error"));
        assert!(!steps.iter().any(|s| s == "completed"));
    }

    #[tokio::test]
    async fn test_parallel_skeleton_failure_reports_error_and_stops() {
        let driver = BuildDriver::new(Arc::new(ProselessLLM));
        let observer = RecordingObserver::default();

        let result = driver.build_parallel(&request(), &observer).await;
        assert!(result.is_err());
        assert_eq!(*observer.errors.lock().unwrap(), 1);
        assert!(!*observer.completed.lock().unwrap());
        assert_eq!(
            observer.steps.lock().unwrap().last().map(String::as_str),
            Some("error")
        );
    }

    #[tokio::test]
    async fn test_parallel_maps_batch_rate_into_band() {
        let driver = BuildDriver::new(Arc::new(PlannerLLM));
        let observer = RecordingObserver::default();
        let doc = driver.build_parallel(&request(), &observer).await.unwrap();

        assert_eq!(doc.status, ItineraryStatus::Completed);
        assert_eq!(doc.schedule.len(), 3);
        for day in &doc.schedule {
            assert!(!day.spots[0].description.is_empty());
        }

        let progress = observer.progress.lock().unwrap().clone();
        assert_eq!(progress.first(), Some(&40.0));
        assert_eq!(progress.last(), Some(&100.0));
        // Batch updates stay inside the [40, 90] band.
        for p in &progress[1..progress.len() - 1] {
            assert!((40.0..=90.0).contains(p), "progress {} out of band", p);
        }
    }
}
