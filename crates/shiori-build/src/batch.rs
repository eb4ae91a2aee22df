use crate::error::BuildError;
use crate::prompts;
use crate::semaphore::Semaphore;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use shiori_core::{
    merge_itinerary_data, BatchProgress, DayDetailTask, ItineraryDocument, MultiStreamChunk,
};
use shiori_llm::{ChatStreamChunk, LLMProvider, Message};

pub const DEFAULT_MAX_PARALLEL: usize = 3;
const MAX_PARALLEL_LIMIT: usize = 8;

/// Request body of the batch day-detailing endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDetailRequest {
    pub days: Vec<DayDetailTask>,
    #[serde(default)]
    pub chat_history: Vec<Message>,
    #[serde(default)]
    pub current_itinerary: Option<ItineraryDocument>,
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

/// Detail several days concurrently, multiplexing every day's events
/// onto one ordered-per-day chunk stream.
///
/// All day tasks are spawned up front; a shared FIFO semaphore bounds
/// how many talk to the model at once. Each day merges its result into
/// the shared document, so later days see what earlier days produced.
/// A failing day emits `day_error` and leaves its siblings untouched;
/// the stream always ends with one `done` chunk at rate 100.
pub fn run_batch(
    llm: Arc<dyn LLMProvider>,
    request: BatchDetailRequest,
) -> mpsc::Receiver<MultiStreamChunk> {
    let (tx, rx) = mpsc::channel(256);

    tokio::spawn(async move {
        if request.days.is_empty() {
            let err = BuildError::InvalidRequest("no days to detail".to_string());
            let _ = tx.send(MultiStreamChunk::error(err.to_string())).await;
            return;
        }

        let max_parallel = request
            .max_parallel
            .unwrap_or(DEFAULT_MAX_PARALLEL)
            .clamp(1, MAX_PARALLEL_LIMIT);

        info!(
            "Starting batch detail of {} days (max {} in parallel)",
            request.days.len(),
            max_parallel
        );

        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let shared = Arc::new(Mutex::new(request.current_itinerary));
        let chat_history = Arc::new(request.chat_history);
        let total = request.days.len();

        let mut handles = Vec::with_capacity(total);
        for task in request.days {
            let day = task.day;
            let llm = Arc::clone(&llm);
            let semaphore = Arc::clone(&semaphore);
            let shared = Arc::clone(&shared);
            let chat_history = Arc::clone(&chat_history);
            let tx = tx.clone();

            let handle = tokio::spawn(async move {
                let result = detail_day(llm, semaphore, shared, chat_history, task, &tx).await;
                if let Err(e) = &result {
                    warn!("Day {} failed: {}", day, e);
                    let _ = tx.send(MultiStreamChunk::day_error(day, e.to_string())).await;
                }
                result.is_ok()
            });
            handles.push((day, handle));
        }

        let mut completed: Vec<u32> = Vec::new();
        let mut errors: Vec<u32> = Vec::new();
        let mut processing: Vec<u32> = handles.iter().map(|(day, _)| *day).collect();

        for (day, handle) in handles {
            let succeeded = match handle.await {
                Ok(succeeded) => succeeded,
                Err(e) => {
                    let reason = if e.is_cancelled() {
                        "cancelled".to_string()
                    } else {
                        format!("day task panicked: {}", e)
                    };
                    let _ = tx.send(MultiStreamChunk::day_error(day, reason)).await;
                    false
                }
            };

            processing.retain(|d| *d != day);
            if succeeded {
                completed.push(day);
            } else {
                errors.push(day);
            }

            let progress = BatchProgress {
                completed_days: completed.clone(),
                processing_days: processing.clone(),
                error_days: errors.clone(),
                total_days: total as u32,
                progress_rate: BatchProgress::rate(completed.len(), total),
            };
            if tx.send(MultiStreamChunk::progress(progress)).await.is_err() {
                return;
            }
        }

        info!(
            "Batch finished: {} completed, {} failed",
            completed.len(),
            errors.len()
        );

        let _ = tx
            .send(MultiStreamChunk::done(BatchProgress {
                completed_days: completed,
                processing_days: Vec::new(),
                error_days: errors,
                total_days: total as u32,
                progress_rate: 100,
            }))
            .await;
    });

    rx
}

/// One day's worth of work: permit, `day_start`, streamed tokens, merge
/// of the terminal itinerary, `day_complete`. The permit guard releases
/// on every exit path.
async fn detail_day(
    llm: Arc<dyn LLMProvider>,
    semaphore: Arc<Semaphore>,
    shared: Arc<Mutex<Option<ItineraryDocument>>>,
    chat_history: Arc<Vec<Message>>,
    task: DayDetailTask,
    tx: &mpsc::Sender<MultiStreamChunk>,
) -> Result<(), BuildError> {
    let _permit = semaphore.acquire_owned().await;
    let day = task.day;

    tx.send(MultiStreamChunk::day_start(day))
        .await
        .map_err(|_| BuildError::Cancelled)?;

    let prompt = {
        let doc = shared.lock().await;
        prompts::day_detail_prompt(&task, doc.as_ref())
    };

    let mut messages = Vec::with_capacity(chat_history.len() + 2);
    messages.push(Message::system(prompts::system_prompt()));
    messages.extend(chat_history.iter().cloned());
    messages.push(Message::user(prompt));

    let mut stream = llm.stream_chat(messages).await?;

    while let Some(chunk) = stream.next().await {
        match chunk? {
            ChatStreamChunk::Message { content } => {
                tx.send(MultiStreamChunk::message(Some(day), content))
                    .await
                    .map_err(|_| BuildError::Cancelled)?;
            }
            ChatStreamChunk::Itinerary { itinerary } => {
                let merged = {
                    let mut doc = shared.lock().await;
                    let merged = merge_itinerary_data(doc.as_ref(), &itinerary);
                    *doc = Some(merged.clone());
                    merged
                };
                tx.send(MultiStreamChunk::itinerary(Some(day), merged))
                    .await
                    .map_err(|_| BuildError::Cancelled)?;
            }
        }
    }

    tx.send(MultiStreamChunk::day_complete(day))
        .await
        .map_err(|_| BuildError::Cancelled)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use shiori_llm::{ChatStream, LLMResponse};
    use std::collections::HashMap;

    /// Scripted provider: per-day token scripts keyed off the "day N"
    /// marker in the prompt; listed days fail instead.
    struct ScriptedLLM {
        failing_days: Vec<u32>,
    }

    impl ScriptedLLM {
        fn new() -> Self {
            Self {
                failing_days: Vec::new(),
            }
        }

        fn failing(days: Vec<u32>) -> Self {
            Self { failing_days: days }
        }

        fn requested_day(messages: &[Message]) -> u32 {
            let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            for day in 1..=31 {
                if prompt.contains(&format!("Flesh out day {} ", day)) {
                    return day;
                }
            }
            0
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedLLM {
        async fn generate(&self, _prompt: &str) -> Result<LLMResponse> {
            unimplemented!("not used by the batch path")
        }

        async fn generate_with_context(&self, _messages: Vec<Message>) -> Result<LLMResponse> {
            unimplemented!("not used by the batch path")
        }

        async fn stream_chat(&self, messages: Vec<Message>) -> Result<ChatStream> {
            let day = Self::requested_day(&messages);
            if self.failing_days.contains(&day) {
                anyhow::bail!("model rejected day {}", day);
            }

            let block = json!({
                "schedule": [{
                    "day": day,
                    "spots": [{
                        "name": format!("Spot for day {}", day),
                        "description": "Detailed",
                        "scheduledTime": "09:00",
                        "duration": 60
                    }]
                }]
            });
            let reply = format!("Here is day {}.\n```json\n{}\n```", day, block);

            let chunks: Vec<Result<ChatStreamChunk>> = vec![
                Ok(ChatStreamChunk::Message {
                    content: format!("Working on day {}...", day),
                }),
                Ok(ChatStreamChunk::Itinerary {
                    itinerary: shiori_core::itinerary_update_from_value(
                        shiori_core::parse_ai_response(&reply)
                            .itinerary_data
                            .ok_or_else(|| anyhow::anyhow!("script bug"))?,
                    )
                    .ok_or_else(|| anyhow::anyhow!("script bug"))?,
                }),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn request(days: &[u32], max_parallel: Option<usize>) -> BatchDetailRequest {
        BatchDetailRequest {
            days: days
                .iter()
                .map(|&day| DayDetailTask {
                    day,
                    theme: None,
                    additional_info: None,
                    priority: day,
                })
                .collect(),
            chat_history: Vec::new(),
            current_itinerary: None,
            max_parallel,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<MultiStreamChunk>) -> Vec<MultiStreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_empty_request_short_circuits() {
        let llm = Arc::new(ScriptedLLM::new());
        let chunks = collect(run_batch(llm, request(&[], None))).await;
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            MultiStreamChunk::Error { error, .. } => {
                assert_eq!(error, "invalid request: no days to detail");
            }
            other => panic!("expected error chunk, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let llm = Arc::new(ScriptedLLM::failing(vec![3]));
        let chunks = collect(run_batch(llm, request(&[1, 2, 3, 4, 5], Some(2)))).await;

        let completes: Vec<u32> = chunks
            .iter()
            .filter_map(|c| match c {
                MultiStreamChunk::DayComplete { day, .. } => Some(*day),
                _ => None,
            })
            .collect();
        assert_eq!(completes.len(), 4);
        assert!(!completes.contains(&3));

        let error_days: Vec<u32> = chunks
            .iter()
            .filter_map(|c| match c {
                MultiStreamChunk::DayError { day, .. } => Some(*day),
                _ => None,
            })
            .collect();
        assert_eq!(error_days, vec![3]);

        match chunks.last() {
            Some(MultiStreamChunk::Done { progress, .. }) => {
                assert_eq!(progress.progress_rate, 100);
                assert_eq!(progress.error_days, vec![3]);
                assert_eq!(progress.completed_days.len(), 4);
                assert!(progress.processing_days.is_empty());
            }
            other => panic!("expected done chunk, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_per_day_chunk_ordering() {
        let llm = Arc::new(ScriptedLLM::new());
        let chunks = collect(run_batch(llm, request(&[1, 2, 3], Some(3)))).await;

        // For every day: day_start, then messages/itinerary, then
        // day_complete, regardless of interleaving across days.
        let mut positions: HashMap<u32, Vec<&str>> = HashMap::new();
        for chunk in &chunks {
            match chunk {
                MultiStreamChunk::DayStart { day, .. } => {
                    positions.entry(*day).or_default().push("start")
                }
                MultiStreamChunk::Message { day: Some(day), .. } => {
                    positions.entry(*day).or_default().push("message")
                }
                MultiStreamChunk::Itinerary { day: Some(day), .. } => {
                    positions.entry(*day).or_default().push("itinerary")
                }
                MultiStreamChunk::DayComplete { day, .. } => {
                    positions.entry(*day).or_default().push("complete")
                }
                _ => {}
            }
        }
        for day in 1..=3 {
            let events = &positions[&day];
            assert_eq!(events.first(), Some(&"start"));
            assert_eq!(events.last(), Some(&"complete"));
            assert!(events.contains(&"itinerary"));
        }
    }

    #[tokio::test]
    async fn test_merges_accumulate_into_shared_document() {
        let llm = Arc::new(ScriptedLLM::new());
        let chunks = collect(run_batch(llm, request(&[1, 2, 3], Some(1)))).await;

        // With a single permit the days run in order, so the last
        // itinerary chunk holds all three merged days.
        let last_doc = chunks
            .iter()
            .rev()
            .find_map(|c| match c {
                MultiStreamChunk::Itinerary { itinerary, .. } => Some(itinerary),
                _ => None,
            })
            .expect("no itinerary chunk");
        assert_eq!(last_doc.schedule.len(), 3);
        let days: Vec<u32> = last_doc.schedule.iter().map(|d| d.day).collect();
        assert_eq!(days, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_progress_emitted_per_finished_day() {
        let llm = Arc::new(ScriptedLLM::new());
        let chunks = collect(run_batch(llm, request(&[1, 2], Some(2)))).await;

        let rates: Vec<u32> = chunks
            .iter()
            .filter_map(|c| match c {
                MultiStreamChunk::Progress { progress, .. } => Some(progress.progress_rate),
                _ => None,
            })
            .collect();
        assert_eq!(rates, vec![50, 100]);
    }
}
