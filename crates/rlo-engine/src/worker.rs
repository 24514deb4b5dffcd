use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use rlo_contracts::chat::{replies, GenerationCompletion, GenerationJob, GenerationOutcome};

use crate::GenerationClient;

struct CompletionGuard<E: From<GenerationCompletion>> {
    message_id: u64,
    tx: Option<Sender<E>>,
}

impl<E: From<GenerationCompletion>> CompletionGuard<E> {
    fn finish(&mut self, outcome: GenerationOutcome) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        // The control loop may already be gone during shutdown.
        let _ = tx.send(E::from(GenerationCompletion {
            message_id: self.message_id,
            outcome,
        }));
    }
}

impl<E: From<GenerationCompletion>> Drop for CompletionGuard<E> {
    fn drop(&mut self) {
        self.finish(GenerationOutcome::Failed(
            replies::GENERATION_FAILED.to_string(),
        ));
    }
}

pub fn spawn_generation<E>(
    client: Arc<GenerationClient>,
    job: GenerationJob,
    tx: Sender<E>,
) -> Result<JoinHandle<()>>
where
    E: From<GenerationCompletion> + Send + 'static,
{
    let message_id = job.message_id;
    thread::Builder::new()
        .name(format!("rlo-generate-{message_id}"))
        .spawn(move || {
            let mut guard = CompletionGuard {
                message_id: job.message_id,
                tx: Some(tx),
            };
            let outcome = client.generate(Some(job.message_id), &job.text, job.style);
            guard.finish(outcome);
        })
        .with_context(|| format!("failed to spawn generation worker for message {message_id}"))
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    use rlo_contracts::chat::{
        replies, GenerationCompletion, GenerationJob, GenerationOutcome, Style,
    };
    use rlo_contracts::images::ImagePayload;
    use serde_json::Map;

    use super::spawn_generation;
    use crate::{GenerationClient, ImageProvider, ProviderGenerateRequest, ProviderGenerateResponse};

    struct StaticProvider;

    impl ImageProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        fn generate(
            &self,
            request: &ProviderGenerateRequest,
        ) -> anyhow::Result<ProviderGenerateResponse> {
            assert_eq!(request.prompt, "Sketch style, بيت");
            Ok(ProviderGenerateResponse {
                provider_response: Map::new(),
                image: Some(ImagePayload::new("image/png", "AAEC")),
                text: Vec::new(),
            })
        }
    }

    struct PanickingProvider;

    impl ImageProvider for PanickingProvider {
        fn name(&self) -> &str {
            "panicking"
        }

        fn generate(
            &self,
            _request: &ProviderGenerateRequest,
        ) -> anyhow::Result<ProviderGenerateResponse> {
            panic!("provider bug");
        }
    }

    fn job(style: Style) -> GenerationJob {
        GenerationJob {
            message_id: 42,
            text: "بيت".to_string(),
            style,
        }
    }

    #[test]
    fn worker_reports_generated_image() -> anyhow::Result<()> {
        let client = Arc::new(GenerationClient::new(Arc::new(StaticProvider), "m"));
        let (tx, rx) = mpsc::channel::<GenerationCompletion>();
        let handle = spawn_generation(client, job(Style::Sketch), tx)?;

        let completion = rx.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(
            completion,
            GenerationCompletion {
                message_id: 42,
                outcome: GenerationOutcome::Image(ImagePayload::new("image/png", "AAEC")),
            }
        );
        assert!(handle.join().is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        Ok(())
    }

    #[test]
    fn worker_panic_still_reports_failure_once() -> anyhow::Result<()> {
        let client = Arc::new(GenerationClient::new(Arc::new(PanickingProvider), "m"));
        let (tx, rx) = mpsc::channel::<GenerationCompletion>();
        let handle = spawn_generation(client, job(Style::Natural), tx)?;

        let completion = rx.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(completion.message_id, 42);
        assert_eq!(
            completion.outcome,
            GenerationOutcome::Failed(replies::GENERATION_FAILED.to_string())
        );
        assert!(handle.join().is_err());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        Ok(())
    }
}
