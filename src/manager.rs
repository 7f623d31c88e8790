//! One invocation's worth of work: build, send, then replay the offline queue.

use crate::api::ApiClient;
use crate::config::Settings;
use crate::constants::{HEARTBEATS_PER_REQUEST, SUCCESS};
use crate::heartbeat::{Heartbeat, HeartbeatBuilder, HeartbeatInput, SkipReason};
use crate::queue;

pub struct HeartbeatManager<'a> {
    settings: &'a Settings,
    builder: HeartbeatBuilder<'a>,
    api: ApiClient<'a>,
}

impl<'a> HeartbeatManager<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            builder: HeartbeatBuilder::new(settings),
            api: ApiClient::new(settings),
        }
    }

    /// Sends the primary heartbeat plus `extras` and returns the exit code.
    pub async fn process(&self, primary: HeartbeatInput, extras: Vec<HeartbeatInput>) -> i32 {
        let mut heartbeats = Vec::with_capacity(extras.len() + 1);
        for input in std::iter::once(primary).chain(extras) {
            let entity = input.entity.clone();
            match self.builder.build(input).await {
                Ok(heartbeat) => heartbeats.push(heartbeat),
                Err(reason) => log_skip(&entity, &reason),
            }
        }

        let code = self.send_all(&heartbeats).await;
        if code != SUCCESS {
            return code;
        }

        self.sync_offline_activity().await
    }

    /// Sends in chunks; whatever follows a failed chunk goes to the queue.
    async fn send_all(&self, heartbeats: &[Heartbeat]) -> i32 {
        let mut code = SUCCESS;
        let mut remaining = heartbeats;

        while !remaining.is_empty() {
            let (chunk, rest) = remaining.split_at(remaining.len().min(HEARTBEATS_PER_REQUEST));
            code = self.api.send_heartbeats(chunk).await;
            remaining = rest;
            if code != SUCCESS {
                break;
            }
        }

        if !remaining.is_empty() && self.settings.offline {
            queue::enqueue(self.settings.queue_path.clone(), remaining.to_vec()).await;
        }
        code
    }

    /// Replays queued heartbeats one at a time, up to the configured limit.
    ///
    /// Stops at the first failure; the failed heartbeat is re-queued by the
    /// api client.
    pub async fn sync_offline_activity(&self) -> i32 {
        if !self.settings.offline {
            return SUCCESS;
        }

        let limit = self.settings.sync_offline_activity;
        let mut synced = 0;
        while synced < limit {
            let Some(heartbeat) = queue::dequeue(self.settings.queue_path.clone()).await else {
                break;
            };

            let code = self.api.send_heartbeats(std::slice::from_ref(&heartbeat)).await;
            if code != SUCCESS {
                tracing::info!(operation = "sync", synced, status = code, "Stopped syncing offline heartbeats");
                return code;
            }
            synced += 1;
        }

        if synced > 0 {
            tracing::info!(operation = "sync", synced, "Synced offline heartbeats");
        }
        SUCCESS
    }
}

fn log_skip(entity: &str, reason: &SkipReason) {
    match reason {
        SkipReason::AmbiguousLanguage(_) => {
            tracing::debug!(entity, "{}", reason);
        }
        _ => tracing::debug!("{}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::config::ConfigFile;
    use crate::constants::API_ERROR;
    use crate::entity::EntityType;
    use crate::queue::{Queue, QueueOps};
    use clap::Parser;
    use serde_json::Value;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "00000000-0000-4000-8000-000000000000";

    fn settings(temp_dir: &TempDir, api_url: &str, args: &[&str]) -> Settings {
        let mut argv = vec!["wakatime-cli", "--entity", "vim", "--key", KEY, "--apiurl", api_url];
        argv.extend_from_slice(args);
        let mut settings = Settings::resolve(&Cli::parse_from(argv), &ConfigFile::default()).unwrap();
        settings.queue_path = temp_dir.path().join(".wakatime.bdb");
        settings.session_path = temp_dir.path().join(".wakatime_session");
        settings
    }

    fn app(name: &str) -> HeartbeatInput {
        HeartbeatInput {
            entity: name.to_string(),
            entity_type: EntityType::App,
            time: Some(1_700_000_000.0),
            ..Default::default()
        }
    }

    fn queued_entities(settings: &Settings) -> Vec<String> {
        Queue::with_path(settings.queue_path.clone())
            .unwrap()
            .pop_many(1000)
            .unwrap()
            .into_iter()
            .map(|h| h.entity)
            .collect()
    }

    fn accept_all() -> ResponseTemplate {
        ResponseTemplate::new(201).set_body_string("[]")
    }

    #[tokio::test]
    async fn test_batches_are_split_per_request_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(accept_all()).mount(&server).await;

        let temp_dir = TempDir::new().unwrap();
        let settings = settings(&temp_dir, &server.uri(), &[]);
        let extras = (0..30).map(|i| app(&format!("app{}", i))).collect();

        let code = HeartbeatManager::new(&settings).process(app("primary"), extras).await;

        assert_eq!(code, SUCCESS);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(first.as_array().unwrap().len(), HEARTBEATS_PER_REQUEST);
        assert_eq!(second.as_array().unwrap().len(), 31 - HEARTBEATS_PER_REQUEST);
        assert_eq!(first[0]["entity"], "primary");
    }

    #[tokio::test]
    async fn test_failed_chunk_queues_the_rest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let settings = settings(&temp_dir, &server.uri(), &[]);
        let extras = (0..29).map(|i| app(&format!("app{}", i))).collect();

        let code = HeartbeatManager::new(&settings).process(app("primary"), extras).await;

        assert_eq!(code, API_ERROR);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(queued_entities(&settings).len(), 30);
    }

    #[tokio::test]
    async fn test_queue_is_drained_after_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(accept_all()).mount(&server).await;

        let temp_dir = TempDir::new().unwrap();
        let settings = settings(&temp_dir, &server.uri(), &[]);
        let manager = HeartbeatManager::new(&settings);
        let old = manager.builder.build(app("old")).await.unwrap();
        Queue::with_path(settings.queue_path.clone())
            .unwrap()
            .push_many(&[old.clone(), old])
            .unwrap();

        assert_eq!(manager.process(app("primary"), Vec::new()).await, SUCCESS);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        assert!(queued_entities(&settings).is_empty());
    }

    #[tokio::test]
    async fn test_drain_respects_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(accept_all()).mount(&server).await;

        let temp_dir = TempDir::new().unwrap();
        let settings = settings(&temp_dir, &server.uri(), &["--sync-offline-activity", "1"]);
        let manager = HeartbeatManager::new(&settings);
        let a = manager.builder.build(app("a")).await.unwrap();
        let b = manager.builder.build(app("b")).await.unwrap();
        Queue::with_path(settings.queue_path.clone()).unwrap().push_many(&[a, b]).unwrap();

        assert_eq!(manager.sync_offline_activity().await, SUCCESS);
        assert_eq!(queued_entities(&settings), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_drain_stops_on_first_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let settings = settings(&temp_dir, &server.uri(), &[]);
        let manager = HeartbeatManager::new(&settings);
        let a = manager.builder.build(app("a")).await.unwrap();
        let b = manager.builder.build(app("b")).await.unwrap();
        Queue::with_path(settings.queue_path.clone()).unwrap().push_many(&[a, b]).unwrap();

        assert_eq!(manager.sync_offline_activity().await, API_ERROR);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        let mut left = queued_entities(&settings);
        left.sort();
        assert_eq!(left, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_skipped_primary_still_sends_extras() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(accept_all()).mount(&server).await;

        let temp_dir = TempDir::new().unwrap();
        let settings = settings(&temp_dir, &server.uri(), &[]);
        let missing = HeartbeatInput {
            entity: temp_dir.path().join("missing.py").to_string_lossy().into_owned(),
            ..Default::default()
        };

        let code = HeartbeatManager::new(&settings).process(missing, vec![app("extra")]).await;

        assert_eq!(code, SUCCESS);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["entity"], "extra");
    }

    #[tokio::test]
    async fn test_nothing_to_send_makes_no_request() {
        let server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();
        let settings = settings(&temp_dir, &server.uri(), &[]);
        let missing = HeartbeatInput {
            entity: temp_dir.path().join("missing.py").to_string_lossy().into_owned(),
            ..Default::default()
        };

        assert_eq!(HeartbeatManager::new(&settings).process(missing, Vec::new()).await, SUCCESS);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
