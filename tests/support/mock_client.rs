// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fake `UpstreamClient` for integration tests: scripted responses per
//! call count, with a recording of every request seen.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use log_pusher_core::client::{
    LogGroupRetention, PutLogEventsRequest, PutLogEventsResponse, UpstreamClient, UpstreamError,
};
use log_pusher_core::target::{StorageClass, Target};

/// What `put_log_events` should do on its Nth call for a given target.
pub enum Script {
    Succeed,
    SucceedWithRejections(log_pusher_core::client::RejectedLogEventsInfo),
    Fail(fn() -> UpstreamError),
}

#[derive(Default)]
pub struct MockClient {
    pub put_log_events_calls: Mutex<Vec<PutLogEventsRequest>>,
    pub create_stream_calls: Mutex<Vec<Target>>,
    pub create_group_calls: Mutex<Vec<String>>,
    pub retention_calls: Mutex<Vec<(String, i32)>>,
    scripts: Mutex<HashMap<String, Vec<Script>>>,
    stream_exists: Mutex<HashMap<String, bool>>,
    group_exists: Mutex<HashMap<String, bool>>,
    group_retention: Mutex<HashMap<String, Option<i32>>>,
}

impl MockClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a sequence of `PutLogEvents` behaviors for `target`, consumed
    /// in order; once exhausted, further calls succeed.
    pub fn script_put_log_events(&self, target: &Target, scripts: Vec<Script>) {
        self.scripts.lock().unwrap().insert(target.to_string(), scripts);
    }

    pub fn mark_stream_missing(&self, target: &Target) {
        self.stream_exists.lock().unwrap().insert(target.to_string(), false);
    }

    pub fn mark_group_missing(&self, group: &str) {
        self.group_exists.lock().unwrap().insert(group.to_owned(), false);
    }

    #[must_use]
    pub fn put_log_events_call_count(&self) -> usize {
        self.put_log_events_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl UpstreamClient for MockClient {
    async fn put_log_events(&self, request: PutLogEventsRequest) -> Result<PutLogEventsResponse, UpstreamError> {
        let key = request.target.to_string();
        self.put_log_events_calls.lock().unwrap().push(request);

        let mut scripts = self.scripts.lock().unwrap();
        if let Some(queue) = scripts.get_mut(&key) {
            if !queue.is_empty() {
                return match queue.remove(0) {
                    Script::Succeed => Ok(PutLogEventsResponse::default()),
                    Script::SucceedWithRejections(rejected_info) => Ok(PutLogEventsResponse { rejected_info }),
                    Script::Fail(make_err) => Err(make_err()),
                };
            }
        }
        Ok(PutLogEventsResponse::default())
    }

    async fn create_log_stream(&self, target: &Target) -> Result<(), UpstreamError> {
        self.create_stream_calls.lock().unwrap().push(target.clone());
        let key = target.to_string();
        let missing = self.stream_exists.lock().unwrap().get(&key).copied() == Some(false);
        if missing {
            self.stream_exists.lock().unwrap().insert(key.clone(), true);
            if self.group_exists.lock().unwrap().get(&target.group).copied() == Some(false) {
                return Err(UpstreamError::ResourceNotFound(format!("group {} missing", target.group)));
            }
            return Err(UpstreamError::ResourceNotFound(format!("stream {key} missing")));
        }
        Ok(())
    }

    async fn create_log_group(&self, group: &str, _class: StorageClass) -> Result<(), UpstreamError> {
        self.create_group_calls.lock().unwrap().push(group.to_owned());
        self.group_exists.lock().unwrap().insert(group.to_owned(), true);
        Ok(())
    }

    async fn put_retention_policy(&self, group: &str, retention_days: i32) -> Result<(), UpstreamError> {
        self.retention_calls.lock().unwrap().push((group.to_owned(), retention_days));
        self.group_retention.lock().unwrap().insert(group.to_owned(), Some(retention_days));
        Ok(())
    }

    async fn describe_log_groups(&self, groups: &[String]) -> Result<Vec<LogGroupRetention>, UpstreamError> {
        let retention = self.group_retention.lock().unwrap();
        Ok(groups
            .iter()
            .map(|g| LogGroupRetention {
                group: g.clone(),
                retention_days: retention.get(g).copied().flatten(),
            })
            .collect())
    }
}
